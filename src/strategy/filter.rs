//! Pre-filter: hard rejections before scoring.
//!
//! Items failing any check are never scored, no matter how cheap the
//! listing is. Every check is independent so `rejections` can report the
//! full list for logging.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::profile::StrategyProfile;
use crate::types::{Demand, ItemSnapshot, Trend, UgcPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Projected,
    NoValue,
    NoDemand,
    TerribleDemand,
    DemandBelowFloor,
    LoweringTrend,
    UgcDenied,
    UgcTooNew,
    TooFewCopies,
    NoSales,
    BelowLiquidityFloor,
    InsufficientDiscount,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::Projected => "projected (inflated value)",
            RejectReason::NoValue => "no value assigned",
            RejectReason::NoDemand => "no demand data",
            RejectReason::TerribleDemand => "terrible demand",
            RejectReason::DemandBelowFloor => "demand below strategy floor",
            RejectReason::LoweringTrend => "value trending down",
            RejectReason::UgcDenied => "UGC excluded by strategy",
            RejectReason::UgcTooNew => "UGC item too new",
            RejectReason::TooFewCopies => "too few copies remaining",
            RejectReason::NoSales => "no sales in 90 days",
            RejectReason::BelowLiquidityFloor => "sales below liquidity floor",
            RejectReason::InsufficientDiscount => "discount below minimum",
        };
        f.write_str(text)
    }
}

/// Stateless predicate pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreFilter;

impl PreFilter {
    /// True when the snapshot survives every check.
    pub fn admit(snapshot: &ItemSnapshot, profile: &StrategyProfile) -> bool {
        Self::rejections(snapshot, profile).is_empty()
    }

    /// Every failing check, in a stable order.
    pub fn rejections(snapshot: &ItemSnapshot, profile: &StrategyProfile) -> Vec<RejectReason> {
        let mut reasons = Vec::new();

        if snapshot.projected {
            reasons.push(RejectReason::Projected);
        }
        if snapshot.value == 0 {
            reasons.push(RejectReason::NoValue);
        }

        match snapshot.demand {
            Demand::None => reasons.push(RejectReason::NoDemand),
            Demand::Terrible => reasons.push(RejectReason::TerribleDemand),
            d if d < profile.min_demand => reasons.push(RejectReason::DemandBelowFloor),
            _ => {}
        }

        if snapshot.trend == Trend::Lowering {
            reasons.push(RejectReason::LoweringTrend);
        }

        if snapshot.is_ugc {
            match profile.ugc_policy {
                UgcPolicy::Deny => reasons.push(RejectReason::UgcDenied),
                UgcPolicy::Penalize if snapshot.ugc_age_days < profile.min_ugc_age_days => {
                    reasons.push(RejectReason::UgcTooNew)
                }
                _ => {}
            }
        }

        if snapshot.copies_remaining < profile.min_copies {
            reasons.push(RejectReason::TooFewCopies);
        }

        if snapshot.sales_90d == 0 {
            reasons.push(RejectReason::NoSales);
        } else if snapshot.sales_90d < profile.liquidity_floor {
            reasons.push(RejectReason::BelowLiquidityFloor);
        }

        if snapshot.value > 0 && snapshot.discount_ratio() < profile.min_discount {
            reasons.push(RejectReason::InsufficientDiscount);
        }

        reasons
    }
}
