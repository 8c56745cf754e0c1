//! Multi-factor snipe scorer.
//!
//! Five factors, each capped at the profile's weight:
//! 1. DISCOUNT:  how far below value the listing sits
//! 2. DEMAND:    six-step demand ladder
//! 3. TREND:     rising > stable > fluctuating
//! 4. LIQUIDITY: trailing 90-day sales volume
//! 5. STABILITY: how closely RAP tracks value
//!
//! Bonuses and penalties are applied on top and the total is clamped to
//! [0, 100]. Scoring is a pure function of snapshot and profile.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::profile::StrategyProfile;
use crate::types::{Demand, ItemSnapshot, ScoreTier, Trend, UgcPolicy};

/// Share of the trend weight awarded per direction.
fn trend_fraction(trend: Trend) -> f64 {
    match trend {
        Trend::Rising => 1.0,
        Trend::Stable => 0.75,
        Trend::Fluctuating => 0.4,
        Trend::Lowering => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Per-factor points and the deltas applied on top.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub discount: f64,
    pub demand: f64,
    pub trend: f64,
    pub liquidity: f64,
    pub stability: f64,
    pub rare_bonus: f64,
    /// Stored as a non-positive number.
    pub hype_penalty: f64,
    /// Stored as a non-positive number.
    pub ugc_penalty: f64,
}

impl ScoreBreakdown {
    /// Factor points before bonuses and penalties.
    pub fn base(&self) -> f64 {
        self.discount + self.demand + self.trend + self.liquidity + self.stability
    }

    /// Sum of bonus and penalty deltas.
    pub fn adjustments(&self) -> f64 {
        self.rare_bonus + self.hype_penalty + self.ugc_penalty
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub item_id: u64,
    /// Clamped to [0, 100].
    pub total: f64,
    pub tier: ScoreTier,
    pub breakdown: ScoreBreakdown,
    pub discount_pct: f64,
    pub strategy: String,
}

impl fmt::Display for ScoreResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "item {}: {:.1}/100 {} ({:.1}% off, {})",
            self.item_id, self.total, self.tier, self.discount_pct, self.strategy,
        )
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

pub struct Scorer;

impl Scorer {
    pub fn score(snapshot: &ItemSnapshot, profile: &StrategyProfile) -> ScoreResult {
        let w = &profile.weights;
        let discount_ratio = snapshot.discount_ratio();

        let mut b = ScoreBreakdown {
            discount: w.discount
                * (discount_ratio / profile.max_discount_reference).clamp(0.0, 1.0),
            demand: w.demand * f64::from(snapshot.demand.step()) / 5.0,
            trend: w.trend * trend_fraction(snapshot.trend),
            liquidity: w.liquidity
                * (f64::from(snapshot.sales_90d) / f64::from(profile.liquidity_reference))
                    .clamp(0.0, 1.0),
            stability: snapshot
                .rap_deviation()
                .map(|dev| w.stability * (1.0 - dev / profile.stability_tolerance).clamp(0.0, 1.0))
                .unwrap_or(0.0),
            ..ScoreBreakdown::default()
        };

        if snapshot.rare && snapshot.demand >= Demand::High {
            b.rare_bonus = profile.rare_bonus;
        }
        if snapshot.hyped {
            b.hype_penalty = -profile.hype_penalty;
        }
        if snapshot.is_ugc && profile.ugc_policy == UgcPolicy::Penalize {
            b.ugc_penalty = -profile.ugc_penalty;
        }

        let total = (b.base() + b.adjustments()).clamp(0.0, 100.0);

        ScoreResult {
            item_id: snapshot.item_id,
            total,
            tier: ScoreTier::from_score(total),
            breakdown: b,
            discount_pct: discount_ratio * 100.0,
            strategy: profile.name.clone(),
        }
    }
}
