//! Strategy profiles.
//!
//! A profile is an immutable bundle of factor weights, saturation points
//! and admission floors. Three presets mirror the trading styles operators
//! pick from; custom profiles must pass `validate` before the engine will
//! install them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Demand, SniperError, UgcPolicy};

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Maximum points per factor. Must sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub discount: f64,
    pub demand: f64,
    pub trend: f64,
    pub liquidity: f64,
    pub stability: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            discount: 30.0,
            demand: 25.0,
            trend: 20.0,
            liquidity: 15.0,
            stability: 10.0,
        }
    }
}

impl FactorWeights {
    pub fn total(&self) -> f64 {
        self.discount + self.demand + self.trend + self.liquidity + self.stability
    }

    fn all(&self) -> [f64; 5] {
        [self.discount, self.demand, self.trend, self.liquidity, self.stability]
    }
}

// ---------------------------------------------------------------------------
// Presets
// ---------------------------------------------------------------------------

/// Named preset selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// High-liquidity items for fast turnaround.
    QuickFlip,
    /// Deep discounts on stable items.
    ValuePlay,
    /// Rare items with strong demand.
    RareHunt,
}

impl StrategyKind {
    pub const ALL: &'static [StrategyKind] = &[
        StrategyKind::QuickFlip,
        StrategyKind::ValuePlay,
        StrategyKind::RareHunt,
    ];
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::QuickFlip => write!(f, "quick_flip"),
            StrategyKind::ValuePlay => write!(f, "value_play"),
            StrategyKind::RareHunt => write!(f, "rare_hunt"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = SniperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "quick_flip" | "quick_flips" | "flip" => Ok(StrategyKind::QuickFlip),
            "value_play" | "value_plays" | "value" => Ok(StrategyKind::ValuePlay),
            "rare_hunt" | "rare_hunting" | "rare" => Ok(StrategyKind::RareHunt),
            _ => Err(SniperError::Config(format!("Unknown strategy: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyProfile {
    pub name: String,
    pub weights: FactorWeights,
    /// Discount ratio at which the discount factor saturates.
    pub max_discount_reference: f64,
    /// 90-day sales volume at which the liquidity factor saturates.
    pub liquidity_reference: u32,
    /// RAP/value deviation at which the stability factor reaches zero.
    pub stability_tolerance: f64,
    /// Lowest admitted demand tier.
    pub min_demand: Demand,
    /// Minimum 90-day sales.
    pub liquidity_floor: u32,
    pub min_copies: u32,
    /// Minimum discount ratio to admit a listing.
    pub min_discount: f64,
    pub ugc_policy: UgcPolicy,
    /// UGC items younger than this are rejected unless the policy is `Allow`.
    pub min_ugc_age_days: u32,
    /// Added when the item is rare and demand is at least high.
    pub rare_bonus: f64,
    pub hype_penalty: f64,
    /// Subtracted from UGC items under `UgcPolicy::Penalize`.
    pub ugc_penalty: f64,
}

impl Default for StrategyProfile {
    fn default() -> Self {
        Self::preset(StrategyKind::QuickFlip)
    }
}

impl fmt::Display for StrategyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w = &self.weights;
        write!(
            f,
            "{} [disc {:.0} | dem {:.0} | trend {:.0} | liq {:.0} | stab {:.0}] ugc={}",
            self.name, w.discount, w.demand, w.trend, w.liquidity, w.stability, self.ugc_policy,
        )
    }
}

impl StrategyProfile {
    pub fn preset(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::QuickFlip => Self {
                name: kind.to_string(),
                weights: FactorWeights::default(),
                max_discount_reference: 0.75,
                liquidity_reference: 50,
                stability_tolerance: 0.5,
                min_demand: Demand::Low,
                liquidity_floor: 1,
                min_copies: 5,
                min_discount: 0.20,
                ugc_policy: UgcPolicy::Penalize,
                min_ugc_age_days: 30,
                rare_bonus: 5.0,
                hype_penalty: 5.0,
                ugc_penalty: 10.0,
            },
            StrategyKind::ValuePlay => Self {
                name: kind.to_string(),
                weights: FactorWeights {
                    discount: 35.0,
                    demand: 20.0,
                    trend: 15.0,
                    liquidity: 10.0,
                    stability: 20.0,
                },
                max_discount_reference: 0.6,
                liquidity_reference: 30,
                stability_tolerance: 0.4,
                min_demand: Demand::Normal,
                liquidity_floor: 1,
                min_copies: 5,
                min_discount: 0.30,
                ugc_policy: UgcPolicy::Deny,
                min_ugc_age_days: 30,
                rare_bonus: 5.0,
                hype_penalty: 10.0,
                ugc_penalty: 10.0,
            },
            StrategyKind::RareHunt => Self {
                name: kind.to_string(),
                weights: FactorWeights {
                    discount: 25.0,
                    demand: 30.0,
                    trend: 15.0,
                    liquidity: 10.0,
                    stability: 20.0,
                },
                max_discount_reference: 0.5,
                liquidity_reference: 20,
                stability_tolerance: 0.5,
                min_demand: Demand::Normal,
                liquidity_floor: 1,
                min_copies: 5,
                min_discount: 0.15,
                ugc_policy: UgcPolicy::Penalize,
                min_ugc_age_days: 30,
                rare_bonus: 15.0,
                hype_penalty: 5.0,
                ugc_penalty: 10.0,
            },
        }
    }

    /// Same profile with a different UGC policy.
    pub fn with_ugc_policy(mut self, policy: UgcPolicy) -> Self {
        self.ugc_policy = policy;
        self
    }

    /// Reject profiles the scorer cannot interpret.
    pub fn validate(&self) -> Result<(), SniperError> {
        if self.name.trim().is_empty() {
            return Err(SniperError::Config("Strategy name must not be empty".into()));
        }
        if self.weights.all().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SniperError::Config(format!(
                "Strategy '{}' has a negative or non-finite weight",
                self.name
            )));
        }
        let total = self.weights.total();
        if (total - 100.0).abs() > 1e-6 {
            return Err(SniperError::Config(format!(
                "Strategy '{}' weights sum to {total:.2}, expected 100",
                self.name
            )));
        }
        if !(self.max_discount_reference > 0.0 && self.max_discount_reference <= 1.0) {
            return Err(SniperError::Config(format!(
                "max_discount_reference must be in (0, 1], got {}",
                self.max_discount_reference
            )));
        }
        if self.liquidity_reference == 0 {
            return Err(SniperError::Config("liquidity_reference must be positive".into()));
        }
        if !(self.stability_tolerance > 0.0 && self.stability_tolerance.is_finite()) {
            return Err(SniperError::Config("stability_tolerance must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.min_discount) {
            return Err(SniperError::Config(format!(
                "min_discount must be in [0, 1), got {}",
                self.min_discount
            )));
        }
        for (label, v) in [
            ("rare_bonus", self.rare_bonus),
            ("hype_penalty", self.hype_penalty),
            ("ugc_penalty", self.ugc_penalty),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(SniperError::Config(format!("{label} must be non-negative")));
            }
        }
        Ok(())
    }
}
