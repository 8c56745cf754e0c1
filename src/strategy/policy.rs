//! Decision policy: (score, tier, mode, threshold) → action.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{PurchaseMode, ScoreTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Ignore,
    /// Notify the operator; no budget impact.
    Alert,
    /// Forward to the guard and executor.
    AutoBuy,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Ignore => write!(f, "ignore"),
            Action::Alert => write!(f, "alert"),
            Action::AutoBuy => write!(f, "auto-buy"),
        }
    }
}

pub struct DecisionPolicy;

impl DecisionPolicy {
    /// The tier × mode table.
    pub fn action_for(tier: ScoreTier, mode: PurchaseMode) -> Action {
        use Action::*;
        match (tier, mode) {
            (ScoreTier::Reject, _) => Ignore,
            (_, PurchaseMode::AlertConfirm) => Alert,
            (ScoreTier::Excellent, PurchaseMode::FullAuto | PurchaseMode::Hybrid) => AutoBuy,
            (ScoreTier::Good, PurchaseMode::FullAuto) => AutoBuy,
            (ScoreTier::Good, PurchaseMode::Hybrid) => Alert,
            (ScoreTier::Risky, PurchaseMode::FullAuto) => Ignore,
            (ScoreTier::Risky, PurchaseMode::Hybrid) => Alert,
        }
    }

    /// Table lookup, with auto-buys under the score threshold demoted to alerts.
    pub fn decide(score: f64, tier: ScoreTier, mode: PurchaseMode, threshold: u8) -> Action {
        match Self::action_for(tier, mode) {
            Action::AutoBuy if score < f64::from(threshold) => Action::Alert,
            action => action,
        }
    }
}
