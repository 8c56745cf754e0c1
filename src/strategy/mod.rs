//! Strategy layer: pre-filter, scoring, profiles and the decision policy.

pub mod filter;
pub mod policy;
pub mod profile;
pub mod scorer;

use serde::Serialize;
use tracing::{debug, info};

use crate::types::{ItemSnapshot, PurchaseMode};
use filter::{PreFilter, RejectReason};
use policy::{Action, DecisionPolicy};
use profile::StrategyProfile;
use scorer::{ScoreResult, Scorer};

// ---------------------------------------------------------------------------
// Pipeline output
// ---------------------------------------------------------------------------

/// A snapshot that survived the pre-filter, with its score and action.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub snapshot: ItemSnapshot,
    pub score: ScoreResult,
    pub action: Action,
}

/// A snapshot the pre-filter turned away.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub item_id: u64,
    pub reasons: Vec<RejectReason>,
}

/// Everything one evaluation pass produced.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Scored candidates, best first.
    pub candidates: Vec<Candidate>,
    pub rejections: Vec<Rejection>,
}

impl Evaluation {
    pub fn scored(&self) -> usize {
        self.candidates.len()
    }

    /// Candidates whose action is not `Ignore`.
    pub fn actionable(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| c.action != Action::Ignore)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Pre-filter → score → rank → decide.
///
/// Pure: the engine hands in one cycle's snapshots together with the
/// settings it read at the top of the cycle and gets back an ordered
/// worklist. Budget and execution happen downstream.
pub struct StrategyPipeline;

impl StrategyPipeline {
    pub fn evaluate(
        snapshots: Vec<ItemSnapshot>,
        profile: &StrategyProfile,
        mode: PurchaseMode,
        threshold: u8,
    ) -> Evaluation {
        let scanned = snapshots.len();
        let mut evaluation = Evaluation::default();

        for snapshot in snapshots {
            let reasons = PreFilter::rejections(&snapshot, profile);
            if !reasons.is_empty() {
                debug!(
                    item_id = snapshot.item_id,
                    reasons = ?reasons,
                    "Pre-filter rejected"
                );
                evaluation.rejections.push(Rejection { item_id: snapshot.item_id, reasons });
                continue;
            }

            let score = Scorer::score(&snapshot, profile);
            let action = DecisionPolicy::decide(score.total, score.tier, mode, threshold);
            debug!(
                item_id = snapshot.item_id,
                score = format!("{:.1}", score.total),
                tier = %score.tier,
                action = %action,
                "Scored"
            );
            evaluation.candidates.push(Candidate { snapshot, score, action });
        }

        // Best score first; on ties the cheaper listing goes first so the
        // remaining budget covers more candidates.
        evaluation.candidates.sort_by(|a, b| {
            b.score
                .total
                .total_cmp(&a.score.total)
                .then(a.snapshot.listing_price.cmp(&b.snapshot.listing_price))
        });

        info!(
            scanned,
            rejected = evaluation.rejections.len(),
            scored = evaluation.scored(),
            actionable = evaluation.actionable().count(),
            strategy = %profile.name,
            "Evaluation complete"
        );

        evaluation
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Demand, ScoreTier, Trend};

    fn snap(item_id: u64, listing_price: u64) -> ItemSnapshot {
        ItemSnapshot { item_id, listing_price, ..ItemSnapshot::sample() }
    }

    #[test]
    fn test_empty_input() {
        let eval = StrategyPipeline::evaluate(
            Vec::new(),
            &StrategyProfile::default(),
            PurchaseMode::FullAuto,
            70,
        );
        assert!(eval.candidates.is_empty());
        assert!(eval.rejections.is_empty());
    }

    #[test]
    fn test_projected_never_scored() {
        let projected = ItemSnapshot { projected: true, ..snap(1, 400) };
        let eval = StrategyPipeline::evaluate(
            vec![projected],
            &StrategyProfile::default(),
            PurchaseMode::FullAuto,
            70,
        );
        assert_eq!(eval.scored(), 0);
        assert_eq!(eval.rejections.len(), 1);
        assert_eq!(eval.rejections[0].reasons, vec![RejectReason::Projected]);
    }

    #[test]
    fn test_sorted_by_score_then_price() {
        let strong = ItemSnapshot { demand: Demand::Amazing, ..snap(1, 400) };
        // Discount saturates at 75% off on quick flip, so these two tie.
        let cheap = snap(2, 200);
        let cheaper = snap(3, 100);
        let eval = StrategyPipeline::evaluate(
            vec![cheap, strong, cheaper],
            &StrategyProfile::default(),
            PurchaseMode::FullAuto,
            70,
        );

        let ids: Vec<u64> = eval.candidates.iter().map(|c| c.snapshot.item_id).collect();
        assert_eq!(eval.candidates[0].score.total, eval.candidates[1].score.total);
        assert!(eval.candidates[1].score.total > eval.candidates[2].score.total);
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_actions_follow_mode() {
        let eval = StrategyPipeline::evaluate(
            vec![snap(1, 400)],
            &StrategyProfile::default(),
            PurchaseMode::Hybrid,
            70,
        );
        assert_eq!(eval.candidates[0].score.tier, ScoreTier::Good);
        assert_eq!(eval.candidates[0].action, Action::Alert);

        let eval = StrategyPipeline::evaluate(
            vec![snap(1, 400)],
            &StrategyProfile::default(),
            PurchaseMode::FullAuto,
            70,
        );
        assert_eq!(eval.candidates[0].action, Action::AutoBuy);
    }

    #[test]
    fn test_actionable_skips_ignored() {
        let weak = ItemSnapshot {
            demand: Demand::Low,
            trend: Trend::Fluctuating,
            sales_90d: 2,
            ..snap(9, 750)
        };
        let eval = StrategyPipeline::evaluate(
            vec![weak],
            &StrategyProfile::default(),
            PurchaseMode::FullAuto,
            70,
        );
        assert_eq!(eval.scored(), 1);
        assert_eq!(eval.actionable().count(), 0);
    }
}
