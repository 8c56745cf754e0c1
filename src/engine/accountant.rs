//! Accountant: per-cycle tallies and session statistics.
//!
//! The engine fills a `CycleTally` as it works through a cycle and hands it
//! to `Accountant::reconcile` at the end, which folds it into the session's
//! `EngineStats` and returns a `CycleReport` for logging.
//!
//! The failure streak is not part of the tally. It lives only in
//! `EngineStats` and is moved by `Accountant::observe` as each purchase
//! finishes, so cycles and operator confirms never overwrite each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::Outcome;
use crate::types::Robux;

// ---------------------------------------------------------------------------
// Session statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub items_scanned: u64,
    pub items_rejected: u64,
    pub items_scored: u64,
    /// Candidates whose action was not `Ignore`.
    pub opportunities: u64,
    pub alerts_sent: u64,
    pub purchases_attempted: u64,
    pub purchases_filled: u64,
    pub purchases_stale: u64,
    pub purchases_failed: u64,
    pub budget_denials: u64,
    pub cancelled: u64,
    pub total_spent: Robux,
    /// External purchase failures since the last fill.
    pub consecutive_failures: u32,
    pub last_failure: Option<String>,
    pub last_scan_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Cycle tally
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleTally {
    pub scanned: usize,
    pub rejected: usize,
    pub scored: usize,
    pub opportunities: usize,
    pub alerts_sent: usize,
    pub attempted: usize,
    pub filled: usize,
    pub stale: usize,
    pub failed: usize,
    pub denied: usize,
    pub cancelled: usize,
    pub spent: Robux,
    pub last_failure: Option<String>,
}

impl CycleTally {
    /// Count one decision outcome.
    pub fn observe(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Ignored => {}
            Outcome::Alerted => self.alerts_sent += 1,
            Outcome::BudgetDenied { .. } => self.denied += 1,
            Outcome::Cancelled => self.cancelled += 1,
            Outcome::Filled { receipt } => {
                self.attempted += 1;
                self.filled += 1;
                self.spent += receipt.price;
            }
            Outcome::Stale => {
                self.attempted += 1;
                self.stale += 1;
            }
            Outcome::ExternalFailure { reason } => {
                self.attempted += 1;
                self.failed += 1;
                self.last_failure = Some(reason.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub tally: CycleTally,
    pub session_spent: Robux,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Fold a finished cycle into the session stats.
    pub fn reconcile(stats: &mut EngineStats, tally: CycleTally) -> CycleReport {
        stats.cycles += 1;
        Self::absorb(stats, &tally);

        let now = Utc::now();
        stats.last_scan_at = Some(now);

        if tally.failed > 0 {
            warn!(
                failed = tally.failed,
                consecutive = stats.consecutive_failures,
                last_error = tally.last_failure.as_deref().unwrap_or(""),
                "Purchase failures this cycle"
            );
        }

        let report = CycleReport {
            cycle_number: stats.cycles,
            session_spent: stats.total_spent,
            tally,
            timestamp: now,
        };

        info!(
            cycle = report.cycle_number,
            scanned = report.tally.scanned,
            scored = report.tally.scored,
            alerts = report.tally.alerts_sent,
            filled = report.tally.filled,
            spent = report.tally.spent,
            session_spent = report.session_spent,
            "Cycle reconciled"
        );

        report
    }

    /// Add a tally's counters without counting a cycle.
    pub fn absorb(stats: &mut EngineStats, tally: &CycleTally) {
        stats.items_scanned += tally.scanned as u64;
        stats.items_rejected += tally.rejected as u64;
        stats.items_scored += tally.scored as u64;
        stats.opportunities += tally.opportunities as u64;
        stats.alerts_sent += tally.alerts_sent as u64;
        stats.purchases_attempted += tally.attempted as u64;
        stats.purchases_filled += tally.filled as u64;
        stats.purchases_stale += tally.stale as u64;
        stats.purchases_failed += tally.failed as u64;
        stats.budget_denials += tally.denied as u64;
        stats.cancelled += tally.cancelled as u64;
        stats.total_spent += tally.spent;
    }

    /// Move the failure streak for one finished decision. Returns the streak.
    pub fn observe(stats: &mut EngineStats, outcome: &Outcome) -> u32 {
        match outcome {
            Outcome::Filled { .. } => stats.consecutive_failures = 0,
            Outcome::ExternalFailure { reason } => {
                stats.consecutive_failures += 1;
                stats.last_failure = Some(reason.clone());
            }
            _ => {}
        }
        stats.consecutive_failures
    }

    /// Count a cycle skipped because the source was unavailable.
    pub fn skip(stats: &mut EngineStats) {
        stats.skipped_cycles += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
