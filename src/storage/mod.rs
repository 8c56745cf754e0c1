//! Persistence layer.
//!
//! Two concerns live here:
//! - the decision journal (`Recorder`), append-only, one line per decision;
//! - the per-session budget ledger (`SessionStore`), saved as JSON after
//!   every cycle that spent money so spend survives restarts.

pub mod journal;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::engine::guard::{Denial, LedgerSnapshot};
use crate::strategy::policy::Action;
use crate::types::{validate_session_id, PurchaseMode, PurchaseReceipt, Robux, ScoreTier};

pub use journal::{JsonlRecorder, MemoryRecorder};

// ---------------------------------------------------------------------------
// Decision records
// ---------------------------------------------------------------------------

/// What finally happened to a scored candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Ignored,
    Alerted,
    /// Refused by the budget & rate guard.
    BudgetDenied { denial: Denial },
    Filled { receipt: PurchaseReceipt },
    Stale,
    ExternalFailure { reason: String },
    /// Engine left Running before the buy could start.
    Cancelled,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Ignored => "ignored",
            Outcome::Alerted => "alerted",
            Outcome::BudgetDenied { .. } => "budget_denied",
            Outcome::Filled { .. } => "filled",
            Outcome::Stale => "stale",
            Outcome::ExternalFailure { .. } => "external_failure",
            Outcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub session_id: String,
    pub item_id: u64,
    pub item_name: String,
    pub listing_price: Robux,
    pub score: f64,
    pub tier: ScoreTier,
    pub action: Action,
    pub strategy: String,
    pub mode: PurchaseMode,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

/// Append-only sink for decisions. Failures are logged by the caller and
/// never fail a cycle.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn record(&self, record: &DecisionRecord) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Ledger store
// ---------------------------------------------------------------------------

/// Read/write contract for per-session ledger state.
pub trait SessionStore: Send + Sync {
    /// `None` when the session has never been saved.
    fn load(&self, session_id: &str) -> Result<Option<LedgerSnapshot>>;
    fn save(&self, session_id: &str, ledger: &LedgerSnapshot) -> Result<()>;
    fn delete(&self, session_id: &str) -> Result<()>;
}

/// One JSON file per session under a state directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Ids are used verbatim, so distinct sessions never share a file.
    fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}_ledger.json")))
    }
}

impl SessionStore for JsonFileStore {
    fn load(&self, session_id: &str) -> Result<Option<LedgerSnapshot>> {
        let path = self.path_for(session_id)?;
        load_ledger(&path)
    }

    fn save(&self, session_id: &str, ledger: &LedgerSnapshot) -> Result<()> {
        let path = self.path_for(session_id)?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state dir {}", self.dir.display()))?;
        save_ledger(ledger, &path)
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id)?;
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete ledger {}", path.display()))?;
        }
        Ok(())
    }
}

/// Save a ledger snapshot to a JSON file.
pub fn save_ledger(ledger: &LedgerSnapshot, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(ledger).context("Failed to serialise ledger")?;

    std::fs::write(path, &json)
        .with_context(|| format!("Failed to write ledger to {}", path.display()))?;

    debug!(path = %path.display(), total_spent = ledger.total_spent, "Ledger saved");
    Ok(())
}

/// Load a ledger snapshot. Returns `None` if the file doesn't exist.
pub fn load_ledger(path: &Path) -> Result<Option<LedgerSnapshot>> {
    if !path.exists() {
        info!(path = %path.display(), "No saved ledger found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ledger from {}", path.display()))?;

    let ledger: LedgerSnapshot = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse ledger from {}", path.display()))?;

    info!(
        path = %path.display(),
        total_spent = ledger.total_spent,
        purchases = ledger.entries.len(),
        "Ledger loaded from disk"
    );

    Ok(Some(ledger))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::guard::LedgerEntry;

    fn temp_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("risniper_test_state_{}", uuid::Uuid::new_v4()));
        p
    }

    fn ledger() -> LedgerSnapshot {
        LedgerSnapshot {
            total_spent: 780,
            entries: vec![
                LedgerEntry { item_id: 1, price: 400, at: Utc::now() },
                LedgerEntry { item_id: 2, price: 380, at: Utc::now() },
            ],
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = temp_dir();
        let store = JsonFileStore::new(&dir);
        let saved = ledger();
        store.save("guild-1", &saved).unwrap();

        let loaded = store.load("guild-1").unwrap().unwrap();
        assert_eq!(loaded, saved);

        store.delete("guild-1").unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_missing_session() {
        let store = JsonFileStore::new(temp_dir());
        assert!(store.load("nobody").unwrap().is_none());
    }

    #[test]
    fn test_sessions_are_separate_files() {
        let dir = temp_dir();
        let store = JsonFileStore::new(&dir);
        store.save("a", &ledger()).unwrap();
        store.save("b", &LedgerSnapshot::default()).unwrap();

        assert_eq!(store.load("a").unwrap().unwrap().total_spent, 780);
        assert_eq!(store.load("b").unwrap().unwrap().total_spent, 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_nonconforming_session_id_rejected() {
        let store = JsonFileStore::new("/tmp/x");
        assert_eq!(
            store.path_for("guild-1").unwrap(),
            PathBuf::from("/tmp/x/guild-1_ledger.json")
        );
        for id in ["../../etc/passwd", "a/b", "a.b"] {
            assert!(store.path_for(id).is_err(), "{id}");
            assert!(store.save(id, &LedgerSnapshot::default()).is_err(), "{id}");
        }
        assert_ne!(store.path_for("a_b").unwrap(), store.path_for("a-b").unwrap());
    }

    #[test]
    fn test_delete_nonexistent_ok() {
        let store = JsonFileStore::new(temp_dir());
        assert!(store.delete("ghost").is_ok());
    }

    #[test]
    fn test_corrupt_ledger_errors() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let store = JsonFileStore::new(&dir);
        std::fs::write(store.path_for("bad").unwrap(), "{not json").unwrap();
        assert!(store.load("bad").is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_outcome_json_shape() {
        let record = DecisionRecord {
            session_id: "s".into(),
            item_id: 1,
            item_name: "Cap".into(),
            listing_price: 400,
            score: 83.0,
            tier: ScoreTier::Good,
            action: Action::AutoBuy,
            strategy: "quick_flip".into(),
            mode: PurchaseMode::FullAuto,
            outcome: Outcome::BudgetDenied {
                denial: Denial::TotalBudget { price: 400, remaining: 399 },
            },
            timestamp: Utc::now(),
        };
        let v: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(v["outcome"], "budget_denied");
        assert_eq!(v["denial"]["kind"], "total_budget");
        assert_eq!(v["action"], "auto_buy");
        assert_eq!(record.outcome.label(), "budget_denied");
    }
}
