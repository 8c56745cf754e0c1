//! Shared types for the RISNIPER engine.
//!
//! These types form the data model used across all modules. Market
//! attributes arrive as `ItemSnapshot`s, get classified with the enums
//! below, and leave the engine as `PurchaseReceipt`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Robux amounts are whole numbers; prices, values and budgets all use this.
pub type Robux = u64;

// ---------------------------------------------------------------------------
// Market classification enums
// ---------------------------------------------------------------------------

/// Ordinal demand classification of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Demand {
    None,
    Terrible,
    Low,
    Normal,
    High,
    Amazing,
}

impl Demand {
    /// All tiers, lowest first.
    pub const ALL: &'static [Demand] = &[
        Demand::None,
        Demand::Terrible,
        Demand::Low,
        Demand::Normal,
        Demand::High,
        Demand::Amazing,
    ];

    /// Position on the six-step ladder (0 = none, 5 = amazing).
    pub fn step(&self) -> u8 {
        match self {
            Demand::None => 0,
            Demand::Terrible => 1,
            Demand::Low => 2,
            Demand::Normal => 3,
            Demand::High => 4,
            Demand::Amazing => 5,
        }
    }
}

impl fmt::Display for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Demand::None => write!(f, "None"),
            Demand::Terrible => write!(f, "Terrible"),
            Demand::Low => write!(f, "Low"),
            Demand::Normal => write!(f, "Normal"),
            Demand::High => write!(f, "High"),
            Demand::Amazing => write!(f, "Amazing"),
        }
    }
}

/// Direction the item's value has been moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Lowering,
    Stable,
    Rising,
    Fluctuating,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Lowering => write!(f, "Lowering"),
            Trend::Stable => write!(f, "Stable"),
            Trend::Rising => write!(f, "Rising"),
            Trend::Fluctuating => write!(f, "Fluctuating"),
        }
    }
}

/// How a strategy treats user-generated (UGC) limiteds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UgcPolicy {
    /// UGC items are treated like classics, no age gate.
    Allow,
    /// UGC items are never admitted.
    Deny,
    /// UGC items past the age gate are admitted with a score penalty.
    Penalize,
}

impl fmt::Display for UgcPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UgcPolicy::Allow => write!(f, "allow"),
            UgcPolicy::Deny => write!(f, "deny"),
            UgcPolicy::Penalize => write!(f, "penalize"),
        }
    }
}

impl std::str::FromStr for UgcPolicy {
    type Err = SniperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" | "include" => Ok(UgcPolicy::Allow),
            "deny" | "exclude" => Ok(UgcPolicy::Deny),
            "penalize" | "penalise" => Ok(UgcPolicy::Penalize),
            _ => Err(SniperError::Config(format!("Unknown UGC policy: {s}"))),
        }
    }
}

/// What the engine is allowed to do with a good candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseMode {
    /// Never buy; every worthwhile candidate becomes an operator alert.
    AlertConfirm,
    /// Buy GOOD and EXCELLENT candidates without asking.
    FullAuto,
    /// Buy EXCELLENT candidates, alert on the rest.
    Hybrid,
}

impl fmt::Display for PurchaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseMode::AlertConfirm => write!(f, "alert_confirm"),
            PurchaseMode::FullAuto => write!(f, "full_auto"),
            PurchaseMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for PurchaseMode {
    type Err = SniperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "alert" | "alert_confirm" | "confirm" => Ok(PurchaseMode::AlertConfirm),
            "auto" | "full_auto" => Ok(PurchaseMode::FullAuto),
            "hybrid" => Ok(PurchaseMode::Hybrid),
            _ => Err(SniperError::Config(format!("Unknown purchase mode: {s}"))),
        }
    }
}

/// Banded classification of a 0–100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreTier {
    Excellent,
    Good,
    Risky,
    Reject,
}

impl ScoreTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            ScoreTier::Excellent
        } else if score >= 70.0 {
            ScoreTier::Good
        } else if score >= 50.0 {
            ScoreTier::Risky
        } else {
            ScoreTier::Reject
        }
    }
}

impl fmt::Display for ScoreTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreTier::Excellent => write!(f, "EXCELLENT"),
            ScoreTier::Good => write!(f, "GOOD"),
            ScoreTier::Risky => write!(f, "RISKY"),
            ScoreTier::Reject => write!(f, "REJECT"),
        }
    }
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Idle,
    Running,
    Paused,
    Stopped,
    /// Fatal stop after repeated purchase failures; needs a manual start.
    Halted,
}

impl Lifecycle {
    /// Whether the engine may start from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Lifecycle::Idle | Lifecycle::Stopped | Lifecycle::Halted)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Idle => write!(f, "⚪ IDLE"),
            Lifecycle::Running => write!(f, "🟢 RUNNING"),
            Lifecycle::Paused => write!(f, "🟡 PAUSED"),
            Lifecycle::Stopped => write!(f, "⚫ STOPPED"),
            Lifecycle::Halted => write!(f, "🔴 HALTED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Item snapshot
// ---------------------------------------------------------------------------

/// Market attributes of one listed item, fetched once per poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub item_id: u64,
    #[serde(default)]
    pub name: String,
    /// Curated value.
    pub value: Robux,
    /// Recent average price.
    pub rap: Robux,
    pub demand: Demand,
    pub trend: Trend,
    #[serde(default)]
    pub projected: bool,
    #[serde(default)]
    pub rare: bool,
    #[serde(default)]
    pub hyped: bool,
    /// Cheapest current resale listing.
    pub listing_price: Robux,
    /// How long the listing has been up, in days.
    #[serde(default)]
    pub listing_age_days: u32,
    pub copies_remaining: u32,
    /// Sales in the trailing 90 days.
    pub sales_90d: u32,
    #[serde(default)]
    pub is_ugc: bool,
    #[serde(default)]
    pub ugc_age_days: u32,
}

impl fmt::Display for ItemSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) R${} vs value R${} ({:.1}% off) | demand={} trend={}",
            self.name,
            self.item_id,
            self.listing_price,
            self.value,
            self.discount_ratio() * 100.0,
            self.demand,
            self.trend,
        )
    }
}

impl ItemSnapshot {
    /// `(value - listing_price) / value`, negative when listed above value.
    /// Zero when the item has no value.
    pub fn discount_ratio(&self) -> f64 {
        if self.value == 0 {
            return 0.0;
        }
        (self.value as f64 - self.listing_price as f64) / self.value as f64
    }

    /// `|value - rap| / value`. `None` when the item has no value.
    pub fn rap_deviation(&self) -> Option<f64> {
        if self.value == 0 {
            return None;
        }
        Some((self.value as f64 - self.rap as f64).abs() / self.value as f64)
    }

    /// A healthy GOOD-tier candidate for tests.
    #[cfg(test)]
    pub fn sample() -> Self {
        ItemSnapshot {
            item_id: 1028606,
            name: "Red Baseball Cap".to_string(),
            value: 1000,
            rap: 950,
            demand: Demand::High,
            trend: Trend::Stable,
            projected: false,
            rare: false,
            hyped: false,
            listing_price: 400,
            listing_age_days: 1,
            copies_remaining: 20,
            sales_90d: 50,
            is_ugc: false,
            ugc_age_days: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Purchase receipt
// ---------------------------------------------------------------------------

/// Proof of a filled purchase, handed to the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub receipt_id: String,
    pub item_id: u64,
    /// Price actually paid.
    pub price: Robux,
    /// Ceiling the guard approved.
    pub authorized_price: Robux,
    pub dry_run: bool,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for PurchaseReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.dry_run { "[DRY RUN] " } else { "" };
        write!(
            f,
            "{tag}item {} bought for R${} (authorized R${}) [{}]",
            self.item_id, self.price, self.authorized_price, self.receipt_id,
        )
    }
}

impl PurchaseReceipt {
    pub fn new(item_id: u64, price: Robux, authorized_price: Robux, dry_run: bool) -> Self {
        let prefix = if dry_run { "dry-run" } else { "buy" };
        Self {
            receipt_id: format!("{prefix}-{}", uuid::Uuid::new_v4()),
            item_id,
            price,
            authorized_price,
            dry_run,
            timestamp: Utc::now(),
        }
    }

    /// Robux kept under the authorized ceiling.
    pub fn savings(&self) -> Robux {
        self.authorized_price.saturating_sub(self.price)
    }
}

// ---------------------------------------------------------------------------
// Session ids
// ---------------------------------------------------------------------------

pub const MAX_SESSION_ID_LEN: usize = 64;

/// Session ids name ledger files, so only `[A-Za-z0-9_-]{1,64}` is accepted.
pub fn validate_session_id(id: &str) -> Result<(), SniperError> {
    let conforming = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if conforming {
        Ok(())
    } else {
        Err(SniperError::Config(format!(
            "session id {id:?} must be 1-{MAX_SESSION_ID_LEN} characters of [A-Za-z0-9_-]"
        )))
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for RISNIPER.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SniperError {
    #[error("Snapshot source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Purchase error (item {item_id}): {message}")]
    Purchase { item_id: u64, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot {action} while engine is {from:?}")]
    InvalidTransition { action: &'static str, from: Lifecycle },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No pending alert for item {0}")]
    NoPendingAlert(u64),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
