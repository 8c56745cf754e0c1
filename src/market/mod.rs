//! Market collaborators.
//!
//! The engine reads snapshots through `SnapshotSource` and buys through
//! `PurchaseSurface`. Both are traits so sessions can run against the live
//! HTTP backends or an in-memory market in tests.

pub mod feed;
pub mod purchase;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{ItemSnapshot, Robux};

pub use feed::FeedClient;
pub use purchase::HttpPurchaseSurface;

/// Supplies the current market state, one batch per poll cycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshots(&self) -> Result<Vec<ItemSnapshot>>;
}

/// Upstream answer to a purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseResponse {
    /// Bought at `price`.
    Filled { price: Robux },
    /// Listing gone or repriced above the ceiling.
    Stale,
    /// Definitive refusal; retrying will not help.
    Rejected { reason: String },
}

/// A purchase attempt that produced no definitive answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PurchaseError {
    /// Upstream never processed the request (connect failure, 429, 5xx).
    /// Resubmitting cannot buy a second copy.
    #[error("purchase not submitted: {0}")]
    NotSubmitted(String),
    /// The request may have gone through. Never resubmit.
    #[error("purchase outcome unknown: {0}")]
    Ambiguous(String),
}

impl PurchaseError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PurchaseError::NotSubmitted(_))
    }
}

/// Where purchases are placed.
///
/// A listing lookup is read-only, so any `Err` from it may be retried.
/// Purchases are not idempotent: only `PurchaseError::NotSubmitted` is
/// safe to retry. Definitive outcomes come back as `Ok`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PurchaseSurface: Send + Sync {
    /// Cheapest live listing price, or `None` when nothing is listed.
    async fn current_listing(&self, item_id: u64) -> Result<Option<Robux>>;

    async fn attempt_purchase(
        &self,
        item_id: u64,
        max_price: Robux,
    ) -> std::result::Result<PurchaseResponse, PurchaseError>;
}
