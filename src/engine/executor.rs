//! Purchase executor.
//!
//! Turns a budget reservation into a purchase. The listing is re-checked
//! right before every purchase attempt; a vanished or repriced listing is
//! `Stale`, which is expected and never retried. Network calls carry a
//! timeout. Listing lookups retry with exponential backoff; a purchase is
//! resubmitted only when upstream never processed it. Only a fill commits
//! the reservation; every other path releases it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::guard::Reservation;
use crate::market::{PurchaseResponse, PurchaseSurface};
use crate::types::{PurchaseReceipt, Robux};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Filled(PurchaseReceipt),
    /// Listing gone or repriced above the authorized price.
    Stale,
    /// Upstream refused or kept failing after retries.
    ExternalFailure(String),
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::ExternalFailure(_))
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub dry_run: bool,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            dry_run: true,
            timeout: Duration::from_secs(10),
            max_retries: 2,
            backoff_ms: 500,
        }
    }
}

pub struct Executor {
    /// `None` is only valid in dry-run mode.
    surface: Option<Arc<dyn PurchaseSurface>>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(surface: Option<Arc<dyn PurchaseSurface>>, settings: ExecutorSettings) -> Self {
        Self { surface, settings }
    }

    pub fn is_dry_run(&self) -> bool {
        self.settings.dry_run
    }

    /// Run one purchase attempt against an authorized reservation.
    pub async fn execute(&self, reservation: Reservation) -> ExecutionOutcome {
        let item_id = reservation.item_id();
        let ceiling = reservation.price();

        if self.settings.dry_run {
            info!(item_id, price = ceiling, "[DRY RUN] Would buy");
            reservation.commit(ceiling);
            return ExecutionOutcome::Filled(PurchaseReceipt::new(item_id, ceiling, ceiling, true));
        }

        let Some(surface) = self.surface.clone() else {
            warn!(item_id, "No purchase surface configured");
            reservation.release();
            return ExecutionOutcome::ExternalFailure("no purchase surface configured".into());
        };
        let mut attempt = 0;
        let response = loop {
            if let Err(outcome) = self.confirm_listing(&surface, item_id, ceiling).await {
                reservation.release();
                return outcome;
            }

            match tokio::time::timeout(self.settings.timeout, surface.attempt_purchase(item_id, ceiling)).await {
                Ok(Ok(response)) => break response,
                Ok(Err(e)) if e.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(item_id, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Purchase not submitted, retrying");
                    tokio::time::sleep(delay).await;
                }
                Ok(Err(e)) => {
                    warn!(item_id, attempt, error = %e, "Purchase failed");
                    reservation.release();
                    return ExecutionOutcome::ExternalFailure(e.to_string());
                }
                Err(_) => {
                    warn!(item_id, timeout = ?self.settings.timeout, "Purchase timed out, outcome unknown; not resubmitting");
                    reservation.release();
                    return ExecutionOutcome::ExternalFailure("purchase timed out, outcome unknown".into());
                }
            }
        };

        match response {
            PurchaseResponse::Filled { price } => {
                reservation.commit(price);
                let receipt = PurchaseReceipt::new(item_id, price, ceiling, false);
                info!(
                    item_id,
                    price,
                    saved = receipt.savings(),
                    receipt = %receipt.receipt_id,
                    "Purchase filled"
                );
                ExecutionOutcome::Filled(receipt)
            }
            PurchaseResponse::Stale => {
                info!(item_id, "Purchase lost the race");
                reservation.release();
                ExecutionOutcome::Stale
            }
            PurchaseResponse::Rejected { reason } => {
                warn!(item_id, reason = %reason, "Purchase rejected");
                reservation.release();
                ExecutionOutcome::ExternalFailure(reason)
            }
        }
    }

    /// Re-check the listing right before a purchase attempt.
    async fn confirm_listing(
        &self,
        surface: &Arc<dyn PurchaseSurface>,
        item_id: u64,
        ceiling: Robux,
    ) -> Result<(), ExecutionOutcome> {
        let listing = self
            .with_retry("listing check", item_id, || {
                let surface = Arc::clone(surface);
                async move { surface.current_listing(item_id).await }
            })
            .await;

        match listing {
            Err(reason) => Err(ExecutionOutcome::ExternalFailure(reason)),
            Ok(None) => {
                info!(item_id, "Listing gone before purchase");
                Err(ExecutionOutcome::Stale)
            }
            Ok(Some(price)) if price > ceiling => {
                info!(item_id, price, ceiling, "Listing repriced above authorized price");
                Err(ExecutionOutcome::Stale)
            }
            Ok(Some(price)) => {
                debug!(item_id, price, ceiling, "Listing still valid");
                Ok(())
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.settings.backoff_ms.saturating_mul(factor))
    }

    /// Call with timeout, retrying any error with backoff. Read-only calls only.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, item_id: u64, mut call: F) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                debug!(op, item_id, attempt, delay_ms = delay.as_millis() as u64, "Retrying");
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.settings.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!(op, item_id, attempt, error = %e, "Transient purchase-surface error");
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    warn!(op, item_id, attempt, timeout = ?self.settings.timeout, "Purchase-surface call timed out");
                    last_error = Some(format!("{op} timed out"));
                }
            }
        }

        Err(format!(
            "{op} failed after {} retries: {}",
            self.settings.max_retries,
            last_error.unwrap_or_default()
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
