//! Budget & rate guard.
//!
//! Every auto-buy must hold a `Reservation` before the executor may touch
//! the purchase surface. Reserving, committing and releasing all happen
//! under one mutex, and the lock is never held across an await, so two
//! concurrent buyers can never both spend the last of the budget.
//!
//! The kill switch is `disarm`: it flips a flag under the same lock, so once
//! it returns no further authorization can succeed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::types::{Robux, SniperError};

/// Length of the sliding purchase-rate window.
const RATE_WINDOW: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub max_price_per_item: Robux,
    pub total_budget: Robux,
    pub max_purchases_per_hour: u32,
    pub cooldown_secs: u64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_price_per_item: 10_000,
            total_budget: 50_000,
            max_purchases_per_hour: 10,
            cooldown_secs: 30,
        }
    }
}

impl BudgetLimits {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn validate(&self) -> Result<(), SniperError> {
        if self.max_price_per_item == 0 {
            return Err(SniperError::Config("max_price_per_item must be positive".into()));
        }
        if self.total_budget == 0 {
            return Err(SniperError::Config("total_budget must be positive".into()));
        }
        if self.max_price_per_item > self.total_budget {
            return Err(SniperError::Config(format!(
                "max_price_per_item (R${}) exceeds total_budget (R${})",
                self.max_price_per_item, self.total_budget
            )));
        }
        if self.max_purchases_per_hour == 0 {
            return Err(SniperError::Config("max_purchases_per_hour must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Denials
// ---------------------------------------------------------------------------

/// Why an authorization was refused. A policy outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Denial {
    #[error("guard disarmed")]
    Disarmed,

    #[error("price R${price} exceeds per-item cap R${cap}")]
    ItemCap { price: Robux, cap: Robux },

    #[error("price R${price} exceeds remaining budget R${remaining}")]
    TotalBudget { price: Robux, remaining: Robux },

    #[error("hourly limit of {max} purchases reached")]
    HourlyLimit { max: u32 },

    #[error("cooldown active for another {remaining_secs}s")]
    Cooldown { remaining_secs: u64 },

    #[error("another purchase is still in flight")]
    InFlight,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// One committed purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub item_id: u64,
    pub price: Robux,
    pub at: DateTime<Utc>,
}

/// Persisted form of the ledger. Limits come from config, not from here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub total_spent: Robux,
    pub entries: Vec<LedgerEntry>,
}

/// Read-only view for `status()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub max_price_per_item: Robux,
    pub total_budget: Robux,
    pub total_spent: Robux,
    pub reserved: Robux,
    pub remaining: Robux,
    pub purchases_last_hour: u32,
    pub max_purchases_per_hour: u32,
    pub remaining_this_hour: u32,
    pub cooldown_remaining_secs: u64,
    pub last_purchase_at: Option<DateTime<Utc>>,
    pub armed: bool,
}

struct BudgetLedger {
    limits: BudgetLimits,
    total_spent: Robux,
    reserved: Robux,
    in_flight: u32,
    /// Commit instants inside the rate window, oldest first.
    recent: VecDeque<Instant>,
    entries: Vec<LedgerEntry>,
    last_purchase: Option<Instant>,
    armed: bool,
}

impl BudgetLedger {
    fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            total_spent: 0,
            reserved: 0,
            in_flight: 0,
            recent: VecDeque::new(),
            entries: Vec::new(),
            last_purchase: None,
            armed: true,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.recent.front() {
            if now.duration_since(*front) >= RATE_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn remaining(&self) -> Robux {
        self.limits
            .total_budget
            .saturating_sub(self.total_spent.saturating_add(self.reserved))
    }

    fn cooldown_remaining(&self, now: Instant) -> Duration {
        match self.last_purchase {
            Some(last) => self.limits.cooldown().saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        }
    }

    fn check(&mut self, price: Robux, now: Instant) -> Result<(), Denial> {
        if !self.armed {
            return Err(Denial::Disarmed);
        }
        if price > self.limits.max_price_per_item {
            return Err(Denial::ItemCap { price, cap: self.limits.max_price_per_item });
        }
        let remaining = self.remaining();
        if price > remaining {
            return Err(Denial::TotalBudget { price, remaining });
        }

        self.prune(now);
        let used = self.recent.len() as u32 + self.in_flight;
        if used >= self.limits.max_purchases_per_hour {
            return Err(Denial::HourlyLimit { max: self.limits.max_purchases_per_hour });
        }

        let cooldown = self.cooldown_remaining(now);
        if !cooldown.is_zero() {
            return Err(Denial::Cooldown {
                remaining_secs: cooldown.as_secs_f64().ceil() as u64,
            });
        }
        // A second concurrent buy would dodge the cooldown of the first.
        if self.limits.cooldown_secs > 0 && self.in_flight > 0 {
            return Err(Denial::InFlight);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

pub struct BudgetGuard {
    ledger: Mutex<BudgetLedger>,
}

impl BudgetGuard {
    pub fn new(limits: BudgetLimits) -> Arc<Self> {
        Arc::new(Self { ledger: Mutex::new(BudgetLedger::new(limits)) })
    }

    /// Rebuild a guard from a persisted ledger. Entries younger than the rate
    /// window count against the hourly limit and the cooldown again.
    pub fn restore(limits: BudgetLimits, snapshot: LedgerSnapshot) -> Arc<Self> {
        let mut ledger = BudgetLedger::new(limits);
        let now = Instant::now();
        let wall_now = Utc::now();

        for entry in &snapshot.entries {
            let Ok(age) = (wall_now - entry.at).to_std() else {
                continue;
            };
            if age >= RATE_WINDOW {
                continue;
            }
            if let Some(at) = now.checked_sub(age) {
                ledger.recent.push_back(at);
                ledger.last_purchase = Some(at);
            }
        }

        ledger.total_spent = snapshot.total_spent;
        ledger.entries = snapshot.entries;

        info!(
            total_spent = ledger.total_spent,
            entries = ledger.entries.len(),
            in_window = ledger.recent.len(),
            "Budget ledger restored"
        );
        Arc::new(Self { ledger: Mutex::new(ledger) })
    }

    /// Reserve `price` for `item_id` or explain why not.
    pub fn authorize(self: &Arc<Self>, item_id: u64, price: Robux) -> Result<Reservation, Denial> {
        let mut ledger = self.ledger.lock();
        if let Err(denial) = ledger.check(price, Instant::now()) {
            debug!(item_id, price, reason = %denial, "Authorization denied");
            return Err(denial);
        }

        ledger.reserved += price;
        ledger.in_flight += 1;
        debug!(item_id, price, reserved = ledger.reserved, "Budget reserved");

        Ok(Reservation {
            guard: Arc::clone(self),
            item_id,
            price,
            settled: false,
        })
    }

    fn release_reserved(&self, reserved_price: Robux) {
        let mut ledger = self.ledger.lock();
        ledger.reserved = ledger.reserved.saturating_sub(reserved_price);
        ledger.in_flight = ledger.in_flight.saturating_sub(1);
    }

    fn commit_reserved(&self, reserved_price: Robux, item_id: u64, price: Robux) -> LedgerEntry {
        if price > reserved_price {
            warn!(item_id, price, reserved_price, "Fill price above authorized price");
        }
        let mut ledger = self.ledger.lock();
        ledger.reserved = ledger.reserved.saturating_sub(reserved_price);
        ledger.in_flight = ledger.in_flight.saturating_sub(1);

        let now = Instant::now();
        let entry = LedgerEntry { item_id, price, at: Utc::now() };
        ledger.total_spent = ledger.total_spent.saturating_add(price);
        ledger.recent.push_back(now);
        ledger.last_purchase = Some(now);
        ledger.entries.push(entry.clone());
        entry
    }

    pub fn set_limits(&self, limits: BudgetLimits) -> Result<(), SniperError> {
        limits.validate()?;
        self.ledger.lock().limits = limits;
        info!(
            per_item = limits.max_price_per_item,
            total = limits.total_budget,
            per_hour = limits.max_purchases_per_hour,
            cooldown_secs = limits.cooldown_secs,
            "Budget limits updated"
        );
        Ok(())
    }

    pub fn limits(&self) -> BudgetLimits {
        self.ledger.lock().limits
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let mut ledger = self.ledger.lock();
        let now = Instant::now();
        ledger.prune(now);
        let purchases_last_hour = ledger.recent.len() as u32;

        BudgetSnapshot {
            max_price_per_item: ledger.limits.max_price_per_item,
            total_budget: ledger.limits.total_budget,
            total_spent: ledger.total_spent,
            reserved: ledger.reserved,
            remaining: ledger.remaining(),
            purchases_last_hour,
            max_purchases_per_hour: ledger.limits.max_purchases_per_hour,
            remaining_this_hour: ledger
                .limits
                .max_purchases_per_hour
                .saturating_sub(purchases_last_hour + ledger.in_flight),
            cooldown_remaining_secs: ledger.cooldown_remaining(now).as_secs_f64().ceil() as u64,
            last_purchase_at: ledger.entries.last().map(|e| e.at),
            armed: ledger.armed,
        }
    }

    pub fn ledger_snapshot(&self) -> LedgerSnapshot {
        let ledger = self.ledger.lock();
        LedgerSnapshot {
            total_spent: ledger.total_spent,
            entries: ledger.entries.clone(),
        }
    }

    /// Zero spend and forget purchase history. In-flight reservations stay.
    pub fn reset(&self) {
        let mut ledger = self.ledger.lock();
        ledger.total_spent = 0;
        ledger.entries.clear();
        ledger.recent.clear();
        ledger.last_purchase = None;
        info!("Budget ledger reset");
    }

    /// Kill switch. Returns once no new authorization can succeed.
    pub fn disarm(&self) {
        self.ledger.lock().armed = false;
    }

    pub fn arm(&self) {
        self.ledger.lock().armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.ledger.lock().armed
    }
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// Budget held for one purchase attempt. Dropping it unsettled releases it.
#[must_use = "an unused reservation is released immediately"]
pub struct Reservation {
    guard: Arc<BudgetGuard>,
    item_id: u64,
    price: Robux,
    settled: bool,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("item_id", &self.item_id)
            .field("price", &self.price)
            .field("settled", &self.settled)
            .finish()
    }
}

impl Reservation {
    pub fn item_id(&self) -> u64 {
        self.item_id
    }

    /// Authorized ceiling.
    pub fn price(&self) -> Robux {
        self.price
    }

    /// Record the purchase at the price actually paid.
    pub fn commit(mut self, fill_price: Robux) -> LedgerEntry {
        self.settled = true;
        let entry = self.guard.commit_reserved(self.price, self.item_id, fill_price);
        info!(item_id = self.item_id, price = fill_price, "Purchase committed to ledger");
        entry
    }

    /// Give the reserved budget back.
    pub fn release(mut self) {
        self.settled = true;
        self.guard.release_reserved(self.price);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.guard.release_reserved(self.price);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(per_item: Robux, total: Robux, per_hour: u32, cooldown_secs: u64) -> BudgetLimits {
        BudgetLimits {
            max_price_per_item: per_item,
            total_budget: total,
            max_purchases_per_hour: per_hour,
            cooldown_secs,
        }
    }

    #[test]
    fn test_authorize_and_commit() {
        let guard = BudgetGuard::new(limits(1000, 5000, 10, 0));
        let r = guard.authorize(1, 400).unwrap();
        assert_eq!(guard.snapshot().reserved, 400);
        assert_eq!(guard.snapshot().remaining, 4600);

        let entry = r.commit(390);
        assert_eq!(entry.price, 390);

        let snap = guard.snapshot();
        assert_eq!(snap.total_spent, 390);
        assert_eq!(snap.reserved, 0);
        assert_eq!(snap.remaining, 4610);
        assert_eq!(snap.purchases_last_hour, 1);
        assert!(snap.last_purchase_at.is_some());
    }

    #[test]
    fn test_item_cap_denied() {
        let guard = BudgetGuard::new(limits(500, 5000, 10, 0));
        assert_eq!(
            guard.authorize(1, 501).unwrap_err(),
            Denial::ItemCap { price: 501, cap: 500 }
        );
    }

    #[test]
    fn test_one_short_of_budget_denied() {
        let guard = BudgetGuard::new(limits(1000, 399, 10, 0));
        assert_eq!(
            guard.authorize(1, 400).unwrap_err(),
            Denial::TotalBudget { price: 400, remaining: 399 }
        );
        assert_eq!(guard.snapshot().total_spent, 0);
    }

    #[test]
    fn test_reservations_count_against_budget() {
        let guard = BudgetGuard::new(limits(1000, 1000, 10, 0));
        let _a = guard.authorize(1, 600).unwrap();
        assert!(matches!(
            guard.authorize(2, 600),
            Err(Denial::TotalBudget { remaining: 400, .. })
        ));
    }

    #[test]
    fn test_release_and_drop_return_budget() {
        let guard = BudgetGuard::new(limits(1000, 1000, 10, 0));
        guard.authorize(1, 700).unwrap().release();
        assert_eq!(guard.snapshot().remaining, 1000);

        {
            let _r = guard.authorize(2, 700).unwrap();
            assert_eq!(guard.snapshot().remaining, 300);
        }
        let snap = guard.snapshot();
        assert_eq!(snap.remaining, 1000);
        assert_eq!(snap.total_spent, 0);
        assert_eq!(snap.purchases_last_hour, 0);
    }

    #[test]
    fn test_failed_attempts_do_not_consume_rate() {
        let guard = BudgetGuard::new(limits(1000, 10_000, 1, 60));
        for _ in 0..5 {
            guard.authorize(1, 100).unwrap().release();
        }
        assert!(guard.authorize(1, 100).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hourly_window_slides() {
        let guard = BudgetGuard::new(limits(1000, 10_000, 2, 0));
        guard.authorize(1, 100).unwrap().commit(100);
        tokio::time::advance(Duration::from_secs(600)).await;
        guard.authorize(2, 100).unwrap().commit(100);

        assert_eq!(guard.authorize(3, 100).unwrap_err(), Denial::HourlyLimit { max: 2 });

        // First purchase ages out of the window.
        tokio::time::advance(Duration::from_secs(3000)).await;
        assert!(guard.authorize(3, 100).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_between_purchases() {
        let guard = BudgetGuard::new(limits(1000, 10_000, 10, 30));
        guard.authorize(1, 100).unwrap().commit(100);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(
            guard.authorize(2, 100).unwrap_err(),
            Denial::Cooldown { remaining_secs: 20 }
        );
        assert_eq!(guard.snapshot().cooldown_remaining_secs, 20);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(guard.authorize(2, 100).is_ok());
    }

    #[test]
    fn test_in_flight_blocks_when_cooldown_set() {
        let guard = BudgetGuard::new(limits(1000, 10_000, 10, 5));
        let _held = guard.authorize(1, 100).unwrap();
        assert_eq!(guard.authorize(2, 100).unwrap_err(), Denial::InFlight);

        let no_cooldown = BudgetGuard::new(limits(1000, 10_000, 10, 0));
        let _a = no_cooldown.authorize(1, 100).unwrap();
        assert!(no_cooldown.authorize(2, 100).is_ok());
    }

    #[test]
    fn test_disarm_blocks_everything() {
        let guard = BudgetGuard::new(limits(1000, 10_000, 10, 0));
        guard.disarm();
        assert!(!guard.is_armed());
        assert_eq!(guard.authorize(1, 1).unwrap_err(), Denial::Disarmed);
        guard.arm();
        assert!(guard.authorize(1, 1).is_ok());
    }

    #[test]
    fn test_commit_after_disarm_still_records() {
        let guard = BudgetGuard::new(limits(1000, 10_000, 10, 0));
        let r = guard.authorize(1, 250).unwrap();
        guard.disarm();
        r.commit(250);
        assert_eq!(guard.snapshot().total_spent, 250);
    }

    #[test]
    fn test_concurrent_last_unit() {
        let guard = BudgetGuard::new(limits(500, 500, 100, 0));
        guard.authorize(0, 100).unwrap().commit(100);

        let results: Vec<Result<Reservation, Denial>> = std::thread::scope(|s| {
            let handles: Vec<_> = (1..=16)
                .map(|id| {
                    let guard = Arc::clone(&guard);
                    s.spawn(move || guard.authorize(id, 400))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let granted: Vec<&Reservation> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(granted.len(), 1);
        assert_eq!(guard.snapshot().remaining, 0);
    }

    #[test]
    fn test_spend_never_exceeds_total() {
        let guard = BudgetGuard::new(limits(900, 2500, 1000, 0));
        for (i, price) in [400u64, 900, 300, 800, 50, 700, 600, 20].iter().enumerate() {
            if let Ok(r) = guard.authorize(i as u64, *price) {
                r.commit(*price);
            }
            assert!(guard.snapshot().total_spent <= 2500);
        }
    }

    #[test]
    fn test_set_limits_validates() {
        let guard = BudgetGuard::new(BudgetLimits::default());
        assert!(guard.set_limits(limits(0, 100, 1, 0)).is_err());
        assert!(guard.set_limits(limits(200, 100, 1, 0)).is_err());
        assert!(guard.set_limits(limits(100, 100, 0, 0)).is_err());
        assert_eq!(guard.limits(), BudgetLimits::default());

        guard.set_limits(limits(100, 1000, 3, 0)).unwrap();
        assert_eq!(guard.limits().total_budget, 1000);
    }

    #[test]
    fn test_reset_clears_history() {
        let guard = BudgetGuard::new(limits(1000, 10_000, 1, 60));
        guard.authorize(1, 500).unwrap().commit(500);
        guard.reset();

        let snap = guard.snapshot();
        assert_eq!(snap.total_spent, 0);
        assert_eq!(snap.purchases_last_hour, 0);
        assert!(snap.last_purchase_at.is_none());
        assert!(guard.authorize(2, 500).is_ok());
    }

    #[test]
    fn test_restore_rebuilds_window() {
        let snapshot = LedgerSnapshot {
            total_spent: 1200,
            entries: vec![
                LedgerEntry {
                    item_id: 1,
                    price: 700,
                    at: Utc::now() - chrono::Duration::hours(3),
                },
                LedgerEntry {
                    item_id: 2,
                    price: 500,
                    at: Utc::now() - chrono::Duration::minutes(5),
                },
            ],
        };
        let guard = BudgetGuard::restore(limits(1000, 5000, 1, 0), snapshot.clone());

        let snap = guard.snapshot();
        assert_eq!(snap.total_spent, 1200);
        assert_eq!(snap.purchases_last_hour, 1);
        assert_eq!(guard.authorize(3, 100).unwrap_err(), Denial::HourlyLimit { max: 1 });
        assert_eq!(guard.ledger_snapshot(), snapshot);
    }
}
