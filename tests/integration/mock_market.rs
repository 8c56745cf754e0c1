//! Mock market for integration testing.
//!
//! Provides a deterministic in-memory market that serves as both the
//! snapshot source and the purchase surface. Listings, failures and fetch
//! timing are fully controllable from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use risniper::market::{PurchaseError, PurchaseResponse, PurchaseSurface, SnapshotSource};
use risniper::types::{Demand, ItemSnapshot, Robux, Trend};

/// The reference listing: value 1000, RAP 950, high demand, stable,
/// listed at 400 with 20 copies left and 50 sales in 90 days.
pub fn cap(item_id: u64) -> ItemSnapshot {
    ItemSnapshot {
        item_id,
        name: format!("Red Baseball Cap #{item_id}"),
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

pub struct MockMarket {
    items: Arc<Mutex<Vec<ItemSnapshot>>>,
    /// Live listing price per item; removed once bought.
    listings: Arc<Mutex<HashMap<u64, Robux>>>,
    purchases: Arc<Mutex<Vec<(u64, Robux)>>>,
    purchase_calls: AtomicUsize,
    fetches: AtomicUsize,
    /// If set, purchase-surface calls return this error.
    force_error: Arc<Mutex<Option<String>>>,
    /// If set, fetches block until released.
    gate: Arc<Mutex<Option<Arc<Notify>>>>,
    fetch_started: Arc<Notify>,
}

impl MockMarket {
    pub fn with_items(items: Vec<ItemSnapshot>) -> Arc<Self> {
        let listings = items.iter().map(|i| (i.item_id, i.listing_price)).collect();
        Arc::new(Self {
            items: Arc::new(Mutex::new(items)),
            listings: Arc::new(Mutex::new(listings)),
            purchases: Arc::new(Mutex::new(Vec::new())),
            purchase_calls: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            force_error: Arc::new(Mutex::new(None)),
            gate: Arc::new(Mutex::new(None)),
            fetch_started: Arc::new(Notify::new()),
        })
    }

    /// Force all subsequent purchase-surface calls to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Make the next fetches wait for `release_fetch`.
    pub fn hold_fetches(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub fn release_fetch(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_waiters();
        }
    }

    /// Resolves once a fetch has begun.
    pub async fn fetch_started(&self) {
        self.fetch_started.notified().await;
    }

    pub fn purchase_calls(&self) -> usize {
        self.purchase_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn purchases(&self) -> Vec<(u64, Robux)> {
        self.purchases.lock().unwrap().clone()
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SnapshotSource for MockMarket {
    async fn fetch_snapshots(&self) -> Result<Vec<ItemSnapshot>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let released = gate.notified();
            self.fetch_started.notify_one();
            released.await;
        } else {
            self.fetch_started.notify_one();
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

#[async_trait]
impl PurchaseSurface for MockMarket {
    async fn current_listing(&self, item_id: u64) -> Result<Option<Robux>> {
        self.check_error()?;
        Ok(self.listings.lock().unwrap().get(&item_id).copied())
    }

    async fn attempt_purchase(
        &self,
        item_id: u64,
        max_price: Robux,
    ) -> std::result::Result<PurchaseResponse, PurchaseError> {
        self.purchase_calls.fetch_add(1, Ordering::SeqCst);
        self.check_error()
            .map_err(|e| PurchaseError::NotSubmitted(e.to_string()))?;

        let mut listings = self.listings.lock().unwrap();
        match listings.get(&item_id).copied() {
            Some(price) if price <= max_price => {
                listings.remove(&item_id);
                self.purchases.lock().unwrap().push((item_id, price));
                Ok(PurchaseResponse::Filled { price })
            }
            _ => Ok(PurchaseResponse::Stale),
        }
    }
}
