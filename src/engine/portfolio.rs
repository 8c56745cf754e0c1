//! Portfolio: what a session has bought and what it was worth on the day.
//!
//! Every fill is kept as a `Holding` with the curated value and RAP seen at
//! purchase time. Profit is estimated against that value; nothing here
//! re-prices holdings later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::strategy::Candidate;
use crate::types::{PurchaseReceipt, Robux};

/// Best/worst list length when the caller does not ask for one.
pub const DEFAULT_TOP: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub receipt_id: String,
    pub item_id: u64,
    pub item_name: String,
    pub price: Robux,
    pub value_at_purchase: Robux,
    pub rap_at_purchase: Robux,
    pub score: f64,
    pub strategy: String,
    pub dry_run: bool,
    pub bought_at: DateTime<Utc>,
}

impl Holding {
    pub fn from_fill(candidate: &Candidate, receipt: &PurchaseReceipt) -> Self {
        Self {
            receipt_id: receipt.receipt_id.clone(),
            item_id: receipt.item_id,
            item_name: candidate.snapshot.name.clone(),
            price: receipt.price,
            value_at_purchase: candidate.snapshot.value,
            rap_at_purchase: candidate.snapshot.rap,
            score: candidate.score.total,
            strategy: candidate.score.strategy.clone(),
            dry_run: receipt.dry_run,
            bought_at: receipt.timestamp,
        }
    }

    /// Value at purchase minus price paid. Negative for an overpay.
    pub fn estimated_profit(&self) -> i64 {
        self.value_at_purchase as i64 - self.price as i64
    }

    pub fn estimated_profit_pct(&self) -> f64 {
        if self.price == 0 {
            return 0.0;
        }
        self.estimated_profit() as f64 / self.price as f64 * 100.0
    }
}

impl fmt::Display for Holding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let profit = self.estimated_profit();
        let sign = if profit >= 0 { "+" } else { "" };
        write!(
            f,
            "[{}] {} ({}) paid R${} value R${} ({sign}{profit})",
            self.strategy, self.item_name, self.item_id, self.price, self.value_at_purchase,
        )
    }
}

/// Aggregates over a set of holdings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub purchases: u64,
    pub total_spent: Robux,
    pub estimated_value: Robux,
    pub estimated_rap: Robux,
    pub estimated_profit: i64,
    pub winners: u64,
    pub losers: u64,
}

impl PortfolioStats {
    fn add(&mut self, holding: &Holding) {
        self.purchases += 1;
        self.total_spent += holding.price;
        self.estimated_value += holding.value_at_purchase;
        self.estimated_rap += holding.rap_at_purchase;
        self.estimated_profit += holding.estimated_profit();
        if holding.estimated_profit() > 0 {
            self.winners += 1;
        } else {
            self.losers += 1;
        }
    }

    pub fn estimated_profit_pct(&self) -> f64 {
        if self.total_spent == 0 {
            return 0.0;
        }
        self.estimated_profit as f64 / self.total_spent as f64 * 100.0
    }

    /// Share of holdings bought below value, as a percentage.
    pub fn win_rate(&self) -> f64 {
        if self.purchases == 0 {
            return 0.0;
        }
        self.winners as f64 / self.purchases as f64 * 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub overall: PortfolioStats,
    pub estimated_profit_pct: f64,
    pub win_rate: f64,
    pub by_strategy: BTreeMap<String, PortfolioStats>,
    pub best: Vec<Holding>,
    pub worst: Vec<Holding>,
}

#[derive(Debug, Clone, Default)]
pub struct Portfolio {
    holdings: Vec<Holding>,
}

impl Portfolio {
    pub fn record(&mut self, holding: Holding) {
        self.holdings.push(holding);
    }

    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    pub fn clear(&mut self) {
        self.holdings.clear();
    }

    pub fn stats(&self) -> PortfolioStats {
        let mut stats = PortfolioStats::default();
        for h in &self.holdings {
            stats.add(h);
        }
        stats
    }

    pub fn by_strategy(&self) -> BTreeMap<String, PortfolioStats> {
        let mut groups: BTreeMap<String, PortfolioStats> = BTreeMap::new();
        for h in &self.holdings {
            groups.entry(h.strategy.clone()).or_default().add(h);
        }
        groups
    }

    /// Up to `top` holdings by estimated profit, highest first.
    pub fn best(&self, top: usize) -> Vec<Holding> {
        let mut sorted = self.holdings.clone();
        sorted.sort_by(|a, b| b.estimated_profit().cmp(&a.estimated_profit()));
        sorted.truncate(top);
        sorted
    }

    /// Up to `top` holdings by estimated profit, lowest first.
    pub fn worst(&self, top: usize) -> Vec<Holding> {
        let mut sorted = self.holdings.clone();
        sorted.sort_by_key(|h| h.estimated_profit());
        sorted.truncate(top);
        sorted
    }

    pub fn summary(&self, top: usize) -> PortfolioSummary {
        let overall = self.stats();
        PortfolioSummary {
            estimated_profit_pct: overall.estimated_profit_pct(),
            win_rate: overall.win_rate(),
            overall,
            by_strategy: self.by_strategy(),
            best: self.best(top),
            worst: self.worst(top),
        }
    }
}
