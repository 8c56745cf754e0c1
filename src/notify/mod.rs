//! Operator notifications.
//!
//! Best-effort: one attempt, no retry. A failed notification is logged by
//! the engine and never blocks a cycle.

pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::strategy::Candidate;
use crate::types::{PurchaseReceipt, Robux, ScoreTier};

pub use webhook::WebhookNotifier;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    /// A candidate worth the operator's attention.
    Opportunity {
        session_id: String,
        item_id: u64,
        item_name: String,
        listing_price: Robux,
        value: Robux,
        score: f64,
        tier: ScoreTier,
        discount_pct: f64,
        strategy: String,
    },
    Purchased {
        session_id: String,
        receipt: PurchaseReceipt,
    },
    Halted {
        session_id: String,
        reason: String,
    },
}

impl Alert {
    pub fn opportunity(session_id: &str, candidate: &Candidate) -> Self {
        Alert::Opportunity {
            session_id: session_id.to_string(),
            item_id: candidate.snapshot.item_id,
            item_name: candidate.snapshot.name.clone(),
            listing_price: candidate.snapshot.listing_price,
            value: candidate.snapshot.value,
            score: candidate.score.total,
            tier: candidate.score.tier,
            discount_pct: candidate.score.discount_pct,
            strategy: candidate.score.strategy.clone(),
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::Opportunity {
                item_id,
                item_name,
                listing_price,
                value,
                score,
                tier,
                discount_pct,
                strategy,
                ..
            } => write!(
                f,
                "🎯 {tier} snipe: {item_name} ({item_id}) at R${listing_price} \
                 (value R${value}, {discount_pct:.1}% off), score {score:.1}/100 [{strategy}]"
            ),
            Alert::Purchased { receipt, .. } => write!(f, "✅ Bought {receipt}"),
            Alert::Halted { session_id, reason } => {
                write!(f, "🛑 Session {session_id} halted: {reason}")
            }
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log. Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        info!(alert = %alert, "Operator alert");
        Ok(())
    }
}
