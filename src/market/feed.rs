//! JSON snapshot feed.
//!
//! Reads a JSON array of item snapshots from an HTTP endpoint. The feed is
//! expected to merge value data (value, demand, trend, projected/rare/hyped
//! flags) with live resale data (cheapest listing, copies, sales).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::SnapshotSource;
use crate::types::ItemSnapshot;

const USER_AGENT: &str = concat!("risniper/", env!("CARGO_PKG_VERSION"));

pub struct FeedClient {
    http: Client,
    url: String,
}

impl FeedClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build feed HTTP client")?;

        Ok(Self { http, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotSource for FeedClient {
    async fn fetch_snapshots(&self) -> Result<Vec<ItemSnapshot>> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("Snapshot feed request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Snapshot feed returned {status}: {body}");
        }

        let snapshots: Vec<ItemSnapshot> = resp
            .json()
            .await
            .context("Failed to parse snapshot feed")?;

        debug!(count = snapshots.len(), url = %self.url, "Fetched snapshots");
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds() {
        let client = FeedClient::new("http://localhost:9/items", Duration::from_secs(5)).unwrap();
        assert_eq!(client.url(), "http://localhost:9/items");
    }

    #[test]
    fn test_feed_payload_parses_with_defaults() {
        let json = r#"[{
            "item_id": 1028606,
            "value": 1000,
            "rap": 950,
            "demand": "high",
            "trend": "stable",
            "listing_price": 400,
            "copies_remaining": 20,
            "sales_90d": 50
        }]"#;
        let items: Vec<ItemSnapshot> = serde_json::from_str(json).unwrap();
        assert_eq!(items.len(), 1);
        assert!(!items[0].projected);
        assert!(!items[0].is_ugc);
        assert!(items[0].name.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_feed_errors() {
        // Port 9 (discard) is closed on test hosts; the request fails fast.
        let client =
            FeedClient::new("http://127.0.0.1:9/items", Duration::from_millis(500)).unwrap();
        assert!(client.fetch_snapshots().await.is_err());
    }
}
