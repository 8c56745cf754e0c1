//! HTTP purchase surface.
//!
//! Endpoints:
//! - `GET  {base}/listings/{item_id}` → `{"price": 390}` or `{"price": null}`
//! - `POST {base}/purchase` with `{"item_id", "max_price"}` → `PurchaseResponse`
//!
//! Auth: `Authorization: Bearer {token}` on every request.
//! 429, 5xx and connect failures mean the purchase was not submitted.
//! A timeout or an unreadable 2xx body is ambiguous. Other 4xx are
//! definitive rejections.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{PurchaseError, PurchaseResponse, PurchaseSurface};
use crate::types::Robux;

#[derive(Debug, Deserialize)]
struct ListingResponse {
    #[serde(default)]
    price: Option<Robux>,
}

#[derive(Debug, Serialize)]
struct PurchaseRequest {
    item_id: u64,
    max_price: Robux,
}

pub struct HttpPurchaseSurface {
    http: Client,
    base_url: String,
    token: SecretString,
}

impl HttpPurchaseSurface {
    pub fn new(base_url: impl Into<String>, token: SecretString, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build purchase HTTP client")?;

        let base_url: String = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    fn is_transient(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    /// Only a request that never left the client is safe to send again.
    fn classify_send_error(err: reqwest::Error) -> PurchaseError {
        if err.is_connect() || err.is_builder() {
            PurchaseError::NotSubmitted(err.to_string())
        } else {
            PurchaseError::Ambiguous(err.to_string())
        }
    }
}

#[async_trait]
impl PurchaseSurface for HttpPurchaseSurface {
    async fn current_listing(&self, item_id: u64) -> Result<Option<Robux>> {
        let url = format!("{}/listings/{item_id}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", self.bearer())
            .send()
            .await
            .context("Listing lookup failed")?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Listing lookup for {item_id} returned {status}: {body}");
        }

        let listing: ListingResponse = resp
            .json()
            .await
            .context("Failed to parse listing response")?;
        debug!(item_id, price = ?listing.price, "Listing checked");
        Ok(listing.price)
    }

    async fn attempt_purchase(
        &self,
        item_id: u64,
        max_price: Robux,
    ) -> std::result::Result<PurchaseResponse, PurchaseError> {
        let url = format!("{}/purchase", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", self.bearer())
            .json(&PurchaseRequest { item_id, max_price })
            .send()
            .await
            .map_err(Self::classify_send_error)?;

        let status = resp.status();
        if status.is_success() {
            return resp.json::<PurchaseResponse>().await.map_err(|e| {
                PurchaseError::Ambiguous(format!("unreadable {status} purchase response: {e}"))
            });
        }

        let body = resp.text().await.unwrap_or_default();
        if Self::is_transient(status) {
            return Err(PurchaseError::NotSubmitted(format!(
                "purchase of {item_id} returned {status}: {body}"
            )));
        }

        warn!(item_id, status = %status, body = %body, "Purchase rejected upstream");
        Ok(PurchaseResponse::Rejected {
            reason: format!("HTTP {status}: {body}"),
        })
    }
}
