//! Chat webhook notifier (Discord-compatible `{"content": ...}` payload).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{Alert, Notifier};

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

pub struct WebhookNotifier {
    http: Client,
    /// Webhook URLs embed their own credential.
    url: SecretString,
}

impl WebhookNotifier {
    pub fn new(url: SecretString, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let content = alert.to_string();
        let resp = self
            .http
            .post(self.url.expose_secret())
            .json(&WebhookPayload { content: &content })
            .send()
            .await
            .context("Webhook request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Webhook returned {status}: {body}");
        }

        debug!(status = %status, "Webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let json = serde_json::to_string(&WebhookPayload { content: "hi" }).unwrap();
        assert_eq!(json, r#"{"content":"hi"}"#);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_errors() {
        let notifier = WebhookNotifier::new(
            SecretString::new("http://127.0.0.1:9/hook".to_string()),
            Duration::from_millis(500),
        )
        .unwrap();
        let alert = Alert::Halted { session_id: "s".into(), reason: "test".into() };
        assert!(notifier.notify(&alert).await.is_err());
    }
}
