//! Snapshot scanner.
//!
//! Wraps a `SnapshotSource` with a per-call timeout and bounded retry.
//! When every attempt fails the cycle is skipped; the engine keeps running.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::market::SnapshotSource;
use crate::types::{ItemSnapshot, SniperError};

#[derive(Debug, Clone, Copy)]
pub struct ScannerSettings {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 3,
            backoff_ms: 1000,
        }
    }
}

pub struct Scanner {
    source: Arc<dyn SnapshotSource>,
    settings: ScannerSettings,
}

impl Scanner {
    pub fn new(source: Arc<dyn SnapshotSource>, settings: ScannerSettings) -> Self {
        Self { source, settings }
    }

    /// Fetch one cycle's snapshots.
    pub async fn scan(&self) -> Result<Vec<ItemSnapshot>, SniperError> {
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay = self
                    .settings
                    .backoff_ms
                    .saturating_mul(2u64.saturating_pow(attempt - 1));
                debug!(attempt, delay_ms = delay, "Retrying fetch");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match tokio::time::timeout(self.settings.timeout, self.source.fetch_snapshots()).await {
                Ok(Ok(snapshots)) => {
                    info!(count = snapshots.len(), "Scan complete");
                    return Ok(snapshots);
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "Snapshot fetch failed");
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    warn!(attempt, "Snapshot fetch timed out");
                    last_error = Some(format!("timed out after {:?}", self.settings.timeout));
                }
            }
        }

        Err(SniperError::SourceUnavailable(format!(
            "fetch failed after {} retries: {}",
            self.settings.max_retries,
            last_error.unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MockSnapshotSource;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings(max_retries: u32) -> ScannerSettings {
        ScannerSettings {
            timeout: Duration::from_secs(1),
            max_retries,
            backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_scan_success() {
        let mut source = MockSnapshotSource::new();
        source
            .expect_fetch_snapshots()
            .times(1)
            .returning(|| Ok(vec![ItemSnapshot::sample()]));

        let scanner = Scanner::new(Arc::new(source), settings(2));
        let items = scanner.scan().await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_recovers_after_transient_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let mut source = MockSnapshotSource::new();
        source.expect_fetch_snapshots().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow::anyhow!("502 Bad Gateway"))
            } else {
                Ok(Vec::new())
            }
        });

        let scanner = Scanner::new(Arc::new(source), settings(3));
        assert!(scanner.scan().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_scan_gives_up() {
        let mut source = MockSnapshotSource::new();
        source
            .expect_fetch_snapshots()
            .times(3)
            .returning(|| Err(anyhow::anyhow!("connection refused")));

        let scanner = Scanner::new(Arc::new(source), settings(2));
        let err = scanner.scan().await.unwrap_err();
        assert!(matches!(err, SniperError::SourceUnavailable(ref msg) if msg.contains("connection refused")));
    }
}
