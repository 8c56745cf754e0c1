//! Decision journals.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{DecisionRecord, Recorder};

/// Appends one JSON object per line.
pub struct JsonlRecorder {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl Recorder for JsonlRecorder {
    async fn record(&self, record: &DecisionRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("Failed to serialise decision")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open decision log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to append decision")?;
        file.flush().await.context("Failed to flush decision log")?;

        debug!(item_id = record.item_id, outcome = record.outcome.label(), "Decision recorded");
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Default)]
pub struct MemoryRecorder {
    records: parking_lot::Mutex<Vec<DecisionRecord>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn record(&self, record: &DecisionRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
