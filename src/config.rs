//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (purchase token, webhook URL) are referenced by env-var name in
//! the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::executor::ExecutorSettings;
use crate::engine::guard::BudgetLimits;
use crate::engine::scanner::ScannerSettings;
use crate::strategy::profile::{StrategyKind, StrategyProfile};
use crate::types::{validate_session_id, PurchaseMode, SniperError, UgcPolicy};

/// Top-level application configuration. Shared read-only by every session.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub budget: BudgetLimits,
    pub source: SourceConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Session started at boot.
    pub session_id: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_mode")]
    pub purchase_mode: PurchaseMode,
    #[serde(default = "default_threshold")]
    pub score_threshold: u8,
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
    /// Overrides the preset's UGC policy.
    #[serde(default)]
    pub ugc_policy: Option<UgcPolicy>,
    /// Overrides the preset's UGC age gate.
    #[serde(default)]
    pub min_ugc_age_days: Option<u32>,
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub snapshot_url: String,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_source_retries")]
    pub max_retries: u32,
    #[serde(default = "default_source_backoff")]
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default)]
    pub purchase_url: Option<String>,
    #[serde(default)]
    pub auth_token_env: Option<String>,
    #[serde(default = "default_purchase_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_purchase_retries")]
    pub max_retries: u32,
    #[serde(default = "default_purchase_backoff")]
    pub backoff_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            purchase_url: None,
            auth_token_env: None,
            timeout_secs: default_purchase_timeout(),
            max_retries: default_purchase_retries(),
            backoff_ms: default_purchase_backoff(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_decision_log")]
    pub decision_log: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            decision_log: default_decision_log(),
            state_dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    #[serde(default)]
    pub webhook_url_env: Option<String>,
    #[serde(default = "default_alert_timeout")]
    pub timeout_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { webhook_url_env: None, timeout_secs: default_alert_timeout() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: true, port: 3000 }
    }
}

fn default_poll_interval() -> u64 { 60 }
fn default_mode() -> PurchaseMode { PurchaseMode::AlertConfirm }
fn default_threshold() -> u8 { 70 }
fn default_strategy() -> StrategyKind { StrategyKind::QuickFlip }
fn default_max_failures() -> u32 { 3 }
fn default_source_timeout() -> u64 { 15 }
fn default_source_retries() -> u32 { 3 }
fn default_source_backoff() -> u64 { 1000 }
fn default_true() -> bool { true }
fn default_purchase_timeout() -> u64 { 10 }
fn default_purchase_retries() -> u32 { 2 }
fn default_purchase_backoff() -> u64 { 500 }
fn default_decision_log() -> String { "data/decisions.jsonl".to_string() }
fn default_state_dir() -> String { "data/state".to_string() }
fn default_alert_timeout() -> u64 { 5 }

/// Upper bound for `source.max_retries` and `executor.max_retries`.
pub const MAX_RETRIES: u32 = 10;

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SniperError> {
        validate_session_id(&self.engine.session_id)?;
        if self.engine.poll_interval_secs == 0 {
            return Err(SniperError::Config("engine.poll_interval_secs must be positive".into()));
        }
        if self.engine.score_threshold > 100 {
            return Err(SniperError::Config(format!(
                "engine.score_threshold must be 0-100, got {}",
                self.engine.score_threshold
            )));
        }
        if self.engine.max_consecutive_failures == 0 {
            return Err(SniperError::Config(
                "engine.max_consecutive_failures must be positive".into(),
            ));
        }
        self.budget.validate()?;
        for (key, retries) in [
            ("source.max_retries", self.source.max_retries),
            ("executor.max_retries", self.executor.max_retries),
        ] {
            if retries > MAX_RETRIES {
                return Err(SniperError::Config(format!(
                    "{key} must be at most {MAX_RETRIES}, got {retries}"
                )));
            }
        }
        if !self.executor.dry_run && self.executor.purchase_url.is_none() {
            return Err(SniperError::Config(
                "executor.purchase_url is required when dry_run = false".into(),
            ));
        }
        self.strategy_profile().validate()
    }

    /// The configured preset with any UGC overrides applied.
    pub fn strategy_profile(&self) -> StrategyProfile {
        let mut profile = StrategyProfile::preset(self.engine.strategy);
        if let Some(policy) = self.engine.ugc_policy {
            profile = profile.with_ugc_policy(policy);
        }
        if let Some(days) = self.engine.min_ugc_age_days {
            profile.min_ugc_age_days = days;
        }
        profile
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.engine.poll_interval_secs)
    }

    pub fn scanner_settings(&self) -> ScannerSettings {
        ScannerSettings {
            timeout: Duration::from_secs(self.source.timeout_secs),
            max_retries: self.source.max_retries,
            backoff_ms: self.source.backoff_ms,
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            dry_run: self.executor.dry_run,
            timeout: Duration::from_secs(self.executor.timeout_secs),
            max_retries: self.executor.max_retries,
            backoff_ms: self.executor.backoff_ms,
        }
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [engine]
        session_id = "guild-1"

        [budget]
        max_price_per_item = 5000
        total_budget = 20000
        max_purchases_per_hour = 5
        cooldown_secs = 30

        [source]
        snapshot_url = "http://localhost:8080/items"
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = AppConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.engine.poll_interval_secs, 60);
        assert_eq!(cfg.engine.purchase_mode, PurchaseMode::AlertConfirm);
        assert_eq!(cfg.engine.score_threshold, 70);
        assert_eq!(cfg.engine.strategy, StrategyKind::QuickFlip);
        assert_eq!(cfg.engine.max_consecutive_failures, 3);
        assert!(cfg.executor.dry_run);
        assert_eq!(cfg.storage.state_dir, "data/state");
        assert!(cfg.alerts.webhook_url_env.is_none());
        assert_eq!(cfg.dashboard.port, 3000);
        assert_eq!(cfg.budget.total_budget, 20000);
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
            [engine]
            session_id = "guild-2"
            poll_interval_secs = 30
            purchase_mode = "hybrid"
            score_threshold = 80
            strategy = "rare_hunt"
            ugc_policy = "allow"
            min_ugc_age_days = 14
            max_consecutive_failures = 5

            [budget]
            max_price_per_item = 1000
            total_budget = 1000
            max_purchases_per_hour = 2
            cooldown_secs = 0

            [source]
            snapshot_url = "http://feed/items"
            timeout_secs = 5
            max_retries = 1
            backoff_ms = 100

            [executor]
            dry_run = false
            purchase_url = "http://buy"
            auth_token_env = "RISNIPER_TOKEN"

            [alerts]
            webhook_url_env = "RISNIPER_WEBHOOK"

            [dashboard]
            enabled = false
            port = 8081
        "#;
        let cfg = AppConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.engine.purchase_mode, PurchaseMode::Hybrid);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(30));

        let profile = cfg.strategy_profile();
        assert_eq!(profile.name, "rare_hunt");
        assert_eq!(profile.ugc_policy, UgcPolicy::Allow);
        assert_eq!(profile.min_ugc_age_days, 14);

        let exec = cfg.executor_settings();
        assert!(!exec.dry_run);
        assert_eq!(exec.max_retries, 2);
        assert_eq!(cfg.scanner_settings().timeout, Duration::from_secs(5));
        assert!(!cfg.dashboard.enabled);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let toml = MINIMAL.replace("session_id = \"guild-1\"", "session_id = \"g\"\nscore_threshold = 120");
        assert!(AppConfig::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_rejects_live_without_purchase_url() {
        let toml = format!("{MINIMAL}\n[executor]\ndry_run = false\n");
        let err = AppConfig::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("purchase_url"));
    }

    #[test]
    fn test_rejects_unbounded_retries() {
        let toml = format!("{MINIMAL}\n[executor]\nmax_retries = 65\n");
        let err = AppConfig::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("executor.max_retries"));
    }

    #[test]
    fn test_rejects_bad_budget() {
        let toml = MINIMAL.replace("total_budget = 20000", "total_budget = 100");
        assert!(AppConfig::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_load_repo_config() {
        // Runs from the crate root under `cargo test`.
        let cfg = AppConfig::load("config.toml").unwrap();
        assert!(!cfg.engine.session_id.is_empty());
        assert!(cfg.executor.dry_run);
    }
}
