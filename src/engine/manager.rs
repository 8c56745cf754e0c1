//! Session registry.
//!
//! Sessions are keyed by an opaque id (one per guild or account). Each owns
//! its own engine, budget ledger and lifecycle; they share only the
//! read-only config and the journal/notifier/store handles.

use anyhow::{Context, Result};
use futures::future::join_all;
use parking_lot::RwLock;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::session::{EngineDeps, EngineOptions, EngineStatus, RuntimeSettings, SniperEngine};
use crate::config::AppConfig;
use crate::market::{FeedClient, HttpPurchaseSurface, PurchaseSurface};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::storage::{JsonFileStore, JsonlRecorder, Recorder, SessionStore};
use crate::types::{Lifecycle, SniperError};

/// Builds a fresh engine for a session id.
pub type EngineFactory = Arc<dyn Fn(&str) -> Result<Arc<SniperEngine>> + Send + Sync>;

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SniperEngine>>>,
    factory: EngineFactory,
}

impl SessionManager {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// Manager whose sessions are wired from the application config.
    pub fn from_config(cfg: Arc<AppConfig>) -> Result<Self> {
        let shared = SharedHandles::from_config(&cfg)?;
        let factory: EngineFactory =
            Arc::new(move |session_id: &str| engine_from_config(&cfg, &shared, session_id));
        Ok(Self::new(factory))
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<SniperEngine>, SniperError> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SniperError::SessionNotFound(session_id.to_string()))
    }

    /// Existing session, or a new idle one.
    pub fn get_or_create(&self, session_id: &str) -> Result<Arc<SniperEngine>> {
        if let Some(engine) = self.sessions.read().get(session_id) {
            return Ok(Arc::clone(engine));
        }

        let mut sessions = self.sessions.write();
        // Another caller may have won the race between the two locks.
        if let Some(engine) = sessions.get(session_id) {
            return Ok(Arc::clone(engine));
        }
        let engine = (self.factory)(session_id)
            .with_context(|| format!("Failed to create session {session_id}"))?;
        sessions.insert(session_id.to_string(), Arc::clone(&engine));
        info!(session = %session_id, total = sessions.len(), "Session registered");
        Ok(engine)
    }

    /// Register a pre-built engine under its own id.
    pub fn insert(&self, engine: Arc<SniperEngine>) {
        self.sessions
            .write()
            .insert(engine.session_id().to_string(), engine);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Status of every session, ordered by id.
    pub fn list(&self) -> Vec<EngineStatus> {
        let engines: Vec<_> = self.sessions.read().values().cloned().collect();
        let mut statuses: Vec<_> = engines.iter().map(|e| e.status()).collect();
        statuses.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        statuses
    }

    /// Stop every running or paused session, concurrently.
    pub async fn stop_all(&self) {
        let engines: Vec<_> = self
            .sessions
            .read()
            .values()
            .filter(|e| matches!(e.lifecycle(), Lifecycle::Running | Lifecycle::Paused))
            .cloned()
            .collect();

        let stops = engines.iter().map(|engine| async move {
            if let Err(e) = engine.stop().await {
                warn!(session = %engine.session_id(), error = %e, "Failed to stop session");
            }
        });
        join_all(stops).await;
        info!(stopped = engines.len(), "All sessions stopped");
    }
}

// ---------------------------------------------------------------------------
// Config wiring
// ---------------------------------------------------------------------------

/// Handles shared by every session built from one config.
struct SharedHandles {
    recorder: Arc<dyn Recorder>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn SessionStore>,
    surface: Option<Arc<dyn PurchaseSurface>>,
}

impl SharedHandles {
    fn from_config(cfg: &AppConfig) -> Result<Self> {
        let recorder: Arc<dyn Recorder> = Arc::new(JsonlRecorder::new(&cfg.storage.decision_log));
        let store: Arc<dyn SessionStore> = Arc::new(JsonFileStore::new(&cfg.storage.state_dir));

        let notifier: Arc<dyn Notifier> = match cfg
            .alerts
            .webhook_url_env
            .as_deref()
            .map(|env| (env, std::env::var(env)))
        {
            Some((_, Ok(url))) if !url.is_empty() => Arc::new(WebhookNotifier::new(
                SecretString::new(url),
                Duration::from_secs(cfg.alerts.timeout_secs),
            )?),
            Some((env, _)) => {
                warn!(env, "Webhook env var not set, alerts go to the log only");
                Arc::new(LogNotifier)
            }
            None => Arc::new(LogNotifier),
        };

        let surface: Option<Arc<dyn PurchaseSurface>> = match &cfg.executor.purchase_url {
            Some(url) => {
                let token = match cfg.executor.auth_token_env.as_deref() {
                    Some(env) => match AppConfig::resolve_env(env) {
                        Ok(token) => Some(token),
                        Err(_) if cfg.executor.dry_run => {
                            warn!(env, "Purchase token not set, dry run continues without it");
                            None
                        }
                        Err(e) => return Err(e),
                    },
                    None => None,
                };
                match token {
                    Some(token) => {
                        let surface = HttpPurchaseSurface::new(
                            url.clone(),
                            SecretString::new(token),
                            Duration::from_secs(cfg.executor.timeout_secs),
                        )?;
                        Some(Arc::new(surface) as Arc<dyn PurchaseSurface>)
                    }
                    None if cfg.executor.dry_run => None,
                    None => anyhow::bail!(SniperError::Config(
                        "executor.auth_token_env is required when dry_run = false".into()
                    )),
                }
            }
            None => None,
        };

        Ok(Self { recorder, notifier, store, surface })
    }
}

fn engine_from_config(
    cfg: &AppConfig,
    shared: &SharedHandles,
    session_id: &str,
) -> Result<Arc<SniperEngine>> {
    let source = Arc::new(FeedClient::new(
        cfg.source.snapshot_url.clone(),
        Duration::from_secs(cfg.source.timeout_secs),
    )?);

    let deps = EngineDeps {
        source,
        surface: shared.surface.clone(),
        recorder: Arc::clone(&shared.recorder),
        notifier: Arc::clone(&shared.notifier),
        store: Some(Arc::clone(&shared.store)),
    };

    let options = EngineOptions {
        settings: RuntimeSettings {
            profile: cfg.strategy_profile(),
            mode: cfg.engine.purchase_mode,
            threshold: cfg.engine.score_threshold,
            poll_interval: cfg.poll_interval(),
            max_consecutive_failures: cfg.engine.max_consecutive_failures,
        },
        limits: cfg.budget,
        scanner: cfg.scanner_settings(),
        executor: cfg.executor_settings(),
    };

    SniperEngine::new(session_id, deps, options)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
