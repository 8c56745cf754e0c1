//! RISNIPER: limited-item sniper engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! starts the boot session and the control API, then waits for Ctrl+C
//! and stops every session before exiting.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use risniper::config;
use risniper::dashboard;
use risniper::engine::SessionManager;

const BANNER: &str = r#"
 ____  ___ ____  _   _ ___ ____  _____ ____
|  _ \|_ _/ ___|| \ | |_ _|  _ \| ____|  _ \
| |_) || |\___ \|  \| || || |_) |  _| | |_) |
|  _ < | | ___) | |\  || ||  __/| |___|  _ <
|_| \_\___|____/|_| \_|___|_|   |_____|_| \_\

  Limited-item sniper engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        session = %cfg.engine.session_id,
        strategy = %cfg.engine.strategy,
        mode = %cfg.engine.purchase_mode,
        threshold = cfg.engine.score_threshold,
        poll_interval_secs = cfg.engine.poll_interval_secs,
        total_budget = cfg.budget.total_budget,
        dry_run = cfg.executor.dry_run,
        "RISNIPER starting up"
    );
    if !cfg.executor.dry_run {
        warn!("Live purchasing enabled: real Robux will be spent");
    }

    let cfg = Arc::new(cfg);
    let manager = Arc::new(SessionManager::from_config(Arc::clone(&cfg))?);

    // -- Boot session ----------------------------------------------------

    let engine = manager.get_or_create(&cfg.engine.session_id)?;
    engine.start().await?;

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(Arc::clone(&manager), cfg.dashboard.port).await?;
    }

    info!("Engine running. Press Ctrl+C to stop.");

    // -- Shutdown --------------------------------------------------------

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    manager.stop_all().await;

    for status in manager.list() {
        info!(
            session = %status.session_id,
            cycles = status.stats.cycles,
            filled = status.stats.purchases_filled,
            alerts = status.stats.alerts_sent,
            spent = status.budget.total_spent,
            remaining = status.budget.remaining,
            est_profit = status.portfolio.estimated_profit,
            "Session summary"
        );
    }
    info!("RISNIPER shut down cleanly.");

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("risniper=info"));

    let json_logging = std::env::var("RISNIPER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
