//! End-to-end engine scenarios against the mock market.

use std::sync::Arc;
use std::time::Duration;

use risniper::engine::executor::ExecutorSettings;
use risniper::engine::scanner::ScannerSettings;
use risniper::engine::{
    BudgetLimits, EngineDeps, EngineOptions, RuntimeSettings, SniperEngine,
};
use risniper::notify::LogNotifier;
use risniper::storage::{JsonFileStore, MemoryRecorder, Outcome, SessionStore};
use risniper::types::{Lifecycle, PurchaseMode};

use crate::mock_market::{cap, MockMarket};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    engine: Arc<SniperEngine>,
    market: Arc<MockMarket>,
    recorder: Arc<MemoryRecorder>,
}

fn limits(max_price_per_item: u64, total_budget: u64) -> BudgetLimits {
    BudgetLimits {
        max_price_per_item,
        total_budget,
        max_purchases_per_hour: 10,
        cooldown_secs: 0,
    }
}

fn options(mode: PurchaseMode, limits: BudgetLimits, dry_run: bool) -> EngineOptions {
    EngineOptions {
        settings: RuntimeSettings {
            mode,
            poll_interval: Duration::from_millis(20),
            ..RuntimeSettings::default()
        },
        limits,
        scanner: ScannerSettings {
            timeout: Duration::from_secs(30),
            max_retries: 0,
            backoff_ms: 1,
        },
        executor: ExecutorSettings {
            dry_run,
            timeout: Duration::from_secs(2),
            max_retries: 0,
            backoff_ms: 1,
        },
    }
}

fn harness(
    session_id: &str,
    market: Arc<MockMarket>,
    store: Option<Arc<dyn SessionStore>>,
    opts: EngineOptions,
) -> Harness {
    let recorder = Arc::new(MemoryRecorder::new());
    let engine = SniperEngine::new(
        session_id,
        EngineDeps {
            source: market.clone(),
            surface: Some(market.clone()),
            recorder: recorder.clone(),
            notifier: Arc::new(LogNotifier),
            store,
        },
        opts,
    )
    .unwrap();
    Harness { engine, market, recorder }
}

/// Wait until the engine has reconciled at least `n` cycles.
async fn wait_for_cycles(engine: &SniperEngine, n: u64) {
    tokio::time::timeout(WAIT, async {
        while engine.status().stats.cycles < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine did not finish cycles in time");
}

async fn wait_for_state(engine: &SniperEngine, want: Lifecycle) {
    let mut rx = engine.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == want))
        .await
        .expect("lifecycle did not change in time")
        .unwrap();
}

fn temp_state_dir() -> std::path::PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("risniper_test_state_{}", uuid::Uuid::new_v4()));
    p
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_auto_one_short_never_reaches_executor() {
    let h = harness(
        "short",
        MockMarket::with_items(vec![cap(1)]),
        None,
        options(PurchaseMode::FullAuto, limits(399, 399), false),
    );

    h.engine.start().await.unwrap();
    wait_for_cycles(&h.engine, 1).await;
    h.engine.stop().await.unwrap();

    assert_eq!(h.market.purchase_calls(), 0);
    let status = h.engine.status();
    assert_eq!(status.budget.total_spent, 0);
    assert!(status.stats.budget_denials >= 1);
    assert!(matches!(h.recorder.records()[0].outcome, Outcome::BudgetDenied { .. }));
}

#[tokio::test]
async fn test_full_auto_fills_and_spends() {
    let h = harness(
        "fill",
        MockMarket::with_items(vec![cap(1)]),
        None,
        options(PurchaseMode::FullAuto, limits(1000, 5000), false),
    );

    h.engine.start().await.unwrap();
    wait_for_cycles(&h.engine, 2).await;
    h.engine.stop().await.unwrap();

    assert_eq!(h.market.purchases(), vec![(1, 400)]);
    let status = h.engine.status();
    assert_eq!(status.budget.total_spent, 400);
    assert_eq!(status.budget.remaining, 4600);
    assert_eq!(status.stats.purchases_filled, 1);
    assert_eq!(status.portfolio.purchases, 1);
    assert_eq!(status.portfolio.estimated_profit, 600);
}

#[tokio::test]
async fn test_stop_during_fetch_prevents_purchase() {
    let market = MockMarket::with_items(vec![cap(1), cap(2)]);
    market.hold_fetches();
    let h = harness(
        "kill",
        market,
        None,
        options(PurchaseMode::FullAuto, limits(1000, 5000), false),
    );

    h.engine.start().await.unwrap();
    h.market.fetch_started().await;

    let engine = Arc::clone(&h.engine);
    let stopper = tokio::spawn(async move { engine.stop().await });
    wait_for_state(&h.engine, Lifecycle::Stopped).await;
    assert!(!h.engine.guard().is_armed());

    h.market.release_fetch();
    stopper.await.unwrap().unwrap();

    assert_eq!(h.market.purchase_calls(), 0);
    assert_eq!(h.engine.status().budget.total_spent, 0);
    assert!(h.recorder.is_empty());
}

#[tokio::test]
async fn test_halts_after_consecutive_failures() {
    let market = MockMarket::with_items((1..=5).map(cap).collect());
    market.set_error("upstream 503");
    let h = harness(
        "halt",
        market,
        None,
        options(PurchaseMode::FullAuto, limits(1000, 5000), false),
    );

    h.engine.start().await.unwrap();
    wait_for_state(&h.engine, Lifecycle::Halted).await;

    let status = h.engine.status();
    assert!(status.halt_reason.as_deref().unwrap_or("").contains("upstream 503"));
    assert_eq!(status.budget.total_spent, 0);
    assert!(!h.engine.guard().is_armed());
    assert!(h.engine.stop().await.is_err());

    // Manual restart is allowed and clears the failure streak.
    h.market.clear_error();
    h.engine.start().await.unwrap();
    assert_eq!(h.engine.status().halt_reason, None);
    assert_eq!(h.engine.status().stats.consecutive_failures, 0);
    h.engine.stop().await.ok();
}

#[tokio::test]
async fn test_restart_preserves_ledger() {
    let dir = temp_state_dir();
    let store: Arc<dyn SessionStore> = Arc::new(JsonFileStore::new(&dir));

    let first = harness(
        "guild-1",
        MockMarket::with_items(vec![cap(7)]),
        Some(Arc::clone(&store)),
        options(PurchaseMode::FullAuto, limits(1000, 5000), true),
    );
    first.engine.start().await.unwrap();
    wait_for_cycles(&first.engine, 1).await;
    first.engine.stop().await.unwrap();
    assert_eq!(first.engine.status().budget.total_spent, 400);

    let second = harness(
        "guild-1",
        MockMarket::with_items(Vec::new()),
        Some(Arc::clone(&store)),
        options(PurchaseMode::FullAuto, limits(1000, 5000), true),
    );
    let budget = second.engine.status().budget;
    assert_eq!(budget.total_spent, 400);
    assert_eq!(budget.remaining, 4600);

    let other = harness(
        "guild-2",
        MockMarket::with_items(Vec::new()),
        Some(Arc::clone(&store)),
        options(PurchaseMode::FullAuto, limits(1000, 5000), true),
    );
    assert_eq!(other.engine.status().budget.total_spent, 0);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_projected_item_is_never_scored() {
    let mut projected = cap(1);
    projected.projected = true;
    let h = harness(
        "projected",
        MockMarket::with_items(vec![projected]),
        None,
        options(PurchaseMode::FullAuto, limits(1000, 5000), false),
    );

    h.engine.start().await.unwrap();
    wait_for_cycles(&h.engine, 1).await;
    h.engine.stop().await.unwrap();

    let stats = h.engine.status().stats;
    assert!(stats.items_rejected >= 1);
    assert_eq!(stats.items_scored, 0);
    assert!(h.recorder.is_empty());
    assert_eq!(h.market.purchase_calls(), 0);
}

#[tokio::test]
async fn test_alert_mode_alerts_once_per_run() {
    let h = harness(
        "alerts",
        MockMarket::with_items(vec![cap(1)]),
        None,
        options(PurchaseMode::AlertConfirm, limits(1000, 5000), false),
    );

    h.engine.start().await.unwrap();
    wait_for_cycles(&h.engine, 3).await;
    h.engine.stop().await.unwrap();

    assert_eq!(h.recorder.len(), 1);
    assert_eq!(h.recorder.records()[0].outcome, Outcome::Alerted);
    assert_eq!(h.market.purchase_calls(), 0);

    // A fresh run forgets what it already alerted on.
    let before = h.engine.status().stats.cycles;
    h.engine.start().await.unwrap();
    wait_for_cycles(&h.engine, before + 1).await;
    h.engine.stop().await.unwrap();
    assert_eq!(h.recorder.len(), 2);
}

#[tokio::test]
async fn test_pause_stops_polling() {
    let h = harness(
        "pause",
        MockMarket::with_items(Vec::new()),
        None,
        options(PurchaseMode::AlertConfirm, limits(1000, 5000), true),
    );

    h.engine.start().await.unwrap();
    wait_for_cycles(&h.engine, 1).await;
    h.engine.pause().unwrap();
    // Let any cycle already past its checks finish.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fetches = h.market.fetches();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.market.fetches(), fetches);

    h.engine.resume().unwrap();
    tokio::time::timeout(WAIT, async {
        while h.market.fetches() == fetches {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    h.engine.stop().await.unwrap();
}
