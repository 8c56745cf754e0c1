//! The sniper engine: one polling loop per session.
//!
//! ```text
//! Idle ──start──▶ Running ──stop──▶ Stopped ──start──▶ Running
//!                  │  ▲
//!            pause │  │ resume          Running ──N failures──▶ Halted
//!                  ▼  │                 Halted ──start──▶ Running
//!                 Paused ──stop──▶ Stopped
//! ```
//!
//! Lifecycle lives in a `watch` channel so the loop wakes on every change.
//! The loop re-checks it after each blocking call and before every buy,
//! and `stop` disarms the budget guard in the same step that publishes the
//! new state.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::accountant::{Accountant, CycleReport, CycleTally, EngineStats};
use super::executor::{ExecutionOutcome, Executor, ExecutorSettings};
use super::guard::{BudgetGuard, BudgetLimits, BudgetSnapshot, Denial};
use super::portfolio::{Holding, Portfolio, PortfolioStats, PortfolioSummary};
use super::scanner::{Scanner, ScannerSettings};
use crate::market::{PurchaseSurface, SnapshotSource};
use crate::notify::{Alert, Notifier};
use crate::storage::{DecisionRecord, Outcome, Recorder, SessionStore};
use crate::strategy::policy::Action;
use crate::strategy::profile::StrategyProfile;
use crate::strategy::{Candidate, StrategyPipeline};
use crate::types::{validate_session_id, Lifecycle, PurchaseMode, Robux, SniperError};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);
const RECORD_TIMEOUT: Duration = Duration::from_secs(5);
/// How long `stop` waits for the loop to reach a checkpoint.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Settings & wiring
// ---------------------------------------------------------------------------

/// Operator-tunable settings, swapped as a whole and read once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeSettings {
    pub profile: StrategyProfile,
    pub mode: PurchaseMode,
    pub threshold: u8,
    pub poll_interval: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            profile: StrategyProfile::default(),
            mode: PurchaseMode::AlertConfirm,
            threshold: 70,
            poll_interval: Duration::from_secs(60),
            max_consecutive_failures: 3,
        }
    }
}

/// External collaborators of one session.
pub struct EngineDeps {
    pub source: Arc<dyn SnapshotSource>,
    /// May be `None` when the executor runs dry.
    pub surface: Option<Arc<dyn PurchaseSurface>>,
    pub recorder: Arc<dyn Recorder>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Option<Arc<dyn SessionStore>>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub settings: RuntimeSettings,
    pub limits: BudgetLimits,
    pub scanner: ScannerSettings,
    pub executor: ExecutorSettings,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Owned snapshot returned by `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub session_id: String,
    pub lifecycle: Lifecycle,
    pub strategy: String,
    pub profile: StrategyProfile,
    pub mode: PurchaseMode,
    pub threshold: u8,
    pub poll_interval_secs: u64,
    pub dry_run: bool,
    pub budget: BudgetSnapshot,
    pub halt_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub stats: EngineStats,
    pub portfolio: PortfolioStats,
}

struct CoreState {
    stats: EngineStats,
    halt_reason: Option<String>,
    /// (item_id, listing_price) already alerted on or bought this run.
    seen: HashSet<(u64, Robux)>,
    /// Alerted candidates the operator may still confirm, by item id.
    pending: HashMap<u64, Candidate>,
    task: Option<JoinHandle<()>>,
    /// Bumped on every start. Work begun under an older generation may
    /// finish but never authorizes another purchase.
    generation: u64,
    portfolio: Portfolio,
    started_at: Option<DateTime<Utc>>,
    last_report: Option<CycleReport>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SniperEngine {
    session_id: String,
    scanner: Scanner,
    executor: Executor,
    guard: Arc<BudgetGuard>,
    recorder: Arc<dyn Recorder>,
    notifier: Arc<dyn Notifier>,
    store: Option<Arc<dyn SessionStore>>,
    settings: RwLock<Arc<RuntimeSettings>>,
    lifecycle: watch::Sender<Lifecycle>,
    core: Mutex<CoreState>,
    /// Serialises start/stop so their joins never interleave.
    control: tokio::sync::Mutex<()>,
}

impl SniperEngine {
    /// Build an idle engine, restoring the session's ledger if one was saved.
    pub fn new(
        session_id: impl Into<String>,
        deps: EngineDeps,
        options: EngineOptions,
    ) -> anyhow::Result<Arc<Self>> {
        let session_id = session_id.into();
        validate_session_id(&session_id)?;
        options.limits.validate()?;
        options.settings.profile.validate()?;

        let guard = match &deps.store {
            Some(store) => match store.load(&session_id)? {
                Some(ledger) => BudgetGuard::restore(options.limits, ledger),
                None => BudgetGuard::new(options.limits),
            },
            None => BudgetGuard::new(options.limits),
        };
        // Disarmed until started.
        guard.disarm();

        let (lifecycle, _) = watch::channel(Lifecycle::Idle);

        info!(
            session = %session_id,
            strategy = %options.settings.profile.name,
            mode = %options.settings.mode,
            dry_run = options.executor.dry_run,
            "Session created"
        );

        Ok(Arc::new(Self {
            scanner: Scanner::new(deps.source, options.scanner),
            executor: Executor::new(deps.surface, options.executor),
            guard,
            recorder: deps.recorder,
            notifier: deps.notifier,
            store: deps.store,
            settings: RwLock::new(Arc::new(options.settings)),
            lifecycle,
            core: Mutex::new(CoreState {
                stats: EngineStats::default(),
                halt_reason: None,
                seen: HashSet::new(),
                pending: HashMap::new(),
                task: None,
                generation: 0,
                portfolio: Portfolio::default(),
                started_at: None,
                last_report: None,
            }),
            control: tokio::sync::Mutex::new(()),
            session_id,
        }))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Receiver that sees every lifecycle change.
    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    pub fn guard(&self) -> &Arc<BudgetGuard> {
        &self.guard
    }

    pub fn settings(&self) -> Arc<RuntimeSettings> {
        Arc::clone(&self.settings.read())
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.core.lock().last_report.clone()
    }

    fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Running, and still the run that `generation` belongs to.
    fn is_current(&self, generation: u64) -> bool {
        self.core.lock().generation == generation && self.is_running()
    }

    /// Holdings summary with up to `top` best and worst snipes.
    pub fn portfolio(&self, top: usize) -> PortfolioSummary {
        self.core.lock().portfolio.summary(top)
    }

    /// Atomically move to `to` if `allowed(current)`. Returns the old state.
    fn transition(
        &self,
        action: &'static str,
        allowed: impl Fn(Lifecycle) -> bool,
        to: Lifecycle,
        on_change: impl FnOnce(),
    ) -> Result<Lifecycle, SniperError> {
        let mut result = Err(SniperError::InvalidTransition { action, from: Lifecycle::Idle });
        let mut on_change = Some(on_change);
        self.lifecycle.send_if_modified(|state| {
            if allowed(*state) {
                result = Ok(*state);
                *state = to;
                if let Some(f) = on_change.take() {
                    f();
                }
                true
            } else {
                result = Err(SniperError::InvalidTransition { action, from: *state });
                false
            }
        });
        result
    }

    // -- Control operations ----------------------------------------------

    /// Start (or restart) the polling loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), SniperError> {
        let _ctl = self.control.lock().await;

        if !self.lifecycle().can_start() {
            return Err(SniperError::InvalidTransition { action: "start", from: self.lifecycle() });
        }

        // A halted loop may still be unwinding.
        let previous = self.core.lock().task.take();
        if let Some(handle) = previous {
            if tokio::time::timeout(JOIN_TIMEOUT, handle).await.is_err() {
                warn!(session = %self.session_id, "Previous loop still busy, starting anyway");
            }
        }

        let from = self.transition("start", |s| s.can_start(), Lifecycle::Running, || self.guard.arm())?;

        let generation = {
            let mut core = self.core.lock();
            core.seen.clear();
            core.pending.clear();
            core.halt_reason = None;
            core.stats.consecutive_failures = 0;
            core.generation += 1;
            core.started_at = Some(Utc::now());
            core.generation
        };

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.run_loop(generation).await });
        self.core.lock().task = Some(handle);

        info!(session = %self.session_id, from = ?from, "Engine started");
        Ok(())
    }

    /// Kill switch. Once this returns no new purchase can be authorized.
    pub async fn stop(&self) -> Result<(), SniperError> {
        let _ctl = self.control.lock().await;

        self.transition(
            "stop",
            |s| matches!(s, Lifecycle::Running | Lifecycle::Paused),
            Lifecycle::Stopped,
            || self.guard.disarm(),
        )?;
        info!(session = %self.session_id, "Stop requested, guard disarmed");

        let handle = self.core.lock().task.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(session = %self.session_id, error = %e, "Polling task failed"),
                Err(_) => warn!(
                    session = %self.session_id,
                    "Polling task did not reach a checkpoint in time; it will exit on its own"
                ),
            }
        }

        self.persist_ledger();
        info!(session = %self.session_id, "Engine stopped");
        Ok(())
    }

    pub fn pause(&self) -> Result<(), SniperError> {
        self.transition(
            "pause",
            |s| s == Lifecycle::Running,
            Lifecycle::Paused,
            || self.guard.disarm(),
        )?;
        info!(session = %self.session_id, "Engine paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), SniperError> {
        self.transition(
            "resume",
            |s| s == Lifecycle::Paused,
            Lifecycle::Running,
            || self.guard.arm(),
        )?;
        info!(session = %self.session_id, "Engine resumed");
        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        let settings = self.settings();
        let core = self.core.lock();
        EngineStatus {
            session_id: self.session_id.clone(),
            lifecycle: self.lifecycle(),
            strategy: settings.profile.name.clone(),
            profile: settings.profile.clone(),
            mode: settings.mode,
            threshold: settings.threshold,
            poll_interval_secs: settings.poll_interval.as_secs(),
            dry_run: self.executor.is_dry_run(),
            budget: self.guard.snapshot(),
            halt_reason: core.halt_reason.clone(),
            started_at: core.started_at,
            stats: core.stats.clone(),
            portfolio: core.portfolio.stats(),
        }
    }

    fn update_settings(&self, apply: impl FnOnce(&mut RuntimeSettings)) {
        let mut slot = self.settings.write();
        let mut next = RuntimeSettings::clone(&slot);
        apply(&mut next);
        *slot = Arc::new(next);
    }

    pub fn set_strategy(&self, profile: StrategyProfile) -> Result<(), SniperError> {
        profile.validate()?;
        info!(session = %self.session_id, strategy = %profile, "Strategy updated");
        self.update_settings(|s| s.profile = profile);
        Ok(())
    }

    pub fn set_mode(&self, mode: PurchaseMode) {
        info!(session = %self.session_id, mode = %mode, "Purchase mode updated");
        self.update_settings(|s| s.mode = mode);
    }

    pub fn set_threshold(&self, threshold: u8) -> Result<(), SniperError> {
        if threshold > 100 {
            return Err(SniperError::Config(format!(
                "Score threshold must be 0-100, got {threshold}"
            )));
        }
        info!(session = %self.session_id, threshold, "Score threshold updated");
        self.update_settings(|s| s.threshold = threshold);
        Ok(())
    }

    pub fn set_poll_interval(&self, secs: u64) -> Result<(), SniperError> {
        if secs == 0 {
            return Err(SniperError::Config("Poll interval must be positive".into()));
        }
        self.update_settings(|s| s.poll_interval = Duration::from_secs(secs));
        Ok(())
    }

    /// Change the per-item and total caps, keeping rate limits.
    pub fn set_budget(&self, max_price_per_item: Robux, total_budget: Robux) -> Result<(), SniperError> {
        let limits = BudgetLimits {
            max_price_per_item,
            total_budget,
            ..self.guard.limits()
        };
        self.guard.set_limits(limits)
    }

    pub fn set_limits(&self, limits: BudgetLimits) -> Result<(), SniperError> {
        self.guard.set_limits(limits)
    }

    /// Zero the ledger. Stats are kept.
    pub fn reset_budget(&self) {
        self.guard.reset();
        self.persist_ledger();
    }

    /// Zero the ledger, the session statistics and the portfolio.
    pub fn reset(&self) {
        self.reset_budget();
        let mut core = self.core.lock();
        core.stats = EngineStats::default();
        core.portfolio.clear();
        core.last_report = None;
        info!(session = %self.session_id, "Session statistics reset");
    }

    // -- Polling loop ----------------------------------------------------

    async fn run_loop(self: Arc<Self>, generation: u64) {
        let mut rx = self.lifecycle.subscribe();
        info!(session = %self.session_id, generation, "Polling loop started");

        loop {
            if self.core.lock().generation != generation {
                break;
            }
            let state = *rx.borrow_and_update();
            match state {
                Lifecycle::Running => {}
                Lifecycle::Paused => {
                    if rx.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                _ => break,
            }

            self.cycle(generation).await;

            let interval = self.settings().poll_interval;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(session = %self.session_id, generation, state = ?self.lifecycle(), "Polling loop exited");
    }

    /// One scan → filter → score → decide → buy → record pass.
    pub async fn run_cycle(&self) {
        let generation = self.core.lock().generation;
        self.cycle(generation).await;
    }

    async fn cycle(&self, generation: u64) {
        let settings = self.settings();

        let snapshots = match self.scanner.scan().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(session = %self.session_id, error = %e, "Source unavailable, skipping cycle");
                Accountant::skip(&mut self.core.lock().stats);
                return;
            }
        };

        if !self.is_current(generation) {
            info!(session = %self.session_id, "Lifecycle changed during fetch, abandoning cycle");
            return;
        }

        let mut tally = CycleTally { scanned: snapshots.len(), ..CycleTally::default() };

        let fresh: Vec<_> = {
            let core = self.core.lock();
            snapshots
                .into_iter()
                .filter(|s| !core.seen.contains(&(s.item_id, s.listing_price)))
                .collect()
        };

        let evaluation =
            StrategyPipeline::evaluate(fresh, &settings.profile, settings.mode, settings.threshold);
        tally.rejected = evaluation.rejections.len();
        tally.scored = evaluation.scored();
        tally.opportunities = evaluation.actionable().count();

        for candidate in &evaluation.candidates {
            if !self.is_current(generation) {
                info!(session = %self.session_id, "Engine left Running, dropping remaining candidates");
                break;
            }

            let outcome = match candidate.action {
                Action::Ignore => Outcome::Ignored,
                Action::Alert => self.alert(candidate).await,
                Action::AutoBuy => self.buy(candidate, generation).await,
            };

            tally.observe(&outcome);
            let streak = self.settle(candidate, &outcome, generation);
            self.record(candidate, &settings, outcome).await;

            if streak >= settings.max_consecutive_failures {
                self.halt_on_failures(streak, generation).await;
                break;
            }
        }

        let filled = tally.filled;
        let report = {
            let mut core = self.core.lock();
            let report = Accountant::reconcile(&mut core.stats, tally);
            core.last_report = Some(report.clone());
            report
        };
        debug!(session = %self.session_id, cycle = report.cycle_number, "Cycle finished");

        if filled > 0 {
            self.persist_ledger();
        }
    }

    /// Fold one cycle decision into session state. Returns the failure streak.
    fn settle(&self, candidate: &Candidate, outcome: &Outcome, generation: u64) -> u32 {
        let mut core = self.core.lock();
        if let Outcome::Filled { receipt } = outcome {
            core.portfolio.record(Holding::from_fill(candidate, receipt));
        }
        // A restart clears these; an older run must not refill them.
        if core.generation == generation
            && matches!(outcome, Outcome::Alerted | Outcome::Filled { .. } | Outcome::Stale)
        {
            core.seen
                .insert((candidate.snapshot.item_id, candidate.snapshot.listing_price));
            if *outcome == Outcome::Alerted {
                core.pending.insert(candidate.snapshot.item_id, candidate.clone());
            }
        }
        Accountant::observe(&mut core.stats, outcome)
    }

    async fn halt_on_failures(&self, streak: u32, generation: u64) {
        let last = {
            let core = self.core.lock();
            if core.generation != generation {
                return;
            }
            core.stats.last_failure.clone().unwrap_or_else(|| "unknown".into())
        };
        self.halt(format!("{streak} consecutive purchase failures (last: {last})"))
            .await;
    }

    /// Buy an alerted candidate on the operator's say-so.
    ///
    /// Goes through the same guard and executor as an auto-buy, so it is
    /// cancelled unless the engine is running.
    pub async fn confirm_purchase(&self, item_id: u64) -> Result<Outcome, SniperError> {
        let (candidate, generation) = {
            let core = self.core.lock();
            let candidate = core
                .pending
                .get(&item_id)
                .cloned()
                .ok_or(SniperError::NoPendingAlert(item_id))?;
            (candidate, core.generation)
        };
        let settings = self.settings();

        info!(session = %self.session_id, item_id, price = candidate.snapshot.listing_price, "Operator confirmed purchase");
        let outcome = self.buy(&candidate, generation).await;

        let mut tally = CycleTally::default();
        tally.observe(&outcome);
        let streak = {
            let mut core = self.core.lock();
            Accountant::absorb(&mut core.stats, &tally);
            match &outcome {
                Outcome::Filled { receipt } => {
                    core.portfolio.record(Holding::from_fill(&candidate, receipt));
                    core.pending.remove(&item_id);
                }
                Outcome::Stale => {
                    core.pending.remove(&item_id);
                }
                _ => {}
            }
            Accountant::observe(&mut core.stats, &outcome)
        };
        self.record(&candidate, &settings, outcome.clone()).await;

        if tally.filled > 0 {
            self.persist_ledger();
        }
        if streak >= settings.max_consecutive_failures {
            self.halt_on_failures(streak, generation).await;
        }
        Ok(outcome)
    }

    async fn alert(&self, candidate: &Candidate) -> Outcome {
        let alert = Alert::opportunity(&self.session_id, candidate);
        self.send_alert(&alert).await;
        Outcome::Alerted
    }

    async fn buy(&self, candidate: &Candidate, generation: u64) -> Outcome {
        let item_id = candidate.snapshot.item_id;
        let price = candidate.snapshot.listing_price;

        if !self.is_current(generation) {
            return Outcome::Cancelled;
        }

        let reservation = match self.guard.authorize(item_id, price) {
            Ok(r) => r,
            Err(Denial::Disarmed) => return Outcome::Cancelled,
            Err(denial) => {
                info!(session = %self.session_id, item_id, price, reason = %denial, "Purchase denied by budget guard");
                return Outcome::BudgetDenied { denial };
            }
        };
        // A stop and restart may have slipped in between the two checks.
        if !self.is_current(generation) {
            reservation.release();
            return Outcome::Cancelled;
        }

        info!(
            session = %self.session_id,
            item_id,
            price,
            score = format!("{:.1}", candidate.score.total),
            "Auto-buying"
        );

        match self.executor.execute(reservation).await {
            ExecutionOutcome::Filled(receipt) => {
                let alert = Alert::Purchased {
                    session_id: self.session_id.clone(),
                    receipt: receipt.clone(),
                };
                self.send_alert(&alert).await;
                Outcome::Filled { receipt }
            }
            ExecutionOutcome::Stale => Outcome::Stale,
            ExecutionOutcome::ExternalFailure(reason) => Outcome::ExternalFailure { reason },
        }
    }

    async fn halt(&self, reason: String) {
        let halted = self.transition(
            "halt",
            |s| matches!(s, Lifecycle::Running | Lifecycle::Paused),
            Lifecycle::Halted,
            || self.guard.disarm(),
        );
        if halted.is_err() {
            return;
        }

        error!(session = %self.session_id, reason = %reason, "Engine halted");
        self.core.lock().halt_reason = Some(reason.clone());
        self.persist_ledger();

        let alert = Alert::Halted { session_id: self.session_id.clone(), reason };
        self.send_alert(&alert).await;
    }

    async fn send_alert(&self, alert: &Alert) {
        match tokio::time::timeout(NOTIFY_TIMEOUT, self.notifier.notify(alert)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session = %self.session_id, error = %e, "Notification failed"),
            Err(_) => warn!(session = %self.session_id, "Notification timed out"),
        }
    }

    async fn record(&self, candidate: &Candidate, settings: &RuntimeSettings, outcome: Outcome) {
        let record = DecisionRecord {
            session_id: self.session_id.clone(),
            item_id: candidate.snapshot.item_id,
            item_name: candidate.snapshot.name.clone(),
            listing_price: candidate.snapshot.listing_price,
            score: candidate.score.total,
            tier: candidate.score.tier,
            action: candidate.action,
            strategy: candidate.score.strategy.clone(),
            mode: settings.mode,
            outcome,
            timestamp: Utc::now(),
        };

        match tokio::time::timeout(RECORD_TIMEOUT, self.recorder.record(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session = %self.session_id, error = %e, "Failed to record decision"),
            Err(_) => warn!(session = %self.session_id, "Recording decision timed out"),
        }
    }

    fn persist_ledger(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&self.session_id, &self.guard.ledger_snapshot()) {
            error!(session = %self.session_id, error = %e, "Failed to save ledger");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
