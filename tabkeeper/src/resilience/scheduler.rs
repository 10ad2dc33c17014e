//! Auto-save scheduler
//!
//! `Uninitialized -> Scheduled -> Disabled -> Scheduled`. While `Scheduled`
//! a periodic ticker spawns snapshot cycles without awaiting them. Cycles are
//! debounced against the previous attempt, and consecutive failures push the
//! scheduler into a timed cooldown after which it reinitializes itself.
//!
//! All mutable state lives in one [`SchedulerInner`] behind a std mutex that
//! is never held across an await. Each timer owns a cancellation token.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::capture::SnapshotCapture;
use super::store::SnapshotStore;
use crate::clock::Clock;
use crate::error::{SnapshotError, StoreResult};
use crate::models::{Snapshot, SnapshotTrigger};
use crate::settings::{AutoSaveSettings, Settings};
use crate::storage::KvStore;

/// Minimum spacing between two cycle attempts
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(5);
/// Consecutive failed cycles before entering cooldown
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;
/// How long the scheduler stays disabled after repeated failures
pub const FAILURE_COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Uninitialized,
    Scheduled,
    Disabled,
}

/// Why a cycle did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InProgress,
    Debounced,
    CoolingDown,
    DisabledBySettings,
    ShutDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Saved(String),
    Skipped(SkipReason),
    Failed,
}

/// Reported by `get_auto_save_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSaveStatus {
    pub enabled: bool,
    pub in_progress: bool,
    pub failure_count: u32,
    pub disabled_until: Option<i64>,
    pub last_attempt_time: Option<i64>,
    pub state: SchedulerState,
    pub last_success_time: Option<i64>,
}

#[derive(Debug)]
struct SchedulerInner {
    state: SchedulerState,
    enabled: bool,
    initializing: bool,
    in_progress: bool,
    failure_count: u32,
    /// Epoch millis; set only by failure cooldown
    disabled_until: Option<i64>,
    last_attempt: Option<Instant>,
    last_attempt_time: Option<i64>,
    last_success_time: Option<i64>,
    tick_token: Option<CancellationToken>,
    reenable_token: Option<CancellationToken>,
    shut_down: bool,
}

impl SchedulerInner {
    fn new() -> Self {
        Self {
            state: SchedulerState::Uninitialized,
            enabled: false,
            initializing: false,
            in_progress: false,
            failure_count: 0,
            disabled_until: None,
            last_attempt: None,
            last_attempt_time: None,
            last_success_time: None,
            tick_token: None,
            reenable_token: None,
            shut_down: false,
        }
    }

    fn cancel_tick(&mut self) {
        if let Some(token) = self.tick_token.take() {
            token.cancel();
        }
    }

    fn cancel_reenable(&mut self) {
        if let Some(token) = self.reenable_token.take() {
            token.cancel();
        }
    }

    fn begin_attempt(&mut self, now: Instant, now_millis: i64) {
        self.in_progress = true;
        self.last_attempt = Some(now);
        self.last_attempt_time = Some(now_millis);
    }

    fn within_debounce(&self, now: Instant) -> bool {
        self.last_attempt
            .is_some_and(|last| now.saturating_duration_since(last) < DEBOUNCE_WINDOW)
    }

    fn cooling_down(&self) -> bool {
        self.state == SchedulerState::Disabled && self.disabled_until.is_some()
    }
}

pub struct AutoSaveScheduler {
    store: Arc<dyn KvStore>,
    snapshots: SnapshotStore,
    capture: SnapshotCapture,
    clock: Arc<dyn Clock>,
    inner: Mutex<SchedulerInner>,
}

impl AutoSaveScheduler {
    pub fn new(
        store: Arc<dyn KvStore>,
        snapshots: SnapshotStore,
        capture: SnapshotCapture,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            snapshots,
            capture,
            clock,
            inner: Mutex::new(SchedulerInner::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        // A panic while holding the lock leaves plain data behind; keep going
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> AutoSaveStatus {
        let inner = self.lock();
        AutoSaveStatus {
            enabled: inner.enabled,
            in_progress: inner.in_progress,
            failure_count: inner.failure_count,
            disabled_until: inner.disabled_until,
            last_attempt_time: inner.last_attempt_time,
            state: inner.state,
            last_success_time: inner.last_success_time,
        }
    }

    /// Read settings and (re)arm the periodic timer.
    ///
    /// Concurrent calls while one is in flight return immediately. On error
    /// the timer is cleared and the state is `Uninitialized`.
    pub async fn initialize(self: &Arc<Self>) -> StoreResult<()> {
        {
            let mut inner = self.lock();
            if inner.initializing || inner.shut_down {
                debug!("Scheduler initialization already in flight; skipping");
                return Ok(());
            }
            inner.initializing = true;
        }

        let loaded = Settings::load(self.store.as_ref()).await;

        let (token, interval) = {
            let mut inner = self.lock();
            inner.initializing = false;
            inner.cancel_tick();

            let settings = match loaded {
                Ok(settings) => settings.auto_save,
                Err(e) => {
                    inner.state = SchedulerState::Uninitialized;
                    warn!(error = %e, "Auto-save initialization failed");
                    return Err(e);
                }
            };

            inner.enabled = settings.enabled;
            inner.cancel_reenable();
            if inner.shut_down {
                return Ok(());
            }

            if !settings.enabled {
                inner.state = SchedulerState::Disabled;
                inner.disabled_until = None;
                info!("Auto-save disabled by settings");
                return Ok(());
            }

            let token = CancellationToken::new();
            inner.tick_token = Some(token.clone());
            inner.state = SchedulerState::Scheduled;
            (token, settings.interval())
        };

        info!(interval_secs = interval.as_secs(), "Auto-save scheduled");
        self.spawn_ticker(token, interval);
        Ok(())
    }

    fn spawn_ticker(self: &Arc<Self>, token: CancellationToken, period: Duration) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(scheduler) = weak.upgrade() else { break };
                        // The tick loop never waits on a cycle
                        tokio::spawn(async move {
                            scheduler.run_cycle().await;
                        });
                    }
                }
            }
            debug!("Auto-save ticker stopped");
        });
    }

    fn arm_reenable(self: &Arc<Self>, token: CancellationToken, cooldown: Duration) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(cooldown) => {
                    if let Some(scheduler) = weak.upgrade() {
                        info!("Auto-save cooldown elapsed; reinitializing");
                        if let Err(e) = scheduler.initialize().await {
                            warn!(error = %e, "Failed to reinitialize auto-save after cooldown");
                        }
                    }
                }
            }
        });
    }

    /// One periodic cycle. Every error is absorbed into failure bookkeeping.
    pub async fn run_cycle(self: &Arc<Self>) -> CycleOutcome {
        let now = self.clock.now();
        let now_millis = self.clock.now_millis();

        let skip = {
            let mut inner = self.lock();
            if inner.shut_down {
                Some(SkipReason::ShutDown)
            } else if inner.in_progress {
                Some(SkipReason::InProgress)
            } else if inner.within_debounce(now) {
                Some(SkipReason::Debounced)
            } else if inner.cooling_down() {
                Some(SkipReason::CoolingDown)
            } else {
                inner.begin_attempt(now, now_millis);
                None
            }
        };
        if let Some(reason) = skip {
            debug!(?reason, "Skipping auto-save cycle");
            return CycleOutcome::Skipped(reason);
        }

        // Settings may have changed since the tick fired
        match Settings::load(self.store.as_ref()).await {
            Ok(settings) if !settings.auto_save.enabled => {
                self.lock().in_progress = false;
                return CycleOutcome::Skipped(SkipReason::DisabledBySettings);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Auto-save cycle could not read settings");
                self.record_failure();
                return CycleOutcome::Failed;
            }
        }

        match self.snapshot_once(SnapshotTrigger::Periodic).await {
            Ok(snapshot) => {
                self.record_success().await;
                CycleOutcome::Saved(snapshot.id)
            }
            Err(e) => {
                warn!(error = %e, "Auto-save cycle failed");
                self.record_failure();
                CycleOutcome::Failed
            }
        }
    }

    /// Run one cycle now, bypassing debounce and the failure cooldown.
    ///
    /// A failure restores the failure count and cooldown marker that were in
    /// place before the call.
    pub async fn trigger_manual(self: &Arc<Self>) -> Result<Snapshot, SnapshotError> {
        let now = self.clock.now();
        let now_millis = self.clock.now_millis();

        let prior = {
            let mut inner = self.lock();
            if inner.in_progress {
                return Err(SnapshotError::Busy);
            }
            inner.begin_attempt(now, now_millis);
            (inner.failure_count, inner.disabled_until)
        };

        match self.snapshot_once(SnapshotTrigger::Manual).await {
            Ok(snapshot) => {
                info!(snapshot_id = %snapshot.id, "Manual snapshot saved");
                self.record_success().await;
                Ok(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "Manual snapshot failed");
                let (failure_count, disabled_until) = prior;
                let mut inner = self.lock();
                inner.in_progress = false;
                inner.failure_count = failure_count;
                inner.disabled_until = disabled_until;
                Err(e)
            }
        }
    }

    /// Capture, validate and commit. Purges partial artifacts on failure.
    async fn snapshot_once(&self, trigger: SnapshotTrigger) -> Result<Snapshot, SnapshotError> {
        let snapshot = self.capture.capture(trigger).await?;
        match self.snapshots.atomic_save(&snapshot).await {
            Ok(()) => Ok(snapshot),
            Err(e) => {
                if !matches!(e, SnapshotError::Validation(_)) {
                    if let Err(purge_err) = self.snapshots.purge_snapshot(&snapshot.id).await {
                        warn!(
                            snapshot_id = %snapshot.id,
                            error = %purge_err,
                            "Failed to purge snapshot after failed write"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    async fn record_success(self: &Arc<Self>) {
        let was_cooling_down = {
            let mut inner = self.lock();
            let was_cooling_down = inner.cooling_down();
            inner.in_progress = false;
            inner.failure_count = 0;
            inner.disabled_until = None;
            inner.last_success_time = Some(self.clock.now_millis());
            was_cooling_down
        };

        if was_cooling_down {
            info!("Snapshot succeeded during cooldown; resuming auto-save");
            if let Err(e) = self.initialize().await {
                warn!(error = %e, "Failed to resume auto-save");
            }
        }
    }

    fn record_failure(self: &Arc<Self>) {
        let reenable = {
            let mut inner = self.lock();
            inner.in_progress = false;
            inner.failure_count += 1;
            if inner.failure_count < MAX_CONSECUTIVE_FAILURES || inner.shut_down {
                None
            } else {
                let until = self.clock.now_millis()
                    + i64::try_from(FAILURE_COOLDOWN.as_millis()).unwrap_or(i64::MAX);
                inner.state = SchedulerState::Disabled;
                inner.disabled_until = Some(until);
                inner.cancel_tick();
                inner.cancel_reenable();
                let token = CancellationToken::new();
                inner.reenable_token = Some(token.clone());
                warn!(
                    failures = inner.failure_count,
                    disabled_until = until,
                    "Auto-save disabled after repeated failures"
                );
                Some(token)
            }
        };

        if let Some(token) = reenable {
            self.arm_reenable(token, FAILURE_COOLDOWN);
        }
    }

    /// Persist new auto-save settings and reinitialize from scratch
    pub async fn apply_settings(
        self: &Arc<Self>,
        settings: AutoSaveSettings,
    ) -> StoreResult<AutoSaveStatus> {
        Settings::update(self.store.as_ref(), |s| s.auto_save = settings).await?;
        {
            let mut inner = self.lock();
            inner.cancel_tick();
            inner.cancel_reenable();
            inner.failure_count = 0;
            inner.disabled_until = None;
        }
        self.initialize().await?;
        Ok(self.status())
    }

    /// Stop every timer. A cycle already running finishes on its own.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.shut_down = true;
        inner.cancel_tick();
        inner.cancel_reenable();
        debug!("Auto-save scheduler shut down");
    }
}
