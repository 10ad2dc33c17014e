//! Periodic inactivity sweep and tab suspension
//!
//! A sweep:
//! 1. loads live tabs and activity records, pruning records of closed tabs
//! 2. creates records for tabs without one; those tabs sit this sweep out
//! 3. skips excluded tabs
//! 4. collects tabs idle past the timeout
//! 5. optionally warns the user and waits [`SUSPEND_NOTIFY_DELAY`], then
//!    re-checks every candidate against fresh state
//! 6. discards each remaining candidate, tolerating per-tab failures, and
//!    marks the successful ones suspended

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::activity::{prune_closed, ActivityTracker};
use super::exclusion::should_exclude_from_auto_close;
use crate::clock::Clock;
use crate::error::{InactivityError, StoreResult};
use crate::models::{ActivityMap, TabActivity, TabId};
use crate::notify::{Notification, Notifier};
use crate::platform::{LiveTab, TabEvent, TabPlatform};
use crate::settings::{InactivitySettings, Settings};
use crate::storage::KvStore;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Grace period between the suspend warning and the suspension
pub const SUSPEND_NOTIFY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub examined: usize,
    pub excluded: usize,
    /// Tabs seen for the first time this sweep
    pub initialized: usize,
    pub pruned: usize,
    pub candidates: usize,
    /// Candidates dropped by the post-warning re-check
    pub reprieved: usize,
    pub suspended: Vec<TabId>,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    AlreadyRunning,
    Disabled,
    /// Torn down or reconfigured during the warning delay
    Cancelled,
    Completed(SweepReport),
}

#[derive(Debug)]
struct MonitorInner {
    sweeping: bool,
    ticker: Option<CancellationToken>,
    /// Cancels any sweep waiting out the warning delay
    generation: CancellationToken,
    shut_down: bool,
}

/// Clears the reentrancy flag however the sweep ends
struct SweepGuard<'a>(&'a Mutex<MonitorInner>);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.0.lock().unwrap_or_else(|e| e.into_inner());
        inner.sweeping = false;
    }
}

pub struct InactivityMonitor {
    store: Arc<dyn KvStore>,
    platform: Arc<dyn TabPlatform>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    tracker: ActivityTracker,
    inner: Mutex<MonitorInner>,
}

impl InactivityMonitor {
    pub fn new(
        store: Arc<dyn KvStore>,
        platform: Arc<dyn TabPlatform>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let tracker = ActivityTracker::new(store.clone(), clock.clone());
        Arc::new(Self {
            store,
            platform,
            notifier,
            clock,
            tracker,
            inner: Mutex::new(MonitorInner {
                sweeping: false,
                ticker: None,
                generation: CancellationToken::new(),
                shut_down: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    pub fn is_running(&self) -> bool {
        self.lock().ticker.is_some()
    }

    pub async fn handle_tab_event(&self, event: &TabEvent) -> StoreResult<()> {
        self.tracker.handle_event(event).await
    }

    /// Arm the sweep ticker if the feature is enabled
    pub async fn start(self: &Arc<Self>) -> StoreResult<()> {
        let settings = Settings::load(self.store.as_ref()).await?.inactivity;

        let token = {
            let mut inner = self.lock();
            if let Some(ticker) = inner.ticker.take() {
                ticker.cancel();
            }
            if inner.shut_down || !settings.enabled {
                debug!(enabled = settings.enabled, "Inactivity monitor not started");
                return Ok(());
            }
            let token = CancellationToken::new();
            inner.ticker = Some(token.clone());
            token
        };

        info!(
            timeout_minutes = settings.timeout_minutes,
            "Inactivity monitor started"
        );
        self.spawn_ticker(token);
        Ok(())
    }

    fn spawn_ticker(self: &Arc<Self>, token: CancellationToken) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + SWEEP_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(monitor) = weak.upgrade() else { break };
                        tokio::spawn(async move {
                            if let Err(e) = monitor.run_sweep().await {
                                warn!(error = %e, "Inactivity sweep failed");
                            }
                        });
                    }
                }
            }
        });
    }

    /// Persist new settings, cancel any pending suspension, and restart
    pub async fn apply_settings(self: &Arc<Self>, settings: InactivitySettings) -> StoreResult<()> {
        Settings::update(self.store.as_ref(), |s| s.inactivity = settings).await?;
        self.renew_generation();
        self.start().await
    }

    fn renew_generation(&self) {
        let mut inner = self.lock();
        inner.generation.cancel();
        inner.generation = CancellationToken::new();
    }

    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.shut_down = true;
        if let Some(ticker) = inner.ticker.take() {
            ticker.cancel();
        }
        inner.generation.cancel();
        debug!("Inactivity monitor shut down");
    }

    pub async fn run_sweep(&self) -> Result<SweepOutcome, InactivityError> {
        let generation = {
            let mut inner = self.lock();
            if inner.sweeping {
                return Ok(SweepOutcome::AlreadyRunning);
            }
            if inner.shut_down {
                return Ok(SweepOutcome::Cancelled);
            }
            inner.sweeping = true;
            inner.generation.clone()
        };
        let _guard = SweepGuard(&self.inner);

        let settings = Settings::load(self.store.as_ref()).await?.inactivity;
        if !settings.enabled {
            return Ok(SweepOutcome::Disabled);
        }

        let mut report = SweepReport::default();
        let tabs = self.platform.query_tabs().await?;
        let now = self.clock.now_millis();

        let live: HashSet<TabId> = tabs.iter().map(|t| t.id).collect();
        let (pruned, initialized, activity) = self
            .tracker
            .update(|activity| {
                let pruned = prune_closed(activity, &live);
                let mut initialized = HashSet::new();
                for tab in &tabs {
                    if !activity.contains_key(&tab.id) {
                        activity.insert(tab.id, TabActivity::new(now));
                        initialized.insert(tab.id);
                    }
                }
                (pruned, initialized, activity.clone())
            })
            .await?;
        report.pruned = pruned;
        report.initialized = initialized.len();

        let mut candidates = Vec::new();
        for tab in &tabs {
            report.examined += 1;

            if initialized.contains(&tab.id) {
                continue;
            }

            if should_exclude_from_auto_close(tab, &settings) {
                report.excluded += 1;
                continue;
            }

            if activity
                .get(&tab.id)
                .is_some_and(|record| is_candidate(record, now, &settings))
            {
                candidates.push(tab.id);
            }
        }

        report.candidates = candidates.len();
        if candidates.is_empty() {
            debug!(?report, "Inactivity sweep found nothing to suspend");
            return Ok(SweepOutcome::Completed(report));
        }

        if settings.notify_before_suspend {
            self.notifier.notify(&Notification::suspend_warning(
                candidates.len(),
                SUSPEND_NOTIFY_DELAY.as_secs(),
            ));

            tokio::select! {
                _ = generation.cancelled() => {
                    info!(candidates = candidates.len(), "Pending suspension cancelled");
                    return Ok(SweepOutcome::Cancelled);
                }
                _ = tokio::time::sleep(SUSPEND_NOTIFY_DELAY) => {}
            }

            let before = candidates.len();
            candidates = self.revalidate(candidates).await?;
            report.reprieved = before - candidates.len();
        }

        for tab_id in candidates {
            match self.platform.discard(tab_id).await {
                Ok(()) => report.suspended.push(tab_id),
                Err(e) => {
                    warn!(tab_id, error = %e, "Failed to suspend tab");
                    report.failed += 1;
                }
            }
        }
        self.tracker.mark_suspended(&report.suspended).await?;

        info!(
            suspended = report.suspended.len(),
            failed = report.failed,
            reprieved = report.reprieved,
            "Inactivity sweep finished"
        );
        Ok(SweepOutcome::Completed(report))
    }

    /// Keep only candidates that still qualify against fresh state
    async fn revalidate(&self, candidates: Vec<TabId>) -> Result<Vec<TabId>, InactivityError> {
        let settings = Settings::load(self.store.as_ref()).await?.inactivity;
        if !settings.enabled {
            return Ok(Vec::new());
        }
        let tabs = self.platform.query_tabs().await?;
        let activity = self.tracker.load().await?;
        let now = self.clock.now_millis();

        Ok(candidates
            .into_iter()
            .filter(|id| still_qualifies(*id, &tabs, &activity, now, &settings))
            .collect())
    }
}

fn is_candidate(record: &TabActivity, now: i64, settings: &InactivitySettings) -> bool {
    let timeout = i64::try_from(settings.timeout().as_millis()).unwrap_or(i64::MAX);
    !record.suspended && record.idle_millis(now) > timeout
}

fn still_qualifies(
    tab_id: TabId,
    tabs: &[LiveTab],
    activity: &ActivityMap,
    now: i64,
    settings: &InactivitySettings,
) -> bool {
    let Some(tab) = tabs.iter().find(|t| t.id == tab_id) else {
        return false;
    };
    let Some(record) = activity.get(&tab_id) else {
        return false;
    };
    !should_exclude_from_auto_close(tab, settings) && is_candidate(record, now, settings)
}
