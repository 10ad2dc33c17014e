//! Test utilities: controllable clock, fault-injecting store, fake tab
//! platform, recording notifier, and polling assertions.
//!
//! Only compiled in test builds.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;

use crate::clock::Clock;
use crate::error::{PlatformError, StoreError, StoreResult};
use crate::models::{LiveTabRecord, Snapshot, SnapshotMetadata, SnapshotTrigger, TabId};
use crate::notify::{Notification, Notifier};
use crate::platform::{LiveTab, TabPlatform, TabStatus};
use crate::storage::{KvStore, MemoryStore, Scope};

/// 2026-02-06T13:12:33Z
pub const TEST_EPOCH_MILLIS: i64 = 1_770_383_553_000;

// ─────────────────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────────────────

/// Manually advanced clock. Monotonic and wall time move together.
pub struct TestClock {
    state: Mutex<(Instant, SystemTime)>,
}

impl TestClock {
    pub fn new() -> Self {
        Self::at_millis(TEST_EPOCH_MILLIS)
    }

    pub fn at_millis(millis: i64) -> Self {
        let wall = UNIX_EPOCH + Duration::from_millis(millis as u64);
        Self {
            state: Mutex::new((Instant::now(), wall)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap();
        state.0 += by;
        state.1 += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.state.lock().unwrap().0
    }

    fn now_utc(&self) -> SystemTime {
        self.state.lock().unwrap().1
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Set,
    Remove,
    Keys,
}

#[derive(Debug, Clone)]
enum FaultAction {
    Error,
    /// Only meaningful for `Get`: answer with this instead of the real value
    Return(Option<Value>),
    /// Sleep on tokio's clock, then run the call normally
    Delay(Duration),
}

#[derive(Debug, Clone)]
struct Fault {
    op: StoreOp,
    key_prefix: String,
    skip: usize,
    remaining: usize,
    action: FaultAction,
}

/// [`MemoryStore`] wrapper with scripted failures.
///
/// Faults match on operation and key prefix. `skip` lets the first N
/// matching calls through before the fault fires.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<(StoreOp, String)>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fail the next matching call once
    pub fn fail(&self, op: StoreOp, key_prefix: &str) {
        self.push(op, key_prefix, 0, 1, FaultAction::Error);
    }

    /// Let `skip` matching calls through, then fail one
    pub fn fail_nth(&self, op: StoreOp, key_prefix: &str, skip: usize) {
        self.push(op, key_prefix, skip, 1, FaultAction::Error);
    }

    /// Let `skip` matching reads through, then answer one with `value`
    pub fn corrupt_read(&self, key_prefix: &str, skip: usize, value: Option<Value>) {
        self.push(StoreOp::Get, key_prefix, skip, 1, FaultAction::Return(value));
    }

    /// Stall the next matching call by `by` before it runs
    pub fn delay(&self, op: StoreOp, key_prefix: &str, by: Duration) {
        self.push(op, key_prefix, 0, 1, FaultAction::Delay(by));
    }

    pub fn calls(&self) -> Vec<(StoreOp, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, op: StoreOp, key_prefix: &str, skip: usize, times: usize, action: FaultAction) {
        self.faults.lock().unwrap().push(Fault {
            op,
            key_prefix: key_prefix.to_string(),
            skip,
            remaining: times,
            action,
        });
    }

    fn check(&self, op: StoreOp, key: &str) -> Option<FaultAction> {
        self.calls.lock().unwrap().push((op, key.to_string()));

        let mut faults = self.faults.lock().unwrap();
        let mut fired = None;
        for fault in faults.iter_mut() {
            if fault.op != op || !key.starts_with(&fault.key_prefix) || fault.remaining == 0 {
                continue;
            }
            if fault.skip > 0 {
                fault.skip -= 1;
                continue;
            }
            if fault.remaining != usize::MAX {
                fault.remaining -= 1;
            }
            fired = Some(fault.action.clone());
            break;
        }
        faults.retain(|f| f.remaining > 0);
        fired
    }

    fn injected(op: StoreOp, key: &str) -> StoreError {
        StoreError::Unavailable(format!("injected {:?} failure for {}", op, key))
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, scope: Scope, key: &str) -> StoreResult<Option<Value>> {
        match self.check(StoreOp::Get, key) {
            Some(FaultAction::Error) => Err(Self::injected(StoreOp::Get, key)),
            Some(FaultAction::Return(value)) => Ok(value),
            Some(FaultAction::Delay(by)) => {
                tokio::time::sleep(by).await;
                self.inner.get(scope, key).await
            }
            None => self.inner.get(scope, key).await,
        }
    }

    async fn set(&self, scope: Scope, key: &str, value: Value) -> StoreResult<()> {
        match self.check(StoreOp::Set, key) {
            Some(FaultAction::Delay(by)) => {
                tokio::time::sleep(by).await;
                self.inner.set(scope, key, value).await
            }
            Some(_) => Err(Self::injected(StoreOp::Set, key)),
            None => self.inner.set(scope, key, value).await,
        }
    }

    async fn remove(&self, scope: Scope, key: &str) -> StoreResult<()> {
        match self.check(StoreOp::Remove, key) {
            Some(FaultAction::Delay(by)) => {
                tokio::time::sleep(by).await;
                self.inner.remove(scope, key).await
            }
            Some(_) => Err(Self::injected(StoreOp::Remove, key)),
            None => self.inner.remove(scope, key).await,
        }
    }

    async fn keys(&self, scope: Scope) -> StoreResult<Vec<String>> {
        match self.check(StoreOp::Keys, "") {
            Some(FaultAction::Delay(by)) => {
                tokio::time::sleep(by).await;
                self.inner.keys(scope).await
            }
            Some(_) => Err(Self::injected(StoreOp::Keys, "")),
            None => self.inner.keys(scope).await,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tab platform
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakePlatform {
    tabs: Mutex<Vec<LiveTab>>,
    fail_queries: Mutex<bool>,
    failing_discards: Mutex<HashSet<TabId>>,
    discarded: Mutex<Vec<TabId>>,
}

impl FakePlatform {
    pub fn with_tabs(tabs: Vec<LiveTab>) -> Self {
        let platform = Self::default();
        platform.set_tabs(tabs);
        platform
    }

    pub fn set_tabs(&self, tabs: Vec<LiveTab>) {
        *self.tabs.lock().unwrap() = tabs;
    }

    pub fn update_tab(&self, id: TabId, f: impl FnOnce(&mut LiveTab)) {
        if let Some(tab) = self.tabs.lock().unwrap().iter_mut().find(|t| t.id == id) {
            f(tab);
        }
    }

    pub fn remove_tab(&self, id: TabId) {
        self.tabs.lock().unwrap().retain(|t| t.id != id);
    }

    pub fn fail_queries(&self, fail: bool) {
        *self.fail_queries.lock().unwrap() = fail;
    }

    pub fn fail_discard(&self, id: TabId) {
        self.failing_discards.lock().unwrap().insert(id);
    }

    /// Ids successfully discarded, in call order
    pub fn discarded(&self) -> Vec<TabId> {
        self.discarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl TabPlatform for FakePlatform {
    async fn query_tabs(&self) -> Result<Vec<LiveTab>, PlatformError> {
        if *self.fail_queries.lock().unwrap() {
            return Err(PlatformError::Enumerate("injected failure".to_string()));
        }
        Ok(self.tabs.lock().unwrap().clone())
    }

    async fn discard(&self, tab_id: TabId) -> Result<(), PlatformError> {
        if self.failing_discards.lock().unwrap().contains(&tab_id) {
            return Err(PlatformError::Discard {
                tab_id,
                message: "injected failure".to_string(),
            });
        }
        let mut tabs = self.tabs.lock().unwrap();
        let tab = tabs
            .iter_mut()
            .find(|t| t.id == tab_id)
            .ok_or(PlatformError::TabNotFound(tab_id))?;
        tab.discarded = true;
        self.discarded.lock().unwrap().push(tab_id);
        Ok(())
    }
}

pub fn live_tab(id: TabId, url: &str) -> LiveTab {
    LiveTab {
        id,
        window_id: 1,
        index: id as u32,
        url: url.to_string(),
        title: format!("Tab {}", id),
        pinned: false,
        active: false,
        audible: false,
        discarded: false,
        status: TabStatus::Complete,
        fav_icon_url: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifications + fixtures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.sent.lock().unwrap().push(notification.clone());
    }
}

/// Minimal valid snapshot with `tab_count` open tabs
pub fn sample_snapshot(timestamp: i64, tab_count: usize) -> Snapshot {
    let tabs: Vec<LiveTabRecord> = (0..tab_count)
        .map(|i| live_tab(i as TabId + 1, &format!("https://example.com/{}", i)).to_record())
        .collect();
    Snapshot {
        id: crate::models::new_snapshot_id(timestamp),
        timestamp,
        session_id: "test-session".to_string(),
        version: "0.0.0".to_string(),
        workspaces: Vec::new(),
        metadata: SnapshotMetadata {
            trigger: SnapshotTrigger::Periodic,
            tab_count: tabs.len(),
            workspace_count: 0,
            created_at: crate::clock::format_millis(timestamp),
            skipped_internal_tabs: 0,
        },
        tabs,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Polling assertions
// ─────────────────────────────────────────────────────────────────────────────

/// Assert that an async condition eventually succeeds within a timeout.
///
/// Retries `f` every `interval` until it returns `Ok` or `timeout` elapses.
/// Measured on tokio's clock, so it also works under `start_paused`.
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = tokio::time::Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return value,
            Err(e) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    panic!(
                        "Timeout waiting for {}\n\
                         Duration: {:?}\n\
                         Attempts: {}\n\
                         Last error: {}",
                        desc, elapsed, attempt, e
                    );
                }

                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Boolean-predicate variant of [`assert_eventually`]
pub async fn assert_eventually_bool<F, Fut>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    assert_eventually(desc, timeout, interval, || {
        let fut = f();
        async move {
            if fut.await {
                Ok(())
            } else {
                Err("condition never became true")
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_flaky_store_skip_then_fail_once() {
        let store = FlakyStore::new();
        store.fail_nth(StoreOp::Set, "k", 1);

        assert!(store.set(Scope::Local, "k1", json!(1)).await.is_ok());
        assert!(store.set(Scope::Local, "k2", json!(2)).await.is_err());
        assert!(store.set(Scope::Local, "k3", json!(3)).await.is_ok());
        assert!(store.set(Scope::Local, "other", json!(4)).await.is_ok());
    }

    #[tokio::test]
    async fn test_flaky_store_corrupt_read() {
        let store = FlakyStore::new();
        store.set(Scope::Local, "k", json!("real")).await.unwrap();
        store.corrupt_read("k", 0, Some(json!("fake")));

        assert_eq!(store.get(Scope::Local, "k").await.unwrap(), Some(json!("fake")));
        assert_eq!(store.get(Scope::Local, "k").await.unwrap(), Some(json!("real")));
    }

    #[test]
    fn test_clock_advances_both_timelines() {
        let clock = TestClock::new();
        let (mono, millis) = (clock.now(), clock.now_millis());
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - mono, Duration::from_secs(5));
        assert_eq!(clock.now_millis() - millis, 5_000);
    }

    #[tokio::test]
    #[should_panic(expected = "Timeout waiting for never true")]
    async fn test_assert_eventually_bool_times_out() {
        assert_eventually_bool(
            "never true",
            Duration::from_millis(200),
            Duration::from_millis(50),
            || async { false },
        )
        .await;
    }
}
