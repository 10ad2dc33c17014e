//! In-process fakes for driving the library through its public seams

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use tabkeeper_lib::clock::Clock;
use tabkeeper_lib::error::{StoreError, StoreResult};
use tabkeeper_lib::models::TabId;
use tabkeeper_lib::notify::{Notification, Notifier};
use tabkeeper_lib::platform::{LiveTab, TabStatus};
use tabkeeper_lib::storage::{KvStore, MemoryStore, Scope};

/// 2026-02-06T13:12:33Z
pub const EPOCH_MILLIS: i64 = 1_770_383_553_000;

pub struct ManualClock {
    state: Mutex<(Instant, SystemTime)>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new((
                Instant::now(),
                UNIX_EPOCH + Duration::from_millis(EPOCH_MILLIS as u64),
            )),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap();
        state.0 += by;
        state.1 += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state.lock().unwrap().0
    }

    fn now_utc(&self) -> SystemTime {
        self.state.lock().unwrap().1
    }
}

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

/// Memory store whose writes to keys with a given prefix can be made to fail
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    /// (key prefix, remaining failures)
    failing_sets: Mutex<Vec<(String, usize)>>,
    writes: Mutex<Vec<String>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` writes to keys starting with `prefix`
    pub fn fail_sets(&self, prefix: &str, times: usize) {
        self.failing_sets
            .lock()
            .unwrap()
            .push((prefix.to_string(), times));
    }

    /// Every key written so far, in order
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, scope: Scope, key: &str) -> StoreResult<Option<Value>> {
        self.inner.get(scope, key).await
    }

    async fn set(&self, scope: Scope, key: &str, value: Value) -> StoreResult<()> {
        let fail = {
            let mut failing = self.failing_sets.lock().unwrap();
            match failing
                .iter_mut()
                .find(|(prefix, remaining)| *remaining > 0 && key.starts_with(prefix.as_str()))
            {
                Some((_, remaining)) => {
                    *remaining -= 1;
                    true
                }
                None => false,
            }
        };
        if fail {
            return Err(StoreError::Unavailable(format!("injected failure writing {}", key)));
        }
        self.writes.lock().unwrap().push(key.to_string());
        self.inner.set(scope, key, value).await
    }

    async fn remove(&self, scope: Scope, key: &str) -> StoreResult<()> {
        self.inner.remove(scope, key).await
    }

    async fn keys(&self, scope: Scope) -> StoreResult<Vec<String>> {
        self.inner.keys(scope).await
    }
}

pub fn tab(id: TabId, url: &str) -> LiveTab {
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
