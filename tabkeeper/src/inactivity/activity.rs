//! Per-tab last-access bookkeeping under the `tabActivity` key

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::models::{ActivityMap, TabActivity, TabId};
use crate::platform::TabEvent;
use crate::storage::{self, KvStore, Scope, TAB_ACTIVITY_KEY};

/// Owns every read-modify-write of `tabActivity`. Mutations go through
/// [`update`](Self::update), which holds the tracker's write lock from the
/// load to the save so concurrent events and sweeps never drop each
/// other's changes.
#[derive(Clone)]
pub struct ActivityTracker {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ActivityTracker {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Current records. A corrupt document is discarded rather than
    /// blocking every later sweep.
    pub async fn load(&self) -> StoreResult<ActivityMap> {
        match storage::load(self.store.as_ref(), Scope::Local, TAB_ACTIVITY_KEY).await {
            Ok(map) => Ok(map.unwrap_or_default()),
            Err(StoreError::Json { source, .. }) => {
                warn!(error = %source, "Discarding unreadable tab activity records");
                Ok(ActivityMap::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply `f` to freshly loaded records and save them if they changed
    pub async fn update<R>(&self, f: impl FnOnce(&mut ActivityMap) -> R) -> StoreResult<R> {
        let _write = self.write_lock.lock().await;
        let mut activity = self.load().await?;
        let before = activity.clone();
        let result = f(&mut activity);
        if activity != before {
            storage::save(self.store.as_ref(), Scope::Local, TAB_ACTIVITY_KEY, &activity).await?;
        }
        Ok(result)
    }

    /// Refresh (or create) the record for `tab_id`
    pub async fn record_access(&self, tab_id: TabId) -> StoreResult<TabActivity> {
        let now = self.clock.now_millis();
        self.update(|activity| {
            *activity
                .entry(tab_id)
                .and_modify(|r| r.touch(now))
                .or_insert_with(|| TabActivity::new(now))
        })
        .await
    }

    /// Drop the record of a closed tab. Returns whether one existed.
    pub async fn forget(&self, tab_id: TabId) -> StoreResult<bool> {
        self.update(|activity| activity.remove(&tab_id).is_some()).await
    }

    pub async fn handle_event(&self, event: &TabEvent) -> StoreResult<()> {
        match event {
            TabEvent::Removed { tab_id } => {
                self.forget(*tab_id).await?;
            }
            event if event.is_access() => {
                self.record_access(event.tab_id()).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Mark tabs as suspended against freshly loaded records
    pub async fn mark_suspended(&self, tab_ids: &[TabId]) -> StoreResult<()> {
        if tab_ids.is_empty() {
            return Ok(());
        }
        let now = self.clock.now_millis();
        self.update(|activity| {
            for tab_id in tab_ids {
                activity
                    .entry(*tab_id)
                    .or_insert_with(|| TabActivity::new(now))
                    .mark_suspended(now);
            }
        })
        .await
    }
}

/// Drop records of tabs that are no longer open. Returns how many went.
pub fn prune_closed(activity: &mut ActivityMap, live: &HashSet<TabId>) -> usize {
    let before = activity.len();
    activity.retain(|id, _| live.contains(id));
    let pruned = before - activity.len();
    if pruned > 0 {
        debug!(pruned, "Pruned activity records of closed tabs");
    }
    pruned
}
