//! Snapshot store: atomic write protocol, retention, purge
//!
//! The canonical list lives under `autoSaveSnapshots`, newest first. A write
//! goes through a per-snapshot temporary key first:
//!
//! 1. capture the canonical pre-image and the retention limits
//! 2. write the snapshot to `autoSaveSnapshotTmp_<id>`
//! 3. read the temp key back and verify the id
//! 4. build `[new, ...old]` with expired and over-count entries dropped
//! 5. replace the canonical list
//! 6. read the canonical list back and verify its head
//! 7. remove the temp key
//!
//! A failure in 2–6 removes the temp key and, when step 5 was reached, puts
//! the pre-image back, so callers observe either the new head or the exact
//! previous list.
//!
//! Every mutation of the canonical list or the temp keys runs under one
//! write lock, shared by all clones of a [`SnapshotStore`].

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::validation::validate_snapshot;
use crate::clock::Clock;
use crate::error::{
    AtomicWriteCause, AtomicWriteError, IntegrityError, SnapshotError, StoreResult,
};
use crate::models::Snapshot;
use crate::settings::{AutoSaveSettings, Settings};
use crate::storage::{snapshot_temp_key, KvStore, Scope, SNAPSHOTS_KEY, SNAPSHOT_TEMP_PREFIX};

/// Retention limits applied on every write and cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub max_count: usize,
    pub max_age_millis: i64,
}

impl From<&AutoSaveSettings> for Retention {
    fn from(settings: &AutoSaveSettings) -> Self {
        Self {
            max_count: settings.max_snapshots(),
            max_age_millis: i64::try_from(settings.max_snapshot_age().as_millis())
                .unwrap_or(i64::MAX),
        }
    }
}

impl Retention {
    /// Drop entries older than the age limit, then cap the count.
    /// Entries without a readable id or timestamp are dropped too.
    fn apply(&self, entries: Vec<Value>, now: i64) -> Vec<Value> {
        entries
            .into_iter()
            .filter(|entry| match (entry_id(entry), entry_timestamp(entry)) {
                (Some(_), Some(ts)) => now.saturating_sub(ts) <= self.max_age_millis,
                _ => false,
            })
            .take(self.max_count)
            .collect()
    }
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("id").and_then(Value::as_str)
}

fn entry_timestamp(entry: &Value) -> Option<i64> {
    entry.get("timestamp").and_then(Value::as_i64)
}

fn as_entries(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(entries)) => entries.clone(),
        Some(other) => {
            warn!(
                kind = %value_kind(other),
                "Canonical snapshot list is not an array; treating as empty"
            );
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    write_lock: Arc<Mutex<()>>,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn retention(&self) -> StoreResult<Retention> {
        let settings = Settings::load(self.store.as_ref()).await?;
        Ok(Retention::from(&settings.auto_save))
    }

    /// Validate and atomically prepend `snapshot` to the canonical list.
    ///
    /// Invalid snapshots never reach the store. On `AtomicWrite` errors the
    /// canonical list is unchanged; callers should still
    /// [`purge_snapshot`](Self::purge_snapshot) the id.
    pub async fn atomic_save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let value = validate_snapshot(snapshot)?;
        let _write = self.write_lock.lock().await;
        let retention = self.retention().await?;
        self.write_protocol(&snapshot.id, value, retention).await?;
        debug!(snapshot_id = %snapshot.id, "Snapshot committed");
        Ok(())
    }

    async fn write_protocol(
        &self,
        snapshot_id: &str,
        value: Value,
        retention: Retention,
    ) -> Result<(), AtomicWriteError> {
        let fail = |cause: AtomicWriteCause| AtomicWriteError {
            snapshot_id: snapshot_id.to_string(),
            cause,
        };

        let pre_image = self
            .store
            .get(Scope::Local, SNAPSHOTS_KEY)
            .await
            .map_err(|e| fail(e.into()))?;

        let temp_key = snapshot_temp_key(snapshot_id);
        let mut canonical_touched = false;

        let result = self
            .write_steps(
                snapshot_id,
                &temp_key,
                value,
                pre_image.as_ref(),
                retention,
                &mut canonical_touched,
            )
            .await;

        match result {
            Ok(()) => {
                if let Err(e) = self.store.remove(Scope::Local, &temp_key).await {
                    // Left for the startup purge
                    warn!(error = %e, key = %temp_key, "Failed to remove snapshot temp key");
                }
                Ok(())
            }
            Err(cause) => {
                warn!(
                    snapshot_id = %snapshot_id,
                    error = %cause,
                    canonical_touched,
                    "Atomic snapshot write failed; rolling back"
                );
                if let Err(e) = self.store.remove(Scope::Local, &temp_key).await {
                    warn!(error = %e, key = %temp_key, "Failed to remove snapshot temp key");
                }
                if canonical_touched {
                    if let Err(e) = self.restore_pre_image(pre_image).await {
                        warn!(error = %e, "Failed to restore canonical snapshot list");
                    }
                }
                Err(fail(cause))
            }
        }
    }

    async fn write_steps(
        &self,
        snapshot_id: &str,
        temp_key: &str,
        value: Value,
        pre_image: Option<&Value>,
        retention: Retention,
        canonical_touched: &mut bool,
    ) -> Result<(), AtomicWriteCause> {
        self.store.set(Scope::Local, temp_key, value.clone()).await?;

        let stored = self.store.get(Scope::Local, temp_key).await?;
        let found = stored.as_ref().and_then(entry_id);
        if found != Some(snapshot_id) {
            return Err(IntegrityError::TempMismatch {
                key: temp_key.to_string(),
                expected: snapshot_id.to_string(),
                found: found.map(str::to_string),
            }
            .into());
        }

        let now = self.clock.now_millis();
        let mut entries = Vec::with_capacity(retention.max_count);
        entries.push(value);
        let old = retention.apply(as_entries(pre_image), now);
        entries.extend(old);
        entries.truncate(retention.max_count);

        // Set before the write: a failed write may still have landed
        *canonical_touched = true;
        self.store
            .set(Scope::Local, SNAPSHOTS_KEY, Value::Array(entries))
            .await?;

        let canonical = self.store.get(Scope::Local, SNAPSHOTS_KEY).await?;
        let head = canonical
            .as_ref()
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .and_then(entry_id);
        if head != Some(snapshot_id) {
            return Err(IntegrityError::CanonicalMismatch {
                expected: snapshot_id.to_string(),
                found: head.map(str::to_string),
            }
            .into());
        }

        Ok(())
    }

    async fn restore_pre_image(&self, pre_image: Option<Value>) -> StoreResult<()> {
        match pre_image {
            Some(value) => self.store.set(Scope::Local, SNAPSHOTS_KEY, value).await,
            None => self.store.remove(Scope::Local, SNAPSHOTS_KEY).await,
        }
    }

    /// Remove every artifact written under `snapshot_id`: its temp key and
    /// any canonical entry. Writes the canonical list only if it changes.
    pub async fn purge_snapshot(&self, snapshot_id: &str) -> StoreResult<()> {
        let _write = self.write_lock.lock().await;
        self.store
            .remove(Scope::Local, &snapshot_temp_key(snapshot_id))
            .await?;

        let Some(Value::Array(entries)) = self.store.get(Scope::Local, SNAPSHOTS_KEY).await? else {
            return Ok(());
        };
        let before = entries.len();
        let kept: Vec<Value> = entries
            .into_iter()
            .filter(|entry| entry_id(entry) != Some(snapshot_id))
            .collect();
        if kept.len() != before {
            info!(snapshot_id = %snapshot_id, "Purged snapshot from canonical list");
            self.store
                .set(Scope::Local, SNAPSHOTS_KEY, Value::Array(kept))
                .await?;
        }
        Ok(())
    }

    /// All readable snapshots, newest first. Malformed entries are skipped.
    pub async fn list_snapshots(&self) -> StoreResult<Vec<Snapshot>> {
        let value = self.store.get(Scope::Local, SNAPSHOTS_KEY).await?;
        let snapshots = as_entries(value.as_ref())
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| match serde_json::from_value::<Snapshot>(entry) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(index, error = %e, "Skipping malformed snapshot entry");
                    None
                }
            })
            .collect();
        Ok(snapshots)
    }

    pub async fn latest_snapshot(&self) -> StoreResult<Option<Snapshot>> {
        Ok(self.list_snapshots().await?.into_iter().next())
    }

    /// Snapshots matching `ids`, in request order. Unknown ids are omitted.
    pub async fn get_snapshots(&self, ids: &[String]) -> StoreResult<Vec<Snapshot>> {
        let snapshots = self.list_snapshots().await?;
        Ok(ids
            .iter()
            .filter_map(|id| snapshots.iter().find(|s| &s.id == id).cloned())
            .collect())
    }

    /// Apply retention to the canonical list. Returns how many entries were
    /// dropped; nothing is written when that is zero.
    pub async fn cleanup_expired(&self) -> StoreResult<usize> {
        let _write = self.write_lock.lock().await;
        let retention = self.retention().await?;
        let Some(value) = self.store.get(Scope::Local, SNAPSHOTS_KEY).await? else {
            return Ok(0);
        };
        let entries = as_entries(Some(&value));
        let before = entries.len();
        let kept = retention.apply(entries, self.clock.now_millis());
        let removed = before - kept.len();

        if removed > 0 || !value.is_array() {
            self.store
                .set(Scope::Local, SNAPSHOTS_KEY, Value::Array(kept))
                .await?;
            info!(removed, "Cleaned up expired snapshots");
        }
        Ok(removed)
    }

    /// Remove the canonical list and every temp key
    pub async fn clear_all(&self) -> StoreResult<()> {
        let _write = self.write_lock.lock().await;
        self.store.remove(Scope::Local, SNAPSHOTS_KEY).await?;
        let temps = self.remove_temp_keys().await?;
        info!(temp_keys = temps, "Cleared all recovery data");
        Ok(())
    }

    /// Remove temp keys left behind by a process that died mid-write
    pub async fn purge_orphaned_temps(&self) -> StoreResult<usize> {
        let _write = self.write_lock.lock().await;
        self.remove_temp_keys().await
    }

    async fn remove_temp_keys(&self) -> StoreResult<usize> {
        let keys = self.store.keys(Scope::Local).await?;
        let mut removed = 0;
        for key in keys.iter().filter(|k| k.starts_with(SNAPSHOT_TEMP_PREFIX)) {
            self.store.remove(Scope::Local, key).await?;
            removed += 1;
        }
        if removed > 0 {
            info!(removed, "Purged orphaned snapshot temp keys");
        }
        Ok(removed)
    }
}
