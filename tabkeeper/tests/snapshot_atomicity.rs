//! Integration tests: the canonical snapshot list survives failed writes
//! and persists across store reopen.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::fakes::{tab, FailingStore, ManualClock, EPOCH_MILLIS};
use serde_json::Value;
use tabkeeper_lib::error::SnapshotError;
use tabkeeper_lib::models::{Snapshot, SnapshotTrigger, Workspace};
use tabkeeper_lib::resilience::{build_snapshot, SnapshotStore};
use tabkeeper_lib::settings::Settings;
use tabkeeper_lib::storage::{
    FileStore, KvStore, Scope, SNAPSHOTS_KEY, SNAPSHOT_TEMP_PREFIX,
};
use tempfile::TempDir;

fn snapshot_at(timestamp: i64, tab_count: usize) -> Snapshot {
    let tabs: Vec<_> = (1..=tab_count as i64)
        .map(|id| tab(id, &format!("https://example.com/{}", id)))
        .collect();
    build_snapshot(
        &tabs,
        vec![Workspace::new("Work".to_string(), timestamp, Vec::new())],
        timestamp,
        "session_test",
        SnapshotTrigger::Periodic,
    )
}

async fn canonical_ids(store: &dyn KvStore) -> Vec<String> {
    store
        .get(Scope::Local, SNAPSHOTS_KEY)
        .await
        .unwrap()
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| entry.get("id").and_then(Value::as_str).map(str::to_string))
        .collect()
}

async fn temp_keys(store: &dyn KvStore) -> Vec<String> {
    store
        .keys(Scope::Local)
        .await
        .unwrap()
        .into_iter()
        .filter(|k| k.starts_with(SNAPSHOT_TEMP_PREFIX))
        .collect()
}

#[tokio::test]
async fn failed_canonical_write_leaves_previous_list() {
    let store = Arc::new(FailingStore::new());
    let clock = Arc::new(ManualClock::new());
    let snapshots = SnapshotStore::new(store.clone(), clock.clone());

    let first = snapshot_at(EPOCH_MILLIS, 2);
    snapshots.atomic_save(&first).await.unwrap();

    clock.advance(Duration::from_secs(60));
    let second = snapshot_at(EPOCH_MILLIS + 60_000, 3);
    store.fail_sets(SNAPSHOTS_KEY, 1);

    let err = snapshots.atomic_save(&second).await.unwrap_err();
    assert!(matches!(err, SnapshotError::AtomicWrite(_)), "{:?}", err);

    assert_eq!(canonical_ids(store.as_ref()).await, vec![first.id.clone()]);
    assert!(temp_keys(store.as_ref()).await.is_empty());

    // The next attempt goes through normally
    snapshots.atomic_save(&second).await.unwrap();
    assert_eq!(
        canonical_ids(store.as_ref()).await,
        vec![second.id.clone(), first.id.clone()]
    );
}

#[tokio::test]
async fn failed_temp_write_never_touches_canonical_list() {
    let store = Arc::new(FailingStore::new());
    let clock = Arc::new(ManualClock::new());
    let snapshots = SnapshotStore::new(store.clone(), clock);

    store.fail_sets(SNAPSHOT_TEMP_PREFIX, 1);
    let snapshot = snapshot_at(EPOCH_MILLIS, 1);

    assert!(snapshots.atomic_save(&snapshot).await.is_err());
    assert!(!store.writes().iter().any(|k| k == SNAPSHOTS_KEY));
    assert!(canonical_ids(store.as_ref()).await.is_empty());
}

#[tokio::test]
async fn invalid_snapshot_is_never_written() {
    let store = Arc::new(FailingStore::new());
    let snapshots = SnapshotStore::new(store.clone(), Arc::new(ManualClock::new()));

    let mut snapshot = snapshot_at(EPOCH_MILLIS, 1);
    snapshot.tabs[0].url.clear();

    assert!(matches!(
        snapshots.atomic_save(&snapshot).await,
        Err(SnapshotError::Validation(_))
    ));
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn retention_caps_count_and_age() {
    let store = Arc::new(FailingStore::new());
    let clock = Arc::new(ManualClock::new());
    let snapshots = SnapshotStore::new(store.clone(), clock.clone());
    Settings::update(store.as_ref(), |s| {
        s.auto_save.max_snapshots = 3;
        s.auto_save.max_snapshot_age_hours = 1;
    })
    .await
    .unwrap();

    let mut saved = Vec::new();
    for i in 0..5 {
        let snapshot = snapshot_at(EPOCH_MILLIS + i * 1_000, 1);
        snapshots.atomic_save(&snapshot).await.unwrap();
        saved.push(snapshot.id);
        clock.advance(Duration::from_secs(1));
    }

    let ids = canonical_ids(store.as_ref()).await;
    assert_eq!(ids, vec![saved[4].clone(), saved[3].clone(), saved[2].clone()]);

    // Two hours on, everything has expired
    clock.advance(Duration::from_secs(2 * 3600));
    assert_eq!(snapshots.cleanup_expired().await.unwrap(), 3);
    assert!(canonical_ids(store.as_ref()).await.is_empty());
}

#[tokio::test]
async fn file_store_snapshots_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new());
    let snapshot = snapshot_at(EPOCH_MILLIS, 4);

    {
        let store = Arc::new(FileStore::open(temp_dir.path()).unwrap());
        let snapshots = SnapshotStore::new(store.clone(), clock.clone());
        snapshots.atomic_save(&snapshot).await.unwrap();
        assert!(temp_keys(store.as_ref()).await.is_empty());
    }

    let store = Arc::new(FileStore::open(temp_dir.path()).unwrap());
    let snapshots = SnapshotStore::new(store, clock);
    let latest = snapshots.latest_snapshot().await.unwrap().unwrap();
    assert_eq!(latest, snapshot);
}

#[tokio::test]
async fn second_file_store_on_same_dir_is_locked() {
    let temp_dir = TempDir::new().unwrap();
    let _first = FileStore::open(temp_dir.path()).unwrap();

    assert!(matches!(
        FileStore::open(temp_dir.path()),
        Err(tabkeeper_lib::error::StoreError::Locked(_))
    ));
}
