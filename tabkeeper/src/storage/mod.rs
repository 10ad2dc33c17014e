//! Persistent store seam
//!
//! A process-wide key-value store with two scopes. Values are whole JSON
//! documents replaced on every write; there are no partial updates and no
//! transactions across keys.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage key for user settings (synced scope)
pub const SETTINGS_KEY: &str = "settings";
/// Storage key for the saved workspace list (local scope)
pub const WORKSPACES_KEY: &str = "workspaces";
/// Storage key for the canonical snapshot list, newest first (local scope)
pub const SNAPSHOTS_KEY: &str = "autoSaveSnapshots";
/// Storage key for per-tab activity records (local scope)
pub const TAB_ACTIVITY_KEY: &str = "tabActivity";
/// Crash marker: set while the daemon runs, cleared on clean shutdown
pub const RUNNING_MARKER_KEY: &str = "extensionRunning";
/// Prefix of the per-snapshot temporary keys used by the atomic write
pub const SNAPSHOT_TEMP_PREFIX: &str = "autoSaveSnapshotTmp_";

pub fn snapshot_temp_key(snapshot_id: &str) -> String {
    format!("{}{}", SNAPSHOT_TEMP_PREFIX, snapshot_id)
}

/// Storage scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Small, settings-sized data
    Synced,
    /// Bulk data: workspaces, snapshots, activity records
    Local,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Synced => "synced",
            Scope::Local => "local",
        }
    }
}

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,199}$").expect("valid key pattern"));

/// Keys double as file names in [`FileStore`], so they are restricted to a
/// conservative character set.
pub fn validate_key(key: &str) -> StoreResult<()> {
    if KEY_PATTERN.is_match(key) && !key.contains("..") {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Key-value store used as the sole durable owner of all persisted state.
///
/// Every call is a suspension point; callers must re-fetch before mutating.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, scope: Scope, key: &str) -> StoreResult<Option<Value>>;

    async fn set(&self, scope: Scope, key: &str, value: Value) -> StoreResult<()>;

    /// Removing a missing key is not an error
    async fn remove(&self, scope: Scope, key: &str) -> StoreResult<()>;

    /// All keys currently present in a scope
    async fn keys(&self, scope: Scope) -> StoreResult<Vec<String>>;
}

/// Read and deserialize a typed value
pub async fn load<T: DeserializeOwned>(
    store: &dyn KvStore,
    scope: Scope,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(scope, key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StoreError::json(format!("Failed to parse {}", key), e)),
        None => Ok(None),
    }
}

/// Serialize and write a typed value
pub async fn save<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    scope: Scope,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let value = serde_json::to_value(value)
        .map_err(|e| StoreError::json(format!("Failed to serialize {}", key), e))?;
    store.set(scope, key, value).await
}
