//! User settings persisted under the synced `settings` key
//!
//! Every field has a default so partial or older documents still load.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::storage::{self, KvStore, Scope, SETTINGS_KEY};

/// Shortest allowed auto-save interval
pub const MIN_AUTO_SAVE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoSaveSettings {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub max_snapshots: usize,
    pub max_snapshot_age_hours: u64,
}

impl Default for AutoSaveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            max_snapshots: 10,
            max_snapshot_age_hours: 24 * 7,
        }
    }
}

impl AutoSaveSettings {
    /// Configured interval with the minimum floor applied
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds).max(MIN_AUTO_SAVE_INTERVAL)
    }

    /// At least one snapshot is always retained
    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots.max(1)
    }

    pub fn max_snapshot_age(&self) -> Duration {
        Duration::from_secs(self.max_snapshot_age_hours.saturating_mul(3600))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrashRecoverySettings {
    pub enabled: bool,
    pub auto_restore_on_startup: bool,
    pub show_recovery_notification: bool,
}

impl Default for CrashRecoverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_restore_on_startup: false,
            show_recovery_notification: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InactivitySettings {
    pub enabled: bool,
    pub timeout_minutes: u64,
    pub exclude_pinned: bool,
    pub exclude_audible: bool,
    pub notify_before_suspend: bool,
    /// Exact hosts (`example.com`) or leading-wildcard rules (`*.example.com`)
    pub protected_domains: Vec<String>,
}

impl Default for InactivitySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_minutes: 30,
            exclude_pinned: true,
            exclude_audible: true,
            notify_before_suspend: true,
            protected_domains: Vec::new(),
        }
    }
}

impl InactivitySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceSettings {
    pub max_workspaces: usize,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self { max_workspaces: 50 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub auto_save: AutoSaveSettings,
    pub crash_recovery: CrashRecoverySettings,
    pub inactivity: InactivitySettings,
    pub workspaces: WorkspaceSettings,
}

impl Settings {
    /// Load settings, falling back to defaults when none are stored
    pub async fn load(store: &dyn KvStore) -> StoreResult<Self> {
        Ok(storage::load(store, Scope::Synced, SETTINGS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn save(&self, store: &dyn KvStore) -> StoreResult<()> {
        storage::save(store, Scope::Synced, SETTINGS_KEY, self).await
    }

    /// Re-fetch, apply `f`, and write back the whole document
    pub async fn update<F>(store: &dyn KvStore, f: F) -> StoreResult<Self>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = Self::load(store).await?;
        f(&mut settings);
        settings.save(store).await?;
        Ok(settings)
    }
}
