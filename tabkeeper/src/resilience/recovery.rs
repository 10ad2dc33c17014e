//! Crash detection and recovery
//!
//! The `extensionRunning` marker is set once detection has run and cleared on
//! clean shutdown. Finding it set at startup means the previous lifetime
//! ended without shutting down.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::store::SnapshotStore;
use crate::clock::Clock;
use crate::error::{RecoveryError, StoreResult};
use crate::models::{new_workspace_id, Snapshot, TabRecord, Workspace};
use crate::notify::{Notification, Notifier};
use crate::settings::Settings;
use crate::storage::{self, KvStore, Scope, RUNNING_MARKER_KEY};
use crate::workspaces::{load_workspaces, save_workspaces};

/// Name suffix for workspaces copied out of a snapshot
pub const RECOVERED_SUFFIX: &str = " (Recovered)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RecoveryOutcome {
    /// Previous lifetime shut down cleanly
    NoCrash,
    RecoveryDisabled,
    NoSnapshots,
    Restored {
        snapshot_id: String,
        workspace_count: usize,
        recovered_tabs: usize,
    },
    Notified {
        snapshot_count: usize,
    },
    /// Crash seen, but neither auto-restore nor notification is enabled
    Ignored,
}

/// Result of copying workspaces out of chosen snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectiveRecovery {
    pub recovered: Vec<Workspace>,
    /// Requested ids with no matching snapshot
    pub missing: Vec<String>,
}

pub fn recovered_session_name(timestamp: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp) {
        Some(dt) => format!("Recovered Session {}", dt.format("%Y-%m-%d %H:%M")),
        None => "Recovered Session".to_string(),
    }
}

pub struct CrashRecovery {
    store: Arc<dyn KvStore>,
    snapshots: SnapshotStore,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl CrashRecovery {
    pub fn new(
        store: Arc<dyn KvStore>,
        snapshots: SnapshotStore,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            snapshots,
            notifier,
            clock,
        }
    }

    pub async fn was_running(&self) -> StoreResult<bool> {
        Ok(
            storage::load::<bool>(self.store.as_ref(), Scope::Local, RUNNING_MARKER_KEY)
                .await?
                .unwrap_or(false),
        )
    }

    pub async fn mark_running(&self) -> StoreResult<()> {
        storage::save(self.store.as_ref(), Scope::Local, RUNNING_MARKER_KEY, &true).await
    }

    pub async fn clear_running(&self) -> StoreResult<()> {
        self.store.remove(Scope::Local, RUNNING_MARKER_KEY).await
    }

    /// Inspect the crash marker and act on the recovery settings.
    /// Does not touch the marker itself.
    pub async fn detect_and_recover(&self) -> Result<RecoveryOutcome, RecoveryError> {
        if !self.was_running().await? {
            return Ok(RecoveryOutcome::NoCrash);
        }
        warn!("Previous session did not shut down cleanly");

        let settings = Settings::load(self.store.as_ref()).await?.crash_recovery;
        if !settings.enabled {
            return Ok(RecoveryOutcome::RecoveryDisabled);
        }

        let snapshots = self.snapshots.list_snapshots().await?;
        let Some(latest) = snapshots.first() else {
            info!("No snapshots available for recovery");
            return Ok(RecoveryOutcome::NoSnapshots);
        };

        if settings.auto_restore_on_startup {
            let outcome = self.restore_from(latest).await?;
            if settings.show_recovery_notification {
                if let RecoveryOutcome::Restored {
                    workspace_count, ..
                } = &outcome
                {
                    self.notifier
                        .notify(&Notification::recovery_completed(*workspace_count));
                }
            }
            return Ok(outcome);
        }

        if settings.show_recovery_notification {
            self.notifier
                .notify(&Notification::recovery_available(snapshots.len()));
            return Ok(RecoveryOutcome::Notified {
                snapshot_count: snapshots.len(),
            });
        }

        Ok(RecoveryOutcome::Ignored)
    }

    /// Replace the workspace list with the snapshot's, prepending a
    /// "Recovered Session" workspace built from its open tabs.
    pub async fn restore_from(
        &self,
        snapshot: &Snapshot,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        let mut workspaces = snapshot.workspaces.clone();

        if !snapshot.tabs.is_empty() {
            let now = self.clock.now_millis();
            let tabs: Vec<TabRecord> = snapshot.tabs.iter().map(TabRecord::from).collect();
            workspaces.insert(0, Workspace::new(recovered_session_name(now), now, tabs));
        }

        let saved = save_workspaces(self.store.as_ref(), workspaces).await?;
        info!(
            snapshot_id = %snapshot.id,
            workspaces = saved.len(),
            tabs = snapshot.tabs.len(),
            "Restored workspaces from snapshot"
        );

        Ok(RecoveryOutcome::Restored {
            snapshot_id: snapshot.id.clone(),
            workspace_count: saved.len(),
            recovered_tabs: snapshot.tabs.len(),
        })
    }

    /// Copy the workspaces of each chosen snapshot into the current list
    /// under fresh ids. Snapshots themselves are left as they are.
    pub async fn recover_by_ids(&self, ids: &[String]) -> Result<SelectiveRecovery, RecoveryError> {
        let found = self.snapshots.get_snapshots(ids).await?;
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !found.iter().any(|s| &s.id == *id))
            .cloned()
            .collect();

        let now = self.clock.now_millis();
        let recovered: Vec<Workspace> = found
            .iter()
            .flat_map(|snapshot| snapshot.workspaces.iter())
            .map(|workspace| Workspace {
                id: new_workspace_id(),
                name: format!("{}{}", workspace.name, RECOVERED_SUFFIX),
                timestamp: now,
                is_active: false,
                tabs: workspace.tabs.clone(),
            })
            .collect();

        if !recovered.is_empty() {
            let mut workspaces = load_workspaces(self.store.as_ref()).await?;
            workspaces.splice(0..0, recovered.iter().cloned());
            save_workspaces(self.store.as_ref(), workspaces).await?;
        }

        info!(
            requested = ids.len(),
            recovered = recovered.len(),
            missing = missing.len(),
            "Selective recovery finished"
        );
        Ok(SelectiveRecovery { recovered, missing })
    }
}
