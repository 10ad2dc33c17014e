//! Capture routines for building snapshots from live state

use std::sync::Arc;

use tracing::debug;

use crate::clock::{format_millis, Clock};
use crate::error::SnapshotError;
use crate::models::{
    new_snapshot_id, LiveTabRecord, Snapshot, SnapshotMetadata, SnapshotTrigger, Workspace,
};
use crate::platform::{is_internal_url, LiveTab, TabPlatform};
use crate::storage::KvStore;
use crate::workspaces::load_workspaces;

/// Identifies one daemon lifetime inside the snapshots it produces
pub fn new_session_id() -> String {
    format!("session_{}", uuid::Uuid::new_v4().simple())
}

/// Assemble a snapshot, leaving out internal pages
pub fn build_snapshot(
    tabs: &[LiveTab],
    workspaces: Vec<Workspace>,
    timestamp: i64,
    session_id: &str,
    trigger: SnapshotTrigger,
) -> Snapshot {
    let captured: Vec<LiveTabRecord> = tabs
        .iter()
        .filter(|tab| !is_internal_url(&tab.url))
        .map(LiveTab::to_record)
        .collect();
    let skipped_internal_tabs = tabs.len() - captured.len();

    Snapshot {
        id: new_snapshot_id(timestamp),
        timestamp,
        session_id: session_id.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        metadata: SnapshotMetadata {
            trigger,
            tab_count: captured.len(),
            workspace_count: workspaces.len(),
            created_at: format_millis(timestamp),
            skipped_internal_tabs,
        },
        workspaces,
        tabs: captured,
    }
}

/// Reads the tab platform and workspace list to produce snapshots
#[derive(Clone)]
pub struct SnapshotCapture {
    platform: Arc<dyn TabPlatform>,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    session_id: String,
}

impl SnapshotCapture {
    pub fn new(
        platform: Arc<dyn TabPlatform>,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        session_id: String,
    ) -> Self {
        Self {
            platform,
            store,
            clock,
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn capture(&self, trigger: SnapshotTrigger) -> Result<Snapshot, SnapshotError> {
        let tabs = self.platform.query_tabs().await?;
        let workspaces = load_workspaces(self.store.as_ref()).await?;
        let snapshot = build_snapshot(
            &tabs,
            workspaces,
            self.clock.now_millis(),
            &self.session_id,
            trigger,
        );
        debug!(
            snapshot_id = %snapshot.id,
            tabs = snapshot.metadata.tab_count,
            skipped = snapshot.metadata.skipped_internal_tabs,
            workspaces = snapshot.metadata.workspace_count,
            "Captured snapshot"
        );
        Ok(snapshot)
    }
}
