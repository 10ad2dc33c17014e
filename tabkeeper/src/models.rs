//! Persisted data model: workspaces, snapshots and per-tab activity records.
//!
//! Field names are camelCase in storage and on the wire.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Platform identifier of a live tab
pub type TabId = i64;

/// Unique identifier for a snapshot
/// Format: "snapshot_1770383553000_9f2c41ab"
pub type SnapshotId = String;

/// Reconstructable state of a tab stored inside a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRecord {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

/// A named, user-curated set of tabs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    /// Epoch milliseconds of creation (or of recovery, for recovered copies)
    pub timestamp: i64,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub tabs: Vec<TabRecord>,
}

impl Workspace {
    pub fn new(name: impl Into<String>, timestamp: i64, tabs: Vec<TabRecord>) -> Self {
        Self {
            id: new_workspace_id(),
            name: name.into(),
            timestamp,
            is_active: false,
            tabs,
        }
    }
}

pub fn new_workspace_id() -> String {
    format!("ws_{}", uuid::Uuid::new_v4().simple())
}

/// An open tab as captured inside a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTabRecord {
    pub id: TabId,
    #[serde(default)]
    pub window_id: i64,
    #[serde(default)]
    pub index: u32,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

impl From<&LiveTabRecord> for TabRecord {
    fn from(tab: &LiveTabRecord) -> Self {
        TabRecord {
            url: tab.url.clone(),
            title: tab.title.clone(),
            pinned: tab.pinned,
            active: tab.active,
            favicon: tab.favicon.clone(),
        }
    }
}

/// What caused a snapshot to be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    /// Auto-save timer tick
    Periodic,
    /// Explicit request from the UI
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub trigger: SnapshotTrigger,
    pub tab_count: usize,
    pub workspace_count: usize,
    /// RFC 3339 rendering of the snapshot timestamp
    pub created_at: String,
    /// Open tabs left out because they belong to internal schemes
    #[serde(default)]
    pub skipped_internal_tabs: usize,
}

/// Point-in-time capture of both saved workspaces and open tabs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: SnapshotId,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Identifies the daemon lifetime that produced the snapshot
    pub session_id: String,
    /// Version of the producing crate
    pub version: String,
    pub workspaces: Vec<Workspace>,
    pub tabs: Vec<LiveTabRecord>,
    pub metadata: SnapshotMetadata,
}

pub fn new_snapshot_id(timestamp: i64) -> SnapshotId {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("snapshot_{}_{}", timestamp, &suffix[..8])
}

/// Per-tab last-access bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabActivity {
    pub last_accessed: i64,
    pub created_at: i64,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default)]
    pub suspended_at: Option<i64>,
}

impl TabActivity {
    pub fn new(now: i64) -> Self {
        Self {
            last_accessed: now,
            created_at: now,
            suspended: false,
            suspended_at: None,
        }
    }

    /// Record an access. Keeps `last_accessed >= created_at` and clears
    /// any suspension, since the tab has been brought back.
    pub fn touch(&mut self, now: i64) {
        self.last_accessed = now.max(self.created_at);
        self.suspended = false;
        self.suspended_at = None;
    }

    pub fn mark_suspended(&mut self, now: i64) {
        self.suspended = true;
        self.suspended_at = Some(now);
    }

    pub fn idle_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.last_accessed)
    }
}

/// Activity records keyed by tab id, persisted under `tabActivity`
pub type ActivityMap = HashMap<TabId, TabActivity>;
