//! Daemon wire protocol
//!
//! Newline-delimited JSON frames, internally tagged by `type`. The UI and
//! the browser host share one request enum.

use serde::{Deserialize, Serialize};

use crate::inactivity::SweepOutcome;
use crate::models::{Snapshot, SnapshotTrigger, TabRecord, Workspace};
use crate::platform::{HostCommand, LiveTab, TabEvent};
use crate::resilience::{AutoSaveStatus, SelectiveRecovery};
use crate::settings::{AutoSaveSettings, InactivitySettings};

/// Largest request frame the daemon will read (1 MiB)
pub const MAX_REQUEST_FRAME_SIZE: usize = 1024 * 1024;

// ============================================================================
// Client -> Daemon requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Take a snapshot now, bypassing debounce and cooldown
    TriggerManualSnapshot,
    /// List stored snapshots, newest first
    GetSnapshots,
    /// Copy the workspaces of the given snapshots into the workspace list
    RecoverByIds { ids: Vec<String> },
    /// Remove every stored snapshot
    ClearRecoveryData,
    UpdateAutoSaveSettings { settings: AutoSaveSettings },
    UpdateInactivitySettings { settings: InactivitySettings },
    GetAutoSaveStatus,
    /// Saved workspace list, in stored order
    GetWorkspaces,
    /// Save a new workspace at the front of the list
    CreateWorkspace { name: String, tabs: Vec<TabRecord> },
    /// Make one workspace the only active one
    SwitchWorkspace { id: String },
    DeleteWorkspace { id: String },
    /// Host pushes its complete tab list
    SyncTabs { tabs: Vec<LiveTab> },
    /// Host forwards one tab lifecycle event
    TabEvent { event: TabEvent },
    /// Host collects queued commands (tab discards)
    DrainCommands,
    /// Run an inactivity sweep now
    RunInactivitySweep,
    /// Ping to check if daemon is alive
    Ping,
    /// Request daemon to shut down gracefully
    Shutdown,
}

// ============================================================================
// Daemon -> Client responses
// ============================================================================

/// Listing entry for a stored snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: String,
    pub timestamp: i64,
    pub created_at: String,
    pub trigger: SnapshotTrigger,
    pub tab_count: usize,
    pub workspace_count: usize,
    pub workspace_names: Vec<String>,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            timestamp: snapshot.timestamp,
            created_at: snapshot.metadata.created_at.clone(),
            trigger: snapshot.metadata.trigger,
            tab_count: snapshot.tabs.len(),
            workspace_count: snapshot.workspaces.len(),
            workspace_names: snapshot.workspaces.iter().map(|w| w.name.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonErrorCode {
    /// Malformed or oversized frame
    InvalidRequest,
    /// A snapshot cycle is already running
    Busy,
    /// Snapshot failed validation
    Validation,
    /// Persistent store failure, including atomic write failures
    Storage,
    /// Tab platform failure
    Platform,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
    SnapshotSaved { snapshot: SnapshotSummary },
    Snapshots { snapshots: Vec<SnapshotSummary> },
    Recovered { recovery: SelectiveRecovery },
    RecoveryCleared,
    AutoSaveStatus { status: AutoSaveStatus },
    InactivitySettingsUpdated { settings: InactivitySettings },
    Workspaces { workspaces: Vec<Workspace> },
    WorkspaceCreated { workspace: Workspace },
    WorkspaceSwitched { workspace: Workspace },
    WorkspaceDeleted { id: String },
    TabsSynced { tab_count: usize },
    TabEventApplied,
    Commands { commands: Vec<HostCommand> },
    SweepFinished { outcome: SweepOutcome },
    /// Pong response
    Pong,
    /// Shutdown acknowledged
    ShuttingDown,
    /// Error response
    Error { code: DaemonErrorCode, message: String },
}

impl DaemonResponse {
    pub fn error(code: DaemonErrorCode, message: impl Into<String>) -> Self {
        DaemonResponse::Error {
            code,
            message: message.into(),
        }
    }
}

// ============================================================================
// Helpers for message framing
// ============================================================================

/// Serialize a message to JSON bytes with newline delimiter
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserialize a message from JSON bytes (strips trailing newline)
pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
) -> Result<T, serde_json::Error> {
    let trimmed = if bytes.last() == Some(&b'\n') {
        &bytes[..bytes.len() - 1]
    } else {
        bytes
    };
    serde_json::from_slice(trimmed)
}

/// Error message for a frame over [`MAX_REQUEST_FRAME_SIZE`]
pub fn frame_too_large_message(len: usize) -> String {
    format!(
        "Request frame too large: {} bytes (max {})",
        len, MAX_REQUEST_FRAME_SIZE
    )
}
