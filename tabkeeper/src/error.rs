//! Error types for the resilience subsystem.
//!
//! Scheduled cycles and sweeps catch all of these at their boundary; only the
//! manual entry points hand them back to a caller.

use std::path::PathBuf;

use crate::models::TabId;

// ─────────────────────────────────────────────────────────────────────────────
// Persistent store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("Store directory is locked by another process: {0}")]
    Locked(PathBuf),

    #[error("Store is unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        StoreError::Json {
            context: context.into(),
            source,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tab platform
// ─────────────────────────────────────────────────────────────────────────────

/// Failure talking to the tab platform. Per-item and non-fatal to a batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("Failed to enumerate tabs: {0}")]
    Enumerate(String),

    #[error("Tab {0} not found")]
    TabNotFound(TabId),

    #[error("Failed to discard tab {tab_id}: {message}")]
    Discard { tab_id: TabId, message: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot persistence
// ─────────────────────────────────────────────────────────────────────────────

/// A malformed snapshot. Snapshots failing validation are never written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Snapshot is not a JSON object")]
    NotAnObject,

    #[error("Snapshot is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Snapshot field `{0}` must be a sequence")]
    NotASequence(&'static str),

    #[error("Snapshot field `{0}` must be a non-empty string")]
    InvalidString(&'static str),

    #[error("Snapshot timestamp must be a positive integer")]
    InvalidTimestamp,

    #[error("Tab entry {index} has no URL")]
    EmptyTabUrl { index: usize },

    #[error("Workspace {index} has a tab without a URL")]
    EmptyWorkspaceTabUrl { index: usize },

    #[error("Snapshot has too many tabs: {count} (max {max})")]
    TooManyTabs { count: usize, max: usize },

    #[error("Snapshot has too many workspaces: {count} (max {max})")]
    TooManyWorkspaces { count: usize, max: usize },
}

/// Read-back verification failed during the atomic write protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("Temporary key {key} holds {found:?}, expected snapshot {expected}")]
    TempMismatch {
        key: String,
        expected: String,
        found: Option<String>,
    },

    #[error("Canonical snapshot list starts with {found:?}, expected {expected}")]
    CanonicalMismatch {
        expected: String,
        found: Option<String>,
    },
}

/// The underlying reason an atomic write was abandoned.
#[derive(Debug, thiserror::Error)]
pub enum AtomicWriteCause {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// A step of the atomic write protocol failed. The canonical list is left
/// exactly as it was before the call.
#[derive(Debug, thiserror::Error)]
#[error("Atomic write of snapshot {snapshot_id} failed: {cause}")]
pub struct AtomicWriteError {
    pub snapshot_id: String,
    #[source]
    pub cause: AtomicWriteCause,
}

impl AtomicWriteError {
    pub fn is_integrity(&self) -> bool {
        matches!(self.cause, AtomicWriteCause::Integrity(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    AtomicWrite(#[from] AtomicWriteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("A snapshot cycle is already in progress")]
    Busy,
}

// ─────────────────────────────────────────────────────────────────────────────
// Workspaces + recovery
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Inactivity
// ─────────────────────────────────────────────────────────────────────────────

/// A sweep could not run at all. Per-tab discard failures are not errors.
#[derive(Debug, thiserror::Error)]
pub enum InactivityError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias used by store-level helpers.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
