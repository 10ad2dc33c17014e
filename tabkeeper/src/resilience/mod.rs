//! Snapshot persistence, auto-save scheduling, and crash recovery

pub mod capture;
pub mod recovery;
pub mod scheduler;
pub mod store;
pub mod validation;

pub use capture::{build_snapshot, new_session_id, SnapshotCapture};
pub use recovery::{CrashRecovery, RecoveryOutcome, SelectiveRecovery};
pub use scheduler::{AutoSaveScheduler, AutoSaveStatus, CycleOutcome, SchedulerState, SkipReason};
pub use store::SnapshotStore;
pub use validation::{validate_snapshot, validate_snapshot_value};
