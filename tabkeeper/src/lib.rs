// Resilience subsystem for a browser workspace host: crash-safe snapshots,
// auto-save scheduling, crash recovery and inactive tab suspension.

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod platform;
pub mod settings;
pub mod storage;
pub mod workspaces;

// Snapshot store, scheduler, capture and crash recovery
pub mod resilience;

// Per-tab activity records and the suspend sweep
pub mod inactivity;

// Daemon wire protocol and request dispatch
pub mod protocol;
pub mod service;

#[cfg(test)]
pub(crate) mod test_utils;
