//! Tab inactivity tracking and suspension

pub mod activity;
pub mod exclusion;
pub mod monitor;

pub use activity::ActivityTracker;
pub use exclusion::{matches_protected_domain, should_exclude_from_auto_close, ExclusionReason};
pub use monitor::{InactivityMonitor, SweepOutcome, SweepReport};
