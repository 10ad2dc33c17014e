//! Wires the resilience components together for the daemon
//!
//! Startup order: crash check, running marker, orphaned temp purge,
//! scheduler, inactivity monitor, hourly snapshot cleanup. Shutdown cancels
//! every timer before clearing the running marker.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{
    InactivityError, PlatformError, RecoveryError, SnapshotError, StoreError, WorkspaceError,
};
use crate::inactivity::InactivityMonitor;
use crate::notify::Notifier;
use crate::platform::HostTabMirror;
use crate::protocol::{DaemonErrorCode, DaemonRequest, DaemonResponse, SnapshotSummary};
use crate::resilience::{
    new_session_id, AutoSaveScheduler, CrashRecovery, RecoveryOutcome, SnapshotCapture,
    SnapshotStore,
};
use crate::settings::Settings;
use crate::storage::KvStore;
use crate::workspaces::{create_workspace, delete_workspace, load_workspaces, switch_workspace};

/// Period of the expired-snapshot cleanup task
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct ResilienceService {
    store: Arc<dyn KvStore>,
    mirror: Arc<HostTabMirror>,
    snapshots: SnapshotStore,
    capture: SnapshotCapture,
    scheduler: Arc<AutoSaveScheduler>,
    recovery: CrashRecovery,
    monitor: Arc<InactivityMonitor>,
    clock: Arc<dyn Clock>,
    cleanup_token: Mutex<Option<CancellationToken>>,
}

impl ResilienceService {
    pub fn new(
        store: Arc<dyn KvStore>,
        mirror: Arc<HostTabMirror>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let snapshots = SnapshotStore::new(store.clone(), clock.clone());
        let capture = SnapshotCapture::new(
            mirror.clone(),
            store.clone(),
            clock.clone(),
            new_session_id(),
        );
        let scheduler = AutoSaveScheduler::new(
            store.clone(),
            snapshots.clone(),
            capture.clone(),
            clock.clone(),
        );
        let recovery = CrashRecovery::new(
            store.clone(),
            snapshots.clone(),
            notifier.clone(),
            clock.clone(),
        );
        let monitor =
            InactivityMonitor::new(store.clone(), mirror.clone(), notifier, clock.clone());

        Arc::new(Self {
            store,
            mirror,
            snapshots,
            capture,
            scheduler,
            recovery,
            monitor,
            clock,
            cleanup_token: Mutex::new(None),
        })
    }

    fn cleanup_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cleanup_token.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn scheduler(&self) -> &Arc<AutoSaveScheduler> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<InactivityMonitor> {
        &self.monitor
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Run the startup sequence. Each step that fails is logged and the
    /// sequence carries on. Returns what crash detection found, if it ran.
    pub async fn start(self: &Arc<Self>) -> Option<RecoveryOutcome> {
        info!(session_id = %self.capture.session_id(), "Starting resilience service");

        let outcome = match self.recovery.detect_and_recover().await {
            Ok(outcome) => {
                info!(?outcome, "Crash detection finished");
                Some(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Crash detection failed");
                None
            }
        };

        if let Err(e) = self.recovery.mark_running().await {
            warn!(error = %e, "Failed to set running marker");
        }

        match self.snapshots.purge_orphaned_temps().await {
            Ok(0) => {}
            Ok(purged) => info!(purged, "Purged orphaned snapshot temp keys"),
            Err(e) => warn!(error = %e, "Failed to purge orphaned snapshot temp keys"),
        }

        if let Err(e) = self.scheduler.initialize().await {
            warn!(error = %e, "Failed to initialize auto-save scheduler");
        }
        if let Err(e) = self.monitor.start().await {
            warn!(error = %e, "Failed to start inactivity monitor");
        }

        self.start_cleanup();
        outcome
    }

    fn start_cleanup(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.cleanup_slot().replace(token.clone()) {
            previous.cancel();
        }

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + CLEANUP_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(service) = weak.upgrade() else { break };
                        match service.snapshots.cleanup_expired().await {
                            Ok(0) => debug!("No expired snapshots"),
                            Ok(removed) => info!(removed, "Removed expired snapshots"),
                            Err(e) => warn!(error = %e, "Snapshot cleanup failed"),
                        }
                    }
                }
            }
        });
    }

    /// Stop every timer, then clear the running marker so the next start
    /// does not see a crash.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        self.monitor.shutdown();
        if let Some(token) = self.cleanup_slot().take() {
            token.cancel();
        }

        match self.recovery.clear_running().await {
            Ok(()) => info!("Resilience service stopped cleanly"),
            Err(e) => warn!(error = %e, "Failed to clear running marker"),
        }
    }

    /// Dispatch one request. Every failure becomes an error response.
    pub async fn handle(&self, request: DaemonRequest) -> DaemonResponse {
        match request {
            DaemonRequest::Ping => DaemonResponse::Pong,

            // The listener owns the actual teardown
            DaemonRequest::Shutdown => DaemonResponse::ShuttingDown,

            DaemonRequest::TriggerManualSnapshot => match self.scheduler.trigger_manual().await {
                Ok(snapshot) => DaemonResponse::SnapshotSaved {
                    snapshot: SnapshotSummary::from(&snapshot),
                },
                Err(e) => snapshot_error(e),
            },

            DaemonRequest::GetSnapshots => match self.snapshots.list_snapshots().await {
                Ok(snapshots) => DaemonResponse::Snapshots {
                    snapshots: snapshots.iter().map(SnapshotSummary::from).collect(),
                },
                Err(e) => store_error(e),
            },

            DaemonRequest::RecoverByIds { ids } => {
                if ids.is_empty() {
                    return DaemonResponse::error(
                        DaemonErrorCode::InvalidRequest,
                        "No snapshot ids given",
                    );
                }
                match self.recovery.recover_by_ids(&ids).await {
                    Ok(recovery) => DaemonResponse::Recovered { recovery },
                    Err(e) => recovery_error(e),
                }
            }

            DaemonRequest::ClearRecoveryData => match self.snapshots.clear_all().await {
                Ok(()) => DaemonResponse::RecoveryCleared,
                Err(e) => store_error(e),
            },

            DaemonRequest::UpdateAutoSaveSettings { settings } => {
                match self.scheduler.apply_settings(settings).await {
                    Ok(status) => DaemonResponse::AutoSaveStatus { status },
                    Err(e) => store_error(e),
                }
            }

            DaemonRequest::UpdateInactivitySettings { settings } => {
                if let Err(e) = self.monitor.apply_settings(settings).await {
                    return store_error(e);
                }
                match Settings::load(self.store.as_ref()).await {
                    Ok(settings) => DaemonResponse::InactivitySettingsUpdated {
                        settings: settings.inactivity,
                    },
                    Err(e) => store_error(e),
                }
            }

            DaemonRequest::GetAutoSaveStatus => DaemonResponse::AutoSaveStatus {
                status: self.scheduler.status(),
            },

            DaemonRequest::GetWorkspaces => match load_workspaces(self.store.as_ref()).await {
                Ok(workspaces) => DaemonResponse::Workspaces { workspaces },
                Err(e) => store_error(e),
            },

            DaemonRequest::CreateWorkspace { name, tabs } => {
                let name = name.trim();
                if name.is_empty() {
                    return DaemonResponse::error(
                        DaemonErrorCode::InvalidRequest,
                        "Workspace name is empty",
                    );
                }
                let now = self.clock.now_millis();
                match create_workspace(self.store.as_ref(), name, tabs, now).await {
                    Ok(workspace) => DaemonResponse::WorkspaceCreated { workspace },
                    Err(e) => store_error(e),
                }
            }

            DaemonRequest::SwitchWorkspace { id } => {
                match switch_workspace(self.store.as_ref(), &id).await {
                    Ok(workspace) => DaemonResponse::WorkspaceSwitched { workspace },
                    Err(e) => workspace_error(e),
                }
            }

            DaemonRequest::DeleteWorkspace { id } => {
                match delete_workspace(self.store.as_ref(), &id).await {
                    Ok(()) => DaemonResponse::WorkspaceDeleted { id },
                    Err(e) => workspace_error(e),
                }
            }

            DaemonRequest::SyncTabs { tabs } => {
                self.mirror.replace_all(tabs);
                DaemonResponse::TabsSynced {
                    tab_count: self.mirror.tab_count(),
                }
            }

            DaemonRequest::TabEvent { event } => {
                self.mirror.apply_event(&event);
                match self.monitor.handle_tab_event(&event).await {
                    Ok(()) => DaemonResponse::TabEventApplied,
                    Err(e) => store_error(e),
                }
            }

            DaemonRequest::DrainCommands => DaemonResponse::Commands {
                commands: self.mirror.drain_commands(),
            },

            DaemonRequest::RunInactivitySweep => match self.monitor.run_sweep().await {
                Ok(outcome) => DaemonResponse::SweepFinished { outcome },
                Err(InactivityError::Platform(e)) => platform_error(e),
                Err(InactivityError::Store(e)) => store_error(e),
            },
        }
    }
}

fn store_error(e: StoreError) -> DaemonResponse {
    DaemonResponse::error(DaemonErrorCode::Storage, e.to_string())
}

fn platform_error(e: PlatformError) -> DaemonResponse {
    DaemonResponse::error(DaemonErrorCode::Platform, e.to_string())
}

fn snapshot_error(e: SnapshotError) -> DaemonResponse {
    let code = match &e {
        SnapshotError::Busy => DaemonErrorCode::Busy,
        SnapshotError::Validation(_) => DaemonErrorCode::Validation,
        SnapshotError::AtomicWrite(_) | SnapshotError::Store(_) => DaemonErrorCode::Storage,
        SnapshotError::Platform(_) => DaemonErrorCode::Platform,
        SnapshotError::Serialize(_) => DaemonErrorCode::Internal,
    };
    DaemonResponse::error(code, e.to_string())
}

fn workspace_error(e: WorkspaceError) -> DaemonResponse {
    match e {
        WorkspaceError::NotFound(id) => DaemonResponse::error(
            DaemonErrorCode::InvalidRequest,
            format!("Workspace not found: {}", id),
        ),
        WorkspaceError::Store(e) => store_error(e),
    }
}

fn recovery_error(e: RecoveryError) -> DaemonResponse {
    match e {
        RecoveryError::Workspace(e) => workspace_error(e),
        RecoveryError::Store(e) => store_error(e),
    }
}
