//! Saved workspace list (`workspaces` key)
//!
//! Every write goes through [`normalize`], which enforces:
//! - ids are unique (first occurrence wins)
//! - at most one workspace is active (first active wins)
//! - the list never exceeds `settings.workspaces.maxWorkspaces`; the oldest
//!   inactive workspaces are evicted first

use std::collections::HashSet;

use tracing::debug;

use crate::error::{StoreResult, WorkspaceError};
use crate::models::{TabRecord, Workspace};
use crate::settings::Settings;
use crate::storage::{self, KvStore, Scope, WORKSPACES_KEY};

pub async fn load_workspaces(store: &dyn KvStore) -> StoreResult<Vec<Workspace>> {
    Ok(storage::load(store, Scope::Local, WORKSPACES_KEY)
        .await?
        .unwrap_or_default())
}

/// Normalize and persist the whole list. Returns what was written.
pub async fn save_workspaces(
    store: &dyn KvStore,
    workspaces: Vec<Workspace>,
) -> StoreResult<Vec<Workspace>> {
    let settings = Settings::load(store).await?;
    let workspaces = normalize(workspaces, settings.workspaces.max_workspaces);
    storage::save(store, Scope::Local, WORKSPACES_KEY, &workspaces).await?;
    Ok(workspaces)
}

pub fn normalize(workspaces: Vec<Workspace>, max_workspaces: usize) -> Vec<Workspace> {
    let max_workspaces = max_workspaces.max(1);

    let mut seen = HashSet::new();
    let mut active_seen = false;
    let mut result: Vec<Workspace> = Vec::with_capacity(workspaces.len());

    for mut workspace in workspaces {
        if !seen.insert(workspace.id.clone()) {
            continue;
        }
        if workspace.is_active {
            if active_seen {
                workspace.is_active = false;
            }
            active_seen = true;
        }
        result.push(workspace);
    }

    while result.len() > max_workspaces {
        let oldest = result
            .iter()
            .enumerate()
            .filter(|(_, w)| !w.is_active)
            .min_by_key(|(_, w)| w.timestamp)
            .map(|(i, _)| i);

        match oldest {
            Some(index) => {
                let evicted = result.remove(index);
                debug!(workspace_id = %evicted.id, "Evicted workspace over limit");
            }
            None => break,
        }
    }

    result
}

/// Create a workspace and prepend it to the list
pub async fn create_workspace(
    store: &dyn KvStore,
    name: &str,
    tabs: Vec<TabRecord>,
    now: i64,
) -> StoreResult<Workspace> {
    let workspace = Workspace::new(name, now, tabs);
    let mut workspaces = load_workspaces(store).await?;
    workspaces.insert(0, workspace.clone());
    save_workspaces(store, workspaces).await?;
    Ok(workspace)
}

/// Make `id` the only active workspace
pub async fn switch_workspace(store: &dyn KvStore, id: &str) -> Result<Workspace, WorkspaceError> {
    let mut workspaces = load_workspaces(store).await?;
    if !workspaces.iter().any(|w| w.id == id) {
        return Err(WorkspaceError::NotFound(id.to_string()));
    }

    for workspace in workspaces.iter_mut() {
        workspace.is_active = workspace.id == id;
    }

    let saved = save_workspaces(store, workspaces).await?;
    saved
        .into_iter()
        .find(|w| w.id == id)
        .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))
}

pub async fn delete_workspace(store: &dyn KvStore, id: &str) -> Result<(), WorkspaceError> {
    let mut workspaces = load_workspaces(store).await?;
    let before = workspaces.len();
    workspaces.retain(|w| w.id != id);
    if workspaces.len() == before {
        return Err(WorkspaceError::NotFound(id.to_string()));
    }
    save_workspaces(store, workspaces).await?;
    Ok(())
}
