//! Daemon-side mirror of the host's tabs
//!
//! The host pushes full tab lists (`replace_all`) and incremental events
//! (`apply_event`). Discards are applied to the mirror immediately and queued
//! as commands the host drains and executes.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{LiveTab, TabPlatform, TabStatus};
use crate::error::PlatformError;
use crate::models::TabId;

/// Upper bound on queued host commands; oldest are dropped first
const MAX_PENDING_COMMANDS: usize = 1024;

/// Tab lifecycle event forwarded by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TabEvent {
    Created {
        tab: LiveTab,
    },
    Activated {
        tab_id: TabId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_id: Option<i64>,
    },
    Updated {
        tab_id: TabId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<TabStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pinned: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audible: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        discarded: Option<bool>,
    },
    Removed {
        tab_id: TabId,
    },
}

impl TabEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            TabEvent::Created { tab } => tab.id,
            TabEvent::Activated { tab_id, .. }
            | TabEvent::Updated { tab_id, .. }
            | TabEvent::Removed { tab_id } => *tab_id,
        }
    }

    /// Whether the event counts as the user touching the tab: creation,
    /// activation, or a navigation finishing.
    pub fn is_access(&self) -> bool {
        match self {
            TabEvent::Created { .. } | TabEvent::Activated { .. } => true,
            TabEvent::Updated { status, .. } => *status == Some(TabStatus::Complete),
            TabEvent::Removed { .. } => false,
        }
    }
}

/// Work for the host to carry out on real tabs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HostCommand {
    DiscardTab { tab_id: TabId },
}

#[derive(Debug, Default)]
struct MirrorState {
    tabs: BTreeMap<TabId, LiveTab>,
    commands: VecDeque<HostCommand>,
}

#[derive(Debug, Default)]
pub struct HostTabMirror {
    state: Mutex<MirrorState>,
}

impl HostTabMirror {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MirrorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the whole mirror with the host's current tab list
    pub fn replace_all(&self, tabs: Vec<LiveTab>) {
        let mut state = self.state();
        state.tabs = tabs.into_iter().map(|tab| (tab.id, tab)).collect();
    }

    pub fn apply_event(&self, event: &TabEvent) {
        let mut state = self.state();
        match event {
            TabEvent::Created { tab } => {
                state.tabs.insert(tab.id, tab.clone());
            }
            TabEvent::Activated { tab_id, window_id } => {
                let window = window_id.or_else(|| state.tabs.get(tab_id).map(|t| t.window_id));
                for tab in state.tabs.values_mut() {
                    if Some(tab.window_id) == window {
                        tab.active = tab.id == *tab_id;
                    }
                }
                if let Some(tab) = state.tabs.get_mut(tab_id) {
                    tab.active = true;
                    // Activating a discarded tab reloads it
                    tab.discarded = false;
                }
            }
            TabEvent::Updated {
                tab_id,
                url,
                title,
                status,
                pinned,
                audible,
                discarded,
            } => {
                if let Some(tab) = state.tabs.get_mut(tab_id) {
                    if let Some(url) = url {
                        tab.url = url.clone();
                    }
                    if let Some(title) = title {
                        tab.title = title.clone();
                    }
                    if let Some(status) = status {
                        tab.status = *status;
                    }
                    if let Some(pinned) = pinned {
                        tab.pinned = *pinned;
                    }
                    if let Some(audible) = audible {
                        tab.audible = *audible;
                    }
                    if let Some(discarded) = discarded {
                        tab.discarded = *discarded;
                    }
                }
            }
            TabEvent::Removed { tab_id } => {
                state.tabs.remove(tab_id);
            }
        }
    }

    /// Take every queued command, oldest first
    pub fn drain_commands(&self) -> Vec<HostCommand> {
        let mut state = self.state();
        state.commands.drain(..).collect()
    }

    pub fn tab_count(&self) -> usize {
        self.state().tabs.len()
    }
}

#[async_trait]
impl TabPlatform for HostTabMirror {
    async fn query_tabs(&self) -> Result<Vec<LiveTab>, PlatformError> {
        let state = self.state();
        Ok(state.tabs.values().cloned().collect())
    }

    async fn discard(&self, tab_id: TabId) -> Result<(), PlatformError> {
        let mut state = self.state();
        let tab = state
            .tabs
            .get_mut(&tab_id)
            .ok_or(PlatformError::TabNotFound(tab_id))?;

        if tab.active {
            return Err(PlatformError::Discard {
                tab_id,
                message: "cannot discard the active tab".to_string(),
            });
        }
        tab.discarded = true;

        if state.commands.len() >= MAX_PENDING_COMMANDS {
            state.commands.pop_front();
        }
        state.commands.push_back(HostCommand::DiscardTab { tab_id });
        Ok(())
    }
}
