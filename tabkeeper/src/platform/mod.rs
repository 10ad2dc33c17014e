//! Tab platform seam
//!
//! Enumerates live tabs and discards (suspends) them. The daemon's
//! implementation is [`HostTabMirror`], fed by the browser host.

pub mod mirror;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::models::{LiveTabRecord, TabId};

pub use mirror::{HostCommand, HostTabMirror, TabEvent};

/// Load state of a live tab
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabStatus {
    Loading,
    #[default]
    Complete,
}

/// Transient view of a live tab as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTab {
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
    #[serde(default)]
    pub audible: bool,
    #[serde(default)]
    pub discarded: bool,
    #[serde(default)]
    pub status: TabStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
}

impl LiveTab {
    pub fn is_loading(&self) -> bool {
        self.status == TabStatus::Loading
    }

    pub fn to_record(&self) -> LiveTabRecord {
        LiveTabRecord {
            id: self.id,
            window_id: self.window_id,
            index: self.index,
            url: self.url.clone(),
            title: self.title.clone(),
            pinned: self.pinned,
            active: self.active,
            favicon: self.fav_icon_url.clone(),
        }
    }
}

#[async_trait]
pub trait TabPlatform: Send + Sync {
    /// All live tabs across all windows
    async fn query_tabs(&self) -> Result<Vec<LiveTab>, PlatformError>;

    /// Release the tab's page state while keeping it in the tab strip
    async fn discard(&self, tab_id: TabId) -> Result<(), PlatformError>;
}

static INTERNAL_SCHEME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(chrome|chrome-extension|chrome-search|chrome-untrusted|edge|brave|opera|vivaldi|devtools|moz-extension|view-source|about):",
    )
    .expect("valid internal scheme pattern")
});

/// Pages owned by the browser itself. They are never captured in snapshots
/// and never suspended.
pub fn is_internal_url(url: &str) -> bool {
    let url = url.trim();
    url.is_empty() || INTERNAL_SCHEME.is_match(url)
}
