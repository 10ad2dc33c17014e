//! Snapshot validation gate
//!
//! Runs over the JSON form so a snapshot from any source (freshly built,
//! read back, or handed in by a collaborator) is checked the same way.

use serde_json::{Map, Value};

use crate::error::{SnapshotError, ValidationError};
use crate::models::Snapshot;

/// Hard ceiling on captured tabs per snapshot
pub const MAX_SNAPSHOT_TABS: usize = 1000;
/// Hard ceiling on saved workspaces per snapshot
pub const MAX_SNAPSHOT_WORKSPACES: usize = 100;

const REQUIRED_FIELDS: [&str; 7] = [
    "id",
    "timestamp",
    "sessionId",
    "version",
    "workspaces",
    "tabs",
    "metadata",
];

/// Validate a typed snapshot by way of its serialized form
pub fn validate_snapshot(snapshot: &Snapshot) -> Result<Value, SnapshotError> {
    let value = serde_json::to_value(snapshot).map_err(SnapshotError::Serialize)?;
    validate_snapshot_value(&value)?;
    Ok(value)
}

pub fn validate_snapshot_value(value: &Value) -> Result<(), ValidationError> {
    let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

    for field in REQUIRED_FIELDS {
        if object.get(field).map_or(true, Value::is_null) {
            return Err(ValidationError::MissingField(field));
        }
    }

    for field in ["id", "sessionId", "version"] {
        match object.get(field).and_then(Value::as_str) {
            Some(text) if !text.trim().is_empty() => {}
            _ => return Err(ValidationError::InvalidString(field)),
        }
    }

    // Floats and negatives are rejected alike
    match object.get("timestamp").and_then(Value::as_i64) {
        Some(ts) if ts > 0 => {}
        _ => return Err(ValidationError::InvalidTimestamp),
    }

    let tabs = sequence(object, "tabs")?;
    let workspaces = sequence(object, "workspaces")?;

    if tabs.len() > MAX_SNAPSHOT_TABS {
        return Err(ValidationError::TooManyTabs {
            count: tabs.len(),
            max: MAX_SNAPSHOT_TABS,
        });
    }
    if workspaces.len() > MAX_SNAPSHOT_WORKSPACES {
        return Err(ValidationError::TooManyWorkspaces {
            count: workspaces.len(),
            max: MAX_SNAPSHOT_WORKSPACES,
        });
    }

    for (index, tab) in tabs.iter().enumerate() {
        if !has_url(tab) {
            return Err(ValidationError::EmptyTabUrl { index });
        }
    }

    for (index, workspace) in workspaces.iter().enumerate() {
        let Some(workspace) = workspace.as_object() else {
            return Err(ValidationError::NotASequence("workspaces"));
        };
        let workspace_tabs = match workspace.get("tabs") {
            None | Some(Value::Null) => continue,
            Some(Value::Array(tabs)) => tabs,
            Some(_) => return Err(ValidationError::NotASequence("workspaces.tabs")),
        };
        if !workspace_tabs.iter().all(has_url) {
            return Err(ValidationError::EmptyWorkspaceTabUrl { index });
        }
    }

    Ok(())
}

fn sequence<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Vec<Value>, ValidationError> {
    object
        .get(field)
        .and_then(Value::as_array)
        .ok_or(ValidationError::NotASequence(field))
}

fn has_url(tab: &Value) -> bool {
    tab.get("url")
        .and_then(Value::as_str)
        .is_some_and(|url| !url.trim().is_empty())
}
