//! In-process store used by tests and `TABKEEPER_EPHEMERAL=1` runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{validate_key, KvStore, Scope};
use crate::error::StoreResult;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(Scope, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<(Scope, String), Value>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of keys across both scopes
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, scope: Scope, key: &str) -> StoreResult<Option<Value>> {
        validate_key(key)?;
        let entries = self.entries();
        Ok(entries.get(&(scope, key.to_string())).cloned())
    }

    async fn set(&self, scope: Scope, key: &str, value: Value) -> StoreResult<()> {
        validate_key(key)?;
        let mut entries = self.entries();
        entries.insert((scope, key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, scope: Scope, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        let mut entries = self.entries();
        entries.remove(&(scope, key.to_string()));
        Ok(())
    }

    async fn keys(&self, scope: Scope) -> StoreResult<Vec<String>> {
        let entries = self.entries();
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|(s, _)| *s == scope)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
