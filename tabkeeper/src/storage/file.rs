//! File-backed store: one JSON document per key
//!
//! Layout: `<state_dir>/store/<scope>/<key>.json`
//! - Every write is temp file + fsync + rename, so readers never see partial writes
//! - Strict permissions (0600 files, 0700 dirs)
//! - An exclusive lock file keeps a second daemon from writing the same directory
//! - Bounded startup cleanup of temp files orphaned by a killed process

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use fs2::FileExt;
use serde_json::Value;
use tracing::{debug, warn};

use super::{validate_key, KvStore, Scope};
use crate::error::{StoreError, StoreResult};

/// Maximum number of files to scan during stale temp cleanup
const CLEANUP_SCAN_LIMIT: usize = 1000;

/// Age threshold for temp file cleanup (1 hour)
const CLEANUP_AGE_THRESHOLD: Duration = Duration::from_secs(3600);

const LOCK_FILE_NAME: &str = ".lock";

#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
    /// Holds the exclusive lock for as long as any clone of the store lives
    _lock: Arc<File>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `state_dir/store`.
    ///
    /// Fails with [`StoreError::Locked`] if another process holds the store.
    pub fn open(state_dir: &Path) -> StoreResult<Self> {
        let base_dir = state_dir.join("store");
        for scope in [Scope::Synced, Scope::Local] {
            ensure_private_dir(&base_dir.join(scope.as_str()))?;
        }
        ensure_private_dir(&base_dir)?;

        let lock_path = base_dir.join(LOCK_FILE_NAME);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| StoreError::io(format!("Failed to open {}", lock_path.display()), e))?;

        match lock.try_lock_exclusive() {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(StoreError::Locked(base_dir));
            }
            Err(e) => {
                return Err(StoreError::io(
                    format!("Failed to lock {}", lock_path.display()),
                    e,
                ))
            }
        }

        Ok(Self {
            base_dir,
            _lock: Arc::new(lock),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn scope_dir(&self, scope: Scope) -> PathBuf {
        self.base_dir.join(scope.as_str())
    }

    fn key_path(&self, scope: Scope, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.scope_dir(scope).join(format!("{}.json", key)))
    }

    /// Cleanup stale temp files left behind by interrupted writes
    ///
    /// Deletes *.tmp.* files older than CLEANUP_AGE_THRESHOLD (1 hour).
    /// Scans at most CLEANUP_SCAN_LIMIT files to avoid blocking startup.
    ///
    /// Returns (deleted_count, scanned_count, hit_limit)
    pub fn cleanup_stale_temps(&self) -> io::Result<(usize, usize, bool)> {
        let mut scanned = 0;
        let mut deleted = 0;
        let now = SystemTime::now();

        for entry in walkdir::WalkDir::new(&self.base_dir)
            .max_depth(2) // store/<scope>/<file>
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if scanned >= CLEANUP_SCAN_LIMIT {
                warn!(
                    limit = CLEANUP_SCAN_LIMIT,
                    dir = %self.base_dir.display(),
                    "Hit temp cleanup scan limit"
                );
                return Ok((deleted, scanned, true));
            }

            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            scanned += 1;

            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.contains(".tmp."));
            if !is_temp {
                continue;
            }

            let age = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());

            if matches!(age, Some(age) if age > CLEANUP_AGE_THRESHOLD) {
                match fs::remove_file(path) {
                    Ok(()) => deleted += 1,
                    Err(e) => warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to delete stale temp file"
                    ),
                }
            }
        }

        Ok((deleted, scanned, false))
    }
}

fn ensure_private_dir(dir: &Path) -> StoreResult<()> {
    fs::create_dir_all(dir)
        .map_err(|e| StoreError::io(format!("Failed to create {}", dir.display()), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
            StoreError::io(format!("Failed to set permissions on {}", dir.display()), e)
        })?;
    }

    Ok(())
}

/// Atomically replace `path` using write-to-temp + fsync + rename
///
/// Each call gets its own temp file, so concurrent writes to the same key
/// never share one; the last rename wins.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid path: {}", path.display()),
        )
    })?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");

    // Temp file in same directory so the rename stays on one filesystem
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.tmp.", file_name))
        .tempfile_in(parent)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file().set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    temp.write_all(contents)?;
    temp.as_file().sync_all()?;

    // On failure the temp file is deleted when the error drops
    temp.persist(path).map_err(|e| e.error)?;

    // Make the rename itself durable
    #[cfg(unix)]
    {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

fn read_value(path: &Path) -> StoreResult<Option<Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StoreError::io(
                format!("Failed to read {}", path.display()),
                e,
            ))
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::json(format!("Failed to parse {}", path.display()), e))
}

async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Unavailable(format!("storage task failed: {}", e)))?
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, scope: Scope, key: &str) -> StoreResult<Option<Value>> {
        let path = self.key_path(scope, key)?;
        blocking(move || read_value(&path)).await
    }

    async fn set(&self, scope: Scope, key: &str, value: Value) -> StoreResult<()> {
        let path = self.key_path(scope, key)?;
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| StoreError::json(format!("Failed to serialize {}", key), e))?;

        blocking(move || {
            atomic_write(&path, &bytes)
                .map_err(|e| StoreError::io(format!("Failed to write {}", path.display()), e))
        })
        .await
    }

    async fn remove(&self, scope: Scope, key: &str) -> StoreResult<()> {
        let path = self.key_path(scope, key)?;
        blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(
                format!("Failed to remove {}", path.display()),
                e,
            )),
        })
        .await
    }

    async fn keys(&self, scope: Scope) -> StoreResult<Vec<String>> {
        let dir = self.scope_dir(scope);
        blocking(move || {
            let entries = fs::read_dir(&dir)
                .map_err(|e| StoreError::io(format!("Failed to list {}", dir.display()), e))?;

            let mut keys = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| {
                    StoreError::io(format!("Failed to list {}", dir.display()), e)
                })?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                // Skip temp files and anything that is not a key document
                if name.starts_with('.') {
                    continue;
                }
                if let Some(key) = name.strip_suffix(".json") {
                    keys.push(key.to_string());
                } else {
                    debug!(file = name, "Ignoring unexpected file in store directory");
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
    }
}
