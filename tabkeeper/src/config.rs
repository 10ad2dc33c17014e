// Environment configuration for the daemon
// Resolves socket, PID file and store locations

use std::path::{Path, PathBuf};

const SOCKET_FILE: &str = "tabkeeper.sock";
const PID_FILE: &str = "tabkeeper.pid";

/// Configuration for daemon paths and runtime switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory for runtime files (socket, PID)
    pub runtime_dir: PathBuf,
    /// Directory for persistent state (the file store)
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    /// Keep all state in memory (`TABKEEPER_EPHEMERAL=1`)
    pub ephemeral: bool,
    /// Default the log filter to debug (`TABKEEPER_DEBUG_LOG=1`)
    pub debug_log: bool,
}

impl Config {
    /// Configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Configuration from an arbitrary variable lookup.
    ///
    /// `TABKEEPER_DIR` overrides both runtime and state directories.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| {
            var(key).is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };
        let ephemeral = flag("TABKEEPER_EPHEMERAL");
        let debug_log = flag("TABKEEPER_DEBUG_LOG");

        let (runtime_dir, state_dir) = match var("TABKEEPER_DIR").filter(|d| !d.is_empty()) {
            Some(dir) => {
                let base = PathBuf::from(dir);
                (base.clone(), base)
            }
            None => {
                let state_dir = default_state_dir();
                let runtime_dir = default_runtime_dir(var("XDG_RUNTIME_DIR"), &state_dir);
                (runtime_dir, state_dir)
            }
        };

        Self::with_dirs(runtime_dir, state_dir, ephemeral, debug_log)
    }

    pub fn with_dirs(
        runtime_dir: PathBuf,
        state_dir: PathBuf,
        ephemeral: bool,
        debug_log: bool,
    ) -> Self {
        Self {
            socket_path: runtime_dir.join(SOCKET_FILE),
            pid_file: runtime_dir.join(PID_FILE),
            runtime_dir,
            state_dir,
            ephemeral,
            debug_log,
        }
    }

    /// Ensure both directories exist; the runtime directory is private
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::create_dir_all(&self.runtime_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.runtime_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }

    /// Write the daemon PID to the PID file
    pub fn write_pid(&self) -> std::io::Result<()> {
        self.ensure_dirs()?;
        std::fs::write(&self.pid_file, std::process::id().to_string())
    }

    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn remove_pid(&self) -> std::io::Result<()> {
        remove_if_exists(&self.pid_file)
    }

    pub fn remove_socket(&self) -> std::io::Result<()> {
        remove_if_exists(&self.socket_path)
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if a process with the stored PID is still alive
    #[cfg(unix)]
    pub fn is_daemon_running(&self) -> bool {
        match self.read_pid() {
            // Signal 0 only checks that the process exists
            Some(pid) => unsafe { libc::kill(pid as libc::pid_t, 0) == 0 },
            None => false,
        }
    }

    #[cfg(not(unix))]
    pub fn is_daemon_running(&self) -> bool {
        self.socket_path.exists()
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".tabkeeper"))
        .unwrap_or_else(|| std::env::temp_dir().join("tabkeeper"))
}

fn default_runtime_dir(xdg_runtime_dir: Option<String>, state_dir: &Path) -> PathBuf {
    match xdg_runtime_dir.filter(|d| !d.is_empty()) {
        Some(dir) if cfg!(target_os = "linux") => PathBuf::from(dir).join("tabkeeper"),
        _ => state_dir.to_path_buf(),
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
