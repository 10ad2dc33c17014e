// tabkeeper-daemon: background process behind the browser host
//
// Responsibilities:
// - Own the persistent store and the resilience service
// - Detect crashes of the previous run and recover or notify
// - Keep auto-save and inactivity timers running
// - Expose the Unix socket protocol for the host and UI

use anyhow::{Context, Result};
use std::sync::Arc;
use tabkeeper_lib::{
    clock::SystemClock,
    config::Config,
    notify::TerminalNotifier,
    platform::HostTabMirror,
    protocol::{
        deserialize_message, frame_too_large_message, serialize_message, DaemonErrorCode,
        DaemonRequest, DaemonResponse, MAX_REQUEST_FRAME_SIZE,
    },
    service::ResilienceService,
    storage::{FileStore, KvStore, MemoryStore},
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let default_level = if config.debug_log { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &Config) -> Result<Arc<dyn KvStore>> {
    if config.ephemeral {
        warn!("Ephemeral mode: state is kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = FileStore::open(&config.state_dir).with_context(|| {
        format!(
            "Failed to open store under {}",
            config.state_dir.display()
        )
    })?;

    match store.cleanup_stale_temps() {
        Ok((deleted, scanned, hit_limit)) => {
            if deleted > 0 || hit_limit {
                info!(deleted, scanned, hit_limit, "Cleaned up stale temp files");
            }
        }
        Err(e) => warn!(error = %e, "Stale temp file cleanup failed"),
    }

    Ok(Arc::new(store))
}

/// Handle a single client connection
async fn handle_client(
    service: Arc<ResilienceService>,
    mut stream: UnixStream,
    shutdown_tx: mpsc::Sender<()>,
) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        // One byte past the limit is enough to tell an oversized frame
        let read = (&mut reader)
            .take(MAX_REQUEST_FRAME_SIZE as u64 + 1)
            .read_line(&mut line)
            .await;

        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Error reading from client");
                break;
            }
        }

        let oversized = line.len() > MAX_REQUEST_FRAME_SIZE;
        let mut shutting_down = false;
        let response = if oversized {
            DaemonResponse::error(
                DaemonErrorCode::InvalidRequest,
                frame_too_large_message(line.len()),
            )
        } else {
            match deserialize_message::<DaemonRequest>(line.as_bytes()) {
                Ok(request) => {
                    shutting_down = matches!(request, DaemonRequest::Shutdown);
                    service.handle(request).await
                }
                Err(e) => DaemonResponse::error(
                    DaemonErrorCode::InvalidRequest,
                    format!("Failed to parse request: {}", e),
                ),
            }
        };

        let bytes = serialize_message(&response)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;

        if shutting_down {
            let _ = shutdown_tx.send(()).await;
            break;
        }
        // The rest of an oversized frame cannot be resynchronized
        if oversized {
            break;
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = Config::from_env();
    init_tracing(&config);

    config
        .ensure_dirs()
        .context("Failed to create daemon directories")?;

    if config.socket_exists() {
        if config.is_daemon_running() {
            error!(pid = ?config.read_pid(), "Daemon already running");
            std::process::exit(1);
        }
        config
            .remove_socket()
            .context("Failed to remove stale socket")?;
    }

    config.write_pid().context("Failed to write PID file")?;

    let store = open_store(&config)?;
    let mirror = Arc::new(HostTabMirror::new());
    let notifier = Arc::new(TerminalNotifier::stderr());
    let service = ResilienceService::new(store, mirror, notifier, Arc::new(SystemClock));

    service.start().await;

    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("Failed to bind socket: {}", config.socket_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&config.socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| {
                format!(
                    "Failed to set socket permissions: {}",
                    config.socket_path.display()
                )
            })?;
    }

    info!(socket = %config.socket_path.display(), "Daemon listening");

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        let _ = signal_tx.send(()).await;
    });

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let service = Arc::clone(&service);
                        let shutdown_tx = shutdown_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(service, stream, shutdown_tx).await {
                                warn!(error = %e, "Client error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept error"),
                }
            }

            _ = shutdown_rx.recv() => {
                info!("Shutting down daemon");
                break;
            }
        }
    }

    service.shutdown().await;
    config.remove_pid().ok();
    config.remove_socket().ok();

    info!("Daemon stopped");
    Ok(())
}
