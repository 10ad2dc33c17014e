//! User-visible notifications (suspend warnings, recovery available).
//!
//! Notifications are fire-and-forget: a notifier must never fail the caller,
//! and display errors are swallowed.

use std::io::{self, Write};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Inactive tabs are about to be suspended
    SuspendWarning,
    /// A previous run ended uncleanly and snapshots are available
    RecoveryAvailable,
    /// A crash was detected and workspaces were restored automatically
    RecoveryCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn suspend_warning(count: usize, delay_secs: u64) -> Self {
        let noun = if count == 1 { "tab" } else { "tabs" };
        Self {
            kind: NotificationKind::SuspendWarning,
            title: "Suspending inactive tabs".to_string(),
            message: format!(
                "{} inactive {} will be suspended in {}s. Switch to a tab to keep it loaded.",
                count, noun, delay_secs
            ),
        }
    }

    pub fn recovery_available(snapshot_count: usize) -> Self {
        Self {
            kind: NotificationKind::RecoveryAvailable,
            title: "Recovery data available".to_string(),
            message: format!(
                "The browser did not shut down cleanly. {} snapshot(s) can be restored.",
                snapshot_count
            ),
        }
    }

    pub fn recovery_completed(workspace_count: usize) -> Self {
        Self {
            kind: NotificationKind::RecoveryCompleted,
            title: "Session recovered".to_string(),
            message: format!(
                "Restored {} workspace(s) from the last snapshot.",
                workspace_count
            ),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Emits terminal notification escape codes.
///
/// Writes multiple terminal escape sequences to support various emulators:
/// - BEL (`\x07`) - Universal terminal bell
/// - OSC 9 (iTerm2) - Desktop notification
/// - OSC 777 (Konsole/VTE/Gnome Terminal) - Desktop notification
pub struct TerminalNotifier {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TerminalNotifier {
    /// Notifier writing to stderr (stdout carries the daemon's status lines)
    pub fn stderr() -> Self {
        Self::with_writer(Box::new(io::stderr()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl Notifier for TerminalNotifier {
    fn notify(&self, notification: &Notification) {
        info!(
            kind = ?notification.kind,
            title = %notification.title,
            "{}",
            notification.message
        );

        let Ok(mut out) = self.out.lock() else {
            return;
        };
        let title = format!("tabkeeper: {}", notification.title);
        let message = truncate_message(&notification.message, 160);
        let _ = out.write_all(&terminal_notification_bytes(&title, &message));
        let _ = out.flush();
    }
}

fn terminal_notification_bytes(title: &str, message: &str) -> Vec<u8> {
    let mut bytes = Vec::new();

    // BEL - universal terminal bell
    bytes.push(0x07);

    // OSC 9 - iTerm2 notification
    // Format: ESC ] 9 ; message BEL
    bytes.extend_from_slice(format!("\x1b]9;{}\x07", escape_osc(message)).as_bytes());

    // OSC 777 - Konsole/VTE/Gnome Terminal
    // Format: ESC ] 777 ; notify ; title ; message BEL
    bytes.extend_from_slice(
        format!(
            "\x1b]777;notify;{};{}\x07",
            escape_osc(title),
            escape_osc(message)
        )
        .as_bytes(),
    );

    bytes
}

/// Escapes special characters for OSC sequences
fn escape_osc(s: &str) -> String {
    // OSC sequences are terminated by BEL or ST
    s.replace('\x07', "")
        .replace('\x1b', "")
        .replace('\n', " ")
        .replace('\r', "")
}

/// First line only, cut on a char boundary
fn truncate_message(message: &str, max_chars: usize) -> String {
    let first_line = message.lines().next().unwrap_or(message);
    if first_line.chars().count() <= max_chars {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
