//! Remote shell transport abstraction.
//!
//! The orchestrator and locator depend only on this trait; the SSH
//! implementation lives in [`crate::ssh`], the test double in
//! [`crate::mock`].

use crate::types::DeviceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Result of a remote command execution.
///
/// Transport-level failures are folded into this shape (exit code −1,
/// message in stderr) so callers have a single, never-panicking surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit code of the command (−1 on transport failure).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error, or the transport error text.
    pub stderr: String,
    /// Execution duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// A transport-level failure carrying an error message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: message.into(),
            duration_ms: 0,
        }
    }
}

/// True if a transport error message looks like a timeout. Only these
/// are worth retrying in place; anything else reflects a state the
/// retry cannot fix.
pub fn is_timeout_error_text(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("timed out") || message.contains("timeout")
}

/// Remote shell session to a single device.
///
/// At most one live session per value; every operation that matters is
/// preceded by a liveness probe, a cached flag is never trusted on its
/// own.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// The device this transport talks to.
    fn device(&self) -> &DeviceConfig;

    /// Establish a session, dropping any prior one first. Verifies
    /// liveness with a canary command. Never errors; `false` covers
    /// every failure mode.
    async fn connect(&mut self, timeout: Duration) -> bool;

    /// Best-effort close; safe to call when not connected.
    async fn disconnect(&mut self);

    /// Authoritative liveness signal: runs a canary command and checks
    /// its output. A failure marks the session as gone.
    async fn is_connected(&mut self) -> bool;

    /// Run a command. Timeout-class failures are retried up to two
    /// extra times with the session marked disconnected in between;
    /// other failures return immediately.
    async fn execute(&mut self, command: &str, timeout: Duration) -> CommandResult;

    /// Upload a local file, trying each transfer method in order.
    async fn upload(&mut self, local: &Path, remote: &str) -> bool;

    /// Download a remote file, trying each transfer method in order.
    async fn download(&mut self, remote: &str, local: &Path) -> bool;

    /// Whether a remote path exists.
    async fn file_exists(&mut self, path: &str) -> bool;

    /// Remote file size in bytes; 0 when absent or unreadable.
    async fn file_size(&mut self, path: &str) -> u64;

    /// All files in `dir` whose name matches `pattern` (shell glob with
    /// a single `*`). Full remote paths.
    async fn list_matching(&mut self, dir: &str, pattern: &str) -> Vec<String>;

    /// File name (not path) of the most recently modified match in
    /// `dir`, if any.
    async fn newest_matching(&mut self, dir: &str, pattern: &str) -> Option<String>;
}

/// Verify the remote directories the pipeline needs, creating missing
/// ones. Returns the paths that are still missing afterwards.
pub async fn check_remote_dirs<T: Transport>(
    transport: &mut T,
    dirs: &[&str],
    timeout: Duration,
) -> Vec<String> {
    let mut missing = Vec::new();
    for dir in dirs {
        let escaped = shell_escape::escape(std::borrow::Cow::from(*dir));
        let probe = format!("test -d {escaped} && echo exists || echo missing");
        let result = transport.execute(&probe, timeout).await;
        if result.success() && result.stdout.trim() == "exists" {
            continue;
        }
        let mkdir = format!("mkdir -p {escaped}");
        let result = transport.execute(&mkdir, timeout).await;
        if !result.success() {
            missing.push((*dir).to_string());
        }
    }
    missing
}
