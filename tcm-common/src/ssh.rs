//! SSH transport to the target device.
//!
//! Connection management, canary-verified liveness, command execution
//! with timeout-class retry, and the layered file-transfer fallback
//! (in-session base64, external scp, plain-text heredoc/cat).

use crate::transport::{CommandResult, Transport, is_timeout_error_text};
use crate::types::DeviceConfig;
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use shell_escape::escape;
use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Command whose echoed output proves a fresh session is usable.
const CONNECT_CANARY: &str = "connection_test";

/// Command used as the recurring liveness probe.
const LIVENESS_CANARY: &str = "keepalive";

/// Budget for the connect-time canary.
const CANARY_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for the liveness probe. Short on purpose: a slow device is
/// treated as unreachable rather than blocking the pipeline.
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(3);

/// Extra attempts for timeout-class execute failures.
const EXECUTE_RETRIES: u32 = 2;

/// Delay between execute retries.
const EXECUTE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Heredoc delimiter for the plain-text upload fallback.
const HEREDOC_MARKER: &str = "TCM_EOF_MARKER";

/// Tunables for a transport instance.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Budget for the helper commands this transport issues on its own
    /// (existence checks, directory listings).
    pub command_timeout: Duration,
    /// Budget for a single file-transfer method.
    pub transfer_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(60),
        }
    }
}

/// SSH-backed [`Transport`] implementation.
pub struct SshTransport {
    device: DeviceConfig,
    options: SshOptions,
    session: Option<Session>,
}

impl SshTransport {
    pub fn new(device: DeviceConfig, options: SshOptions) -> Self {
        Self {
            device,
            options,
            session: None,
        }
    }

    async fn open_session(&self, timeout: Duration) -> Result<Session> {
        let destination = self.device.destination();
        debug!("Connecting to {} via SSH", destination);

        let mut builder = SessionBuilder::default();
        builder
            .known_hosts_check(KnownHosts::Add)
            .connect_timeout(timeout)
            .port(self.device.port);

        let identity = shellexpand::tilde(&self.device.identity_file);
        if Path::new(identity.as_ref()).exists() {
            builder.keyfile(identity.as_ref());
        }

        builder
            .connect(&destination)
            .await
            .with_context(|| format!("failed to connect to {destination}"))
    }

    /// Run a command on the live session, without retry.
    async fn run_raw(&self, command: &str, timeout: Duration) -> Result<CommandResult> {
        let session = self.session.as_ref().context("not connected")?;

        let start = std::time::Instant::now();
        let mut child = session
            .command("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .await
            .context("failed to spawn remote command")?;

        let execution = async {
            let stdout_handle = child.stdout().take();
            let stderr_handle = child.stderr().take();

            let stdout_fut = async {
                let mut buf = String::new();
                if let Some(mut out) = stdout_handle {
                    out.read_to_string(&mut buf).await?;
                }
                Ok::<String, anyhow::Error>(buf)
            };
            let stderr_fut = async {
                let mut buf = String::new();
                if let Some(mut err) = stderr_handle {
                    err.read_to_string(&mut buf).await?;
                }
                Ok::<String, anyhow::Error>(buf)
            };

            let (stdout, stderr) = tokio::try_join!(stdout_fut, stderr_fut)?;
            let status = child.wait().await.context("failed to wait for command")?;
            Ok::<_, anyhow::Error>((status, stdout, stderr))
        };

        match tokio::time::timeout(timeout, execution).await {
            Ok(result) => {
                let (status, stdout, stderr) = result?;
                Ok(CommandResult {
                    exit_code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                    duration_ms: start.elapsed().as_millis() as u64,
                })
            }
            // Dropping the child terminates the remote process.
            Err(_) => anyhow::bail!("command timed out after {:?}", timeout),
        }
    }

    /// Make sure the parent directory of a remote path exists.
    async fn ensure_remote_dir(&mut self, dir: &str) -> bool {
        if dir.is_empty() || dir == "/" {
            return true;
        }
        let escaped = escape(Cow::from(dir));
        let result = self
            .execute(&format!("mkdir -p {escaped}"), self.options.command_timeout)
            .await;
        if !result.success() {
            warn!("Failed to create remote directory {dir}: {}", result.stderr.trim());
            return false;
        }
        let result = self
            .execute(&format!("chmod 755 {escaped}"), self.options.command_timeout)
            .await;
        if !result.success() {
            warn!("Failed to set permissions on {dir}: {}", result.stderr.trim());
        }
        true
    }

    // ── Upload methods, in fallback order ────────────────────────────

    /// Preferred: pipe base64 through the existing session. Works for
    /// binary content and needs no second authentication.
    async fn upload_via_session(&mut self, local: &Path, remote: &str) -> bool {
        let bytes = match tokio::fs::read(local).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Cannot read local file {}: {err}", local.display());
                return false;
            }
        };
        if let Some(dir) = remote_parent(remote) {
            if !self.ensure_remote_dir(&dir).await {
                return false;
            }
        }

        let encoded = BASE64.encode(&bytes);
        let escaped = escape(Cow::from(remote));
        let command = format!("echo '{encoded}' | base64 -d > {escaped}");
        let result = self.execute(&command, self.options.transfer_timeout).await;
        if result.success() {
            debug!("Uploaded {} via in-session base64", local.display());
            true
        } else {
            warn!("In-session upload failed: {}", result.stderr.trim());
            false
        }
    }

    /// Second choice: external scp with the stored identity file.
    async fn upload_via_scp(&mut self, local: &Path, remote: &str) -> bool {
        if let Some(dir) = remote_parent(remote) {
            if !self.ensure_remote_dir(&dir).await {
                return false;
            }
        }
        let target = format!("{}:{}", self.device.destination(), remote);
        self.run_scp(local.as_os_str().to_os_string(), target.into()).await
    }

    /// Last resort: heredoc/cat, valid for text content only.
    async fn upload_via_heredoc(&mut self, local: &Path, remote: &str) -> bool {
        let content = match tokio::fs::read_to_string(local).await {
            Ok(content) => content,
            Err(err) => {
                warn!("Heredoc upload needs text content ({err})");
                return false;
            }
        };
        if let Some(dir) = remote_parent(remote) {
            if !self.ensure_remote_dir(&dir).await {
                return false;
            }
        }
        let escaped = escape(Cow::from(remote));
        let command =
            format!("cat > {escaped} << '{HEREDOC_MARKER}'\n{content}\n{HEREDOC_MARKER}");
        let result = self.execute(&command, self.options.transfer_timeout).await;
        if result.success() {
            debug!("Uploaded {} via heredoc", local.display());
            true
        } else {
            warn!("Heredoc upload failed: {}", result.stderr.trim());
            false
        }
    }

    // ── Download methods, in fallback order ──────────────────────────

    async fn download_via_session(&mut self, remote: &str, local: &Path) -> bool {
        if !self.file_exists(remote).await {
            warn!("Remote file not found: {remote}");
            return false;
        }
        let escaped = escape(Cow::from(remote));
        let result = self
            .execute(&format!("cat {escaped} | base64"), self.options.transfer_timeout)
            .await;
        if !result.success() {
            warn!("In-session download failed: {}", result.stderr.trim());
            return false;
        }
        let cleaned: String = result
            .stdout
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = match BASE64.decode(cleaned.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Failed to decode downloaded content: {err}");
                return false;
            }
        };
        write_local(local, &bytes).await
    }

    async fn download_via_scp(&mut self, remote: &str, local: &Path) -> bool {
        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() && std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        let source = format!("{}:{}", self.device.destination(), remote);
        self.run_scp(source.into(), local.as_os_str().to_os_string()).await
    }

    async fn download_via_cat(&mut self, remote: &str, local: &Path) -> bool {
        let escaped = escape(Cow::from(remote));
        let result = self
            .execute(&format!("cat {escaped}"), self.options.transfer_timeout)
            .await;
        if !result.success() {
            warn!("Cat download failed: {}", result.stderr.trim());
            return false;
        }
        write_local(local, result.stdout.as_bytes()).await
    }

    async fn run_scp(
        &self,
        source: std::ffi::OsString,
        target: std::ffi::OsString,
    ) -> bool {
        let identity = shellexpand::tilde(&self.device.identity_file).into_owned();
        let mut command = Command::new("scp");
        command
            .arg("-P")
            .arg(self.device.port.to_string())
            .arg("-i")
            .arg(&identity)
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(&source)
            .arg(&target)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped());

        match tokio::time::timeout(self.options.transfer_timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => true,
            Ok(Ok(output)) => {
                warn!(
                    "scp failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Ok(Err(err)) => {
                // scp missing on the host is an expected configuration,
                // not an error worth more than a note.
                warn!("scp could not be launched: {err}");
                false
            }
            Err(_) => {
                warn!("scp timed out after {:?}", self.options.transfer_timeout);
                false
            }
        }
    }
}

impl Transport for SshTransport {
    fn device(&self) -> &DeviceConfig {
        &self.device
    }

    async fn connect(&mut self, timeout: Duration) -> bool {
        self.disconnect().await;

        match self.open_session(timeout).await {
            Ok(session) => self.session = Some(session),
            Err(err) => {
                warn!("Connection error: {err:#}");
                return false;
            }
        }

        match self.run_raw(&format!("echo '{CONNECT_CANARY}'"), CANARY_TIMEOUT).await {
            Ok(result) if result.stdout.trim() == CONNECT_CANARY => {
                info!("SSH connection to {} established", self.device.host);
                true
            }
            Ok(_) => {
                warn!("SSH connection test returned unexpected output");
                self.session = None;
                false
            }
            Err(err) => {
                warn!("SSH connection test failed: {err:#}");
                self.session = None;
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.close().await {
                debug!("Error closing session: {err}");
            }
        }
    }

    async fn is_connected(&mut self) -> bool {
        if self.session.is_none() {
            return false;
        }
        match self.run_raw(&format!("echo '{LIVENESS_CANARY}'"), LIVENESS_TIMEOUT).await {
            Ok(result) if result.stdout.trim() == LIVENESS_CANARY => true,
            _ => {
                self.session = None;
                false
            }
        }
    }

    async fn execute(&mut self, command: &str, timeout: Duration) -> CommandResult {
        let mut attempt = 0;
        loop {
            if self.session.is_none() {
                return CommandResult::failure("not connected");
            }
            match self.run_raw(command, timeout).await {
                Ok(result) => return result,
                Err(err) => {
                    let message = format!("{err:#}");
                    if !is_timeout_error_text(&message) {
                        return CommandResult::failure(message);
                    }
                    attempt += 1;
                    if attempt > EXECUTE_RETRIES {
                        // Give upstream reconnection logic a clean slate.
                        self.session = None;
                        return CommandResult::failure(message);
                    }
                    warn!(
                        "Command execution timed out, retrying ({attempt}/{EXECUTE_RETRIES})"
                    );
                    tokio::time::sleep(EXECUTE_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> bool {
        debug!("Uploading {} -> {remote}", local.display());
        if self.upload_via_session(local, remote).await {
            return true;
        }
        if self.upload_via_scp(local, remote).await {
            return true;
        }
        if self.upload_via_heredoc(local, remote).await {
            return true;
        }
        warn!("All upload methods failed for {}", local.display());
        false
    }

    async fn download(&mut self, remote: &str, local: &Path) -> bool {
        debug!("Downloading {remote} -> {}", local.display());
        if self.download_via_session(remote, local).await {
            return true;
        }
        if self.download_via_scp(remote, local).await {
            return true;
        }
        if self.download_via_cat(remote, local).await {
            return true;
        }
        warn!("All download methods failed for {remote}");
        false
    }

    async fn file_exists(&mut self, path: &str) -> bool {
        let escaped = escape(Cow::from(path));
        let result = self
            .execute(
                &format!("ls {escaped} 2>/dev/null"),
                self.options.command_timeout,
            )
            .await;
        result.success() && !result.stdout.trim().is_empty()
    }

    async fn file_size(&mut self, path: &str) -> u64 {
        let escaped = escape(Cow::from(path));
        let result = self
            .execute(
                &format!("stat -c %s {escaped} 2>/dev/null"),
                self.options.command_timeout,
            )
            .await;
        if !result.success() {
            return 0;
        }
        result.stdout.trim().parse().unwrap_or(0)
    }

    async fn list_matching(&mut self, dir: &str, pattern: &str) -> Vec<String> {
        let escaped_dir = escape(Cow::from(dir));
        let command = format!("find {escaped_dir} -name '{pattern}' -type f 2>/dev/null");
        let result = self.execute(&command, self.options.command_timeout).await;
        if !result.success() {
            return Vec::new();
        }
        result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    async fn newest_matching(&mut self, dir: &str, pattern: &str) -> Option<String> {
        let escaped_dir = escape(Cow::from(dir));
        // The glob stays unquoted so the remote shell expands it.
        let command = format!("ls -lt {escaped_dir}/{pattern} 2>/dev/null | head -1");
        let result = self.execute(&command, self.options.command_timeout).await;
        if !result.success() {
            return None;
        }
        parse_ls_name(&result.stdout)
    }
}

/// Parent directory of a remote path, when there is one worth creating.
fn remote_parent(remote: &str) -> Option<String> {
    match remote.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(remote[..idx].to_string()),
    }
}

/// File name out of a single `ls -l` line (last field, basename).
fn parse_ls_name(line: &str) -> Option<String> {
    let path = line.split_whitespace().last()?;
    let name = path.rsplit('/').next().unwrap_or(path);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

async fn write_local(local: &Path, bytes: &[u8]) -> bool {
    if let Some(parent) = local.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!("Cannot create local directory {}: {err}", parent.display());
                return false;
            }
        }
    }
    match tokio::fs::write(local, bytes).await {
        Ok(()) => true,
        Err(err) => {
            warn!("Cannot write local file {}: {err}", local.display());
            false
        }
    }
}
