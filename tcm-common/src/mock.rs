//! Mock transport for deterministic tests.
//!
//! Simulates the device end of the pipeline: scripted connect results,
//! a tiny remote filesystem with per-read size sequences (to model
//! files still being written), and connection drops at chosen points.

use crate::transport::{CommandResult, Transport};
use crate::types::DeviceConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One simulated remote file.
#[derive(Debug, Clone)]
pub struct MockRemoteFile {
    /// Full remote path.
    pub path: String,
    /// Sizes returned by successive `file_size` reads; the last entry
    /// repeats once the sequence is exhausted.
    pub sizes: Vec<u64>,
    /// Bytes written locally when the file is downloaded.
    pub content: String,
    reads: usize,
}

impl MockRemoteFile {
    pub fn new(path: impl Into<String>, size: u64, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sizes: vec![size],
            content: content.into(),
            reads: 0,
        }
    }

    /// Model a file still being written: each read pops the next size.
    pub fn with_sizes(mut self, sizes: Vec<u64>) -> Self {
        self.sizes = sizes;
        self
    }

    fn next_size(&mut self) -> u64 {
        let idx = self.reads.min(self.sizes.len().saturating_sub(1));
        self.reads += 1;
        self.sizes.get(idx).copied().unwrap_or(0)
    }

    fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Scripted [`Transport`] double.
#[derive(Debug, Default)]
pub struct MockTransport {
    device: DeviceConfig,
    connected: bool,
    /// Per-call connect results; once exhausted, connects succeed.
    connect_script: Vec<bool>,
    /// Number of connect() calls observed.
    pub connect_calls: u32,
    /// A successful upload drops the session (network-affecting test).
    pub drop_connection_after_upload: bool,
    /// A successful download drops the session (device dies between jobs).
    pub drop_connection_after_download: bool,
    pub upload_ok: bool,
    pub download_ok: bool,
    /// Recorded (local, remote) uploads.
    pub uploads: Vec<(PathBuf, String)>,
    /// Recorded (remote, local) downloads.
    pub downloads: Vec<(String, PathBuf)>,
    files: Vec<MockRemoteFile>,
    /// Files appearing once `newest_matching` has been polled at least
    /// that many times.
    scheduled: Vec<(u32, MockRemoteFile)>,
    /// newest_matching() calls observed.
    pub poll_count: u32,
    /// Scripted execute() responses, matched by substring.
    command_results: Vec<(String, CommandResult)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            upload_ok: true,
            download_ok: true,
            ..Self::default()
        }
    }

    /// Start with an established session.
    pub fn connected(mut self) -> Self {
        self.connected = true;
        self
    }

    /// Script the next connect() results, in order. Later calls succeed.
    pub fn with_connect_script(mut self, script: Vec<bool>) -> Self {
        self.connect_script = script;
        self
    }

    pub fn with_file(mut self, file: MockRemoteFile) -> Self {
        self.files.push(file);
        self
    }

    /// File that appears on the `appear_at_poll`-th discovery query.
    pub fn with_scheduled_file(mut self, appear_at_poll: u32, file: MockRemoteFile) -> Self {
        self.scheduled.push((appear_at_poll, file));
        self
    }

    pub fn with_drop_after_upload(mut self) -> Self {
        self.drop_connection_after_upload = true;
        self
    }

    pub fn with_drop_after_download(mut self) -> Self {
        self.drop_connection_after_download = true;
        self
    }

    pub fn with_upload_ok(mut self, ok: bool) -> Self {
        self.upload_ok = ok;
        self
    }

    pub fn with_command_result(mut self, needle: &str, result: CommandResult) -> Self {
        self.command_results.push((needle.to_string(), result));
        self
    }

    fn find_file(&mut self, path: &str) -> Option<&mut MockRemoteFile> {
        self.files.iter_mut().find(|f| f.path == path)
    }

    fn matching(&self, dir: &str, pattern: &str) -> Vec<&MockRemoteFile> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.files
            .iter()
            .filter(|f| f.path.starts_with(&prefix))
            .filter(|f| glob_matches(f.name(), pattern))
            .collect()
    }
}

/// Match a name against a single-`*` shell glob.
fn glob_matches(name: &str, pattern: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
        None => name == pattern,
    }
}

impl Transport for MockTransport {
    fn device(&self) -> &DeviceConfig {
        &self.device
    }

    async fn connect(&mut self, _timeout: Duration) -> bool {
        let idx = self.connect_calls as usize;
        self.connect_calls += 1;
        let ok = self.connect_script.get(idx).copied().unwrap_or(true);
        self.connected = ok;
        ok
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn is_connected(&mut self) -> bool {
        self.connected
    }

    async fn execute(&mut self, command: &str, _timeout: Duration) -> CommandResult {
        if !self.connected {
            return CommandResult::failure("not connected");
        }
        for (needle, result) in &self.command_results {
            if command.contains(needle.as_str()) {
                return result.clone();
            }
        }
        CommandResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
        }
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> bool {
        if !self.connected {
            return false;
        }
        self.uploads.push((local.to_path_buf(), remote.to_string()));
        if !self.upload_ok {
            return false;
        }
        if self.drop_connection_after_upload {
            self.connected = false;
        }
        true
    }

    async fn download(&mut self, remote: &str, local: &Path) -> bool {
        if !self.connected || !self.download_ok {
            return false;
        }
        self.downloads.push((remote.to_string(), local.to_path_buf()));
        let Some(content) = self
            .files
            .iter()
            .find(|f| f.path == remote)
            .map(|f| f.content.clone())
        else {
            return false;
        };
        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() && std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        if std::fs::write(local, content).is_err() {
            return false;
        }
        if self.drop_connection_after_download {
            self.connected = false;
        }
        true
    }

    async fn file_exists(&mut self, path: &str) -> bool {
        self.connected && self.files.iter().any(|f| f.path == path)
    }

    async fn file_size(&mut self, path: &str) -> u64 {
        if !self.connected {
            return 0;
        }
        self.find_file(path).map(MockRemoteFile::next_size).unwrap_or(0)
    }

    async fn list_matching(&mut self, dir: &str, pattern: &str) -> Vec<String> {
        if !self.connected {
            return Vec::new();
        }
        self.matching(dir, pattern)
            .into_iter()
            .map(|f| f.path.clone())
            .collect()
    }

    async fn newest_matching(&mut self, dir: &str, pattern: &str) -> Option<String> {
        if !self.connected {
            return None;
        }
        self.poll_count += 1;
        let due: Vec<usize> = self
            .scheduled
            .iter()
            .enumerate()
            .filter(|(_, (at, _))| *at <= self.poll_count)
            .map(|(i, _)| i)
            .rev()
            .collect();
        for idx in due {
            let (_, file) = self.scheduled.remove(idx);
            self.files.push(file);
        }
        // Newest wins; scheduled files are pushed in appearance order,
        // so the last match is the most recent.
        self.matching(dir, pattern)
            .last()
            .map(|f| f.name().to_string())
    }
}
