//! Common types used across TCM components.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Connection target: an embedded device reachable over SSH.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Hostname or IP address of the device.
    #[serde(default = "default_host")]
    pub host: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// SSH username.
    #[serde(default = "default_user")]
    pub user: String,
    /// Path to the SSH private key used for both the session and the
    /// scp fallback.
    #[serde(default = "default_identity_file")]
    pub identity_file: String,
    /// Remote directory test definitions are uploaded into.
    #[serde(default = "default_config_dir")]
    pub config_dir: String,
    /// Remote directory the device writes result artifacts into.
    #[serde(default = "default_result_dir")]
    pub result_dir: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            identity_file: default_identity_file(),
            config_dir: default_config_dir(),
            result_dir: default_result_dir(),
        }
    }
}

impl DeviceConfig {
    /// SSH destination string (`user@host`).
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

fn default_host() -> String {
    "192.168.88.1".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

fn default_identity_file() -> String {
    "~/.ssh/id_rsa".to_string()
}

fn default_config_dir() -> String {
    "/root/config".to_string()
}

fn default_result_dir() -> String {
    "/root/result".to_string()
}

/// Lifecycle state of a submitted test file.
///
/// Transitions move strictly forward (`Queued` → `Sending` → `Testing`
/// → optionally `NetworkReset` → terminal); `Error` and `Failed` are
/// terminal at any point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue.
    Queued,
    /// Uploading the definition to the device.
    Sending,
    /// Uploaded; waiting for the device to produce a result.
    Testing,
    /// Waiting for the device to come back after a network-affecting test.
    NetworkReset,
    /// Result retrieved and recorded.
    Complete,
    /// Aborted by an unexpected failure.
    Error,
    /// Ran to a definitive negative end (timeout, cancelled).
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "Queued"),
            Self::Sending => write!(f, "Sending"),
            Self::Testing => write!(f, "Testing"),
            Self::NetworkReset => write!(f, "Network Reset"),
            Self::Complete => write!(f, "Complete"),
            Self::Error => write!(f, "Error"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// One queued test-definition file moving through the pipeline.
///
/// Owned and mutated exclusively by the orchestrator; everyone else
/// sees snapshots or [`JobEvent`](crate::orchestrator::JobEvent)s.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionJob {
    /// Local path of the definition file.
    pub source: PathBuf,
    /// File name including extension.
    pub file_name: String,
    /// File name without extension; the result search pattern is
    /// `<base_name>_*.json`.
    pub base_name: String,
    /// Size of the local file in bytes.
    pub file_size: u64,
    /// Number of test cases in the definition.
    pub test_count: usize,
    /// Network-impact flags computed at enqueue time.
    pub impacts: ImpactAssessment,
    pub status: JobStatus,
    /// Result label shown to the user ("Pass", "Fail", "Timeout", ...).
    pub result: String,
    /// Wall-clock seconds spent on this job.
    pub elapsed_secs: f64,
}

impl SubmissionJob {
    pub fn new(
        source: PathBuf,
        file_size: u64,
        test_count: usize,
        impacts: ImpactAssessment,
    ) -> Self {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let base_name = source
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Self {
            source,
            file_name,
            base_name,
            file_size,
            test_count,
            impacts,
            status: JobStatus::Queued,
            result: String::new(),
            elapsed_secs: 0.0,
        }
    }
}

/// Whether executing a definition is expected to disrupt network
/// reachability to the device.
///
/// Flags only ever accumulate: once a test case sets one, no later
/// case clears it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactAssessment {
    #[serde(default)]
    pub affects_wan: bool,
    #[serde(default)]
    pub affects_lan: bool,
    #[serde(default)]
    pub restarts_network: bool,
}

impl ImpactAssessment {
    /// True if the device may become unreachable while the test runs.
    pub fn affects_network(self) -> bool {
        self.affects_wan || self.affects_lan
    }
}

/// Result artifact the device writes after running a definition.
///
/// Every field is optional on the wire; [`normalize_outcome`]
/// reconciles the missing ones.
///
/// [`normalize_outcome`]: crate::orchestrator::normalize_outcome
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultArtifact {
    #[serde(default)]
    pub overall_result: Option<String>,
    #[serde(default)]
    pub pass: Option<bool>,
    #[serde(default)]
    pub test_results: Option<Vec<ArtifactCase>>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

/// One per-case entry inside a result artifact.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactCase {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub execution_time: Option<f64>,
}

impl ArtifactCase {
    pub fn is_pass(&self) -> bool {
        self.status.eq_ignore_ascii_case("pass")
    }
}

/// Row persisted per submitted file.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord {
    pub file_name: String,
    pub file_size: u64,
    pub test_count: usize,
    pub send_status: String,
    pub overall_result: String,
    pub affects_wan: bool,
    pub affects_lan: bool,
    pub execution_time: f64,
    pub target_host: String,
    pub target_user: String,
}

/// Per-case row persisted under an [`OutcomeRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    pub service: String,
    pub action: String,
    pub status: String,
    pub details: String,
    pub execution_time: f64,
}

/// Durable sink for job outcomes (spec: Result Store seam).
///
/// The orchestrator only sees this narrow interface; the SQLite
/// implementation lives in `tcm-store`.
pub trait OutcomeSink {
    /// Persist the per-file record, returning its row id.
    fn save_file_result(&self, record: &OutcomeRecord) -> anyhow::Result<i64>;
    /// Persist the per-case rows under a previously saved record.
    fn save_case_results(&self, result_id: i64, cases: &[CaseResult]) -> anyhow::Result<()>;
}
