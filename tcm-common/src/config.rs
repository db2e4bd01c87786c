//! Configuration loading for TCM.
//!
//! Settings come from a TOML file (default: `<config dir>/tcm/config.toml`),
//! with every field individually defaulted so a partial file works.

use crate::types::DeviceConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default config directory name.
const CONFIG_DIR_NAME: &str = "tcm";

/// Default config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level TCM configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcmConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub wait: WaitConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

/// Hard budgets for individual remote operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// SSH connect budget in seconds.
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    /// Per-command execution budget in seconds.
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,
    /// File transfer budget in seconds.
    #[serde(default = "default_transfer_secs")]
    pub transfer_secs: u64,
    /// Base wait-for-result budget in seconds. Network-affecting tests
    /// get twice this.
    #[serde(default = "default_result_wait_secs")]
    pub result_wait_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            command_secs: default_command_secs(),
            transfer_secs: default_transfer_secs(),
            result_wait_secs: default_result_wait_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn transfer(&self) -> Duration {
        Duration::from_secs(self.transfer_secs)
    }

    pub fn result_wait(&self) -> Duration {
        Duration::from_secs(self.result_wait_secs)
    }

    /// Wait budget for tests expected to take the network down.
    pub fn network_result_wait(&self) -> Duration {
        Duration::from_secs(self.result_wait_secs * 2)
    }
}

/// Retry budgets and spacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts for a single job's upload-and-wait sequence.
    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,
    /// Delay between in-job retries, seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Reconnect attempts during a normal result wait and between jobs.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// Delay between normal reconnect attempts, seconds.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Reconnect attempts while waiting out a network-affecting test.
    #[serde(default = "default_network_reconnect_attempts")]
    pub network_reconnect_attempts: u32,
    /// Delay between post-disruption reconnect attempts, seconds.
    #[serde(default = "default_network_reconnect_delay_secs")]
    pub network_reconnect_delay_secs: u64,
    /// Pause between consecutive files, seconds.
    #[serde(default = "default_pause_between_files_secs")]
    pub pause_between_files_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            upload_attempts: default_upload_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            network_reconnect_attempts: default_network_reconnect_attempts(),
            network_reconnect_delay_secs: default_network_reconnect_delay_secs(),
            pause_between_files_secs: default_pause_between_files_secs(),
        }
    }
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn network_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.network_reconnect_delay_secs)
    }

    pub fn pause_between_files(&self) -> Duration {
        Duration::from_secs(self.pause_between_files_secs)
    }
}

/// Poll-loop pacing for result discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Poll interval for ordinary tests, seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Poll interval while the device may be rebooting, seconds.
    #[serde(default = "default_network_poll_interval_secs")]
    pub network_poll_interval_secs: u64,
    /// How often to surface a still-waiting observation, seconds.
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    /// Settle time before the first size read of a candidate, seconds.
    #[serde(default = "default_stabilize_delay_secs")]
    pub stabilize_delay_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            network_poll_interval_secs: default_network_poll_interval_secs(),
            progress_interval_secs: default_progress_interval_secs(),
            stabilize_delay_secs: default_stabilize_delay_secs(),
        }
    }
}

impl WaitConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn network_poll_interval(&self) -> Duration {
        Duration::from_secs(self.network_poll_interval_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn stabilize_delay(&self) -> Duration {
        Duration::from_secs(self.stabilize_delay_secs)
    }
}

/// Local filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Scratch directory downloaded result artifacts land in.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Downloaded artifacts older than this many hours are cleaned up.
    #[serde(default = "default_cleanup_max_age_hours")]
    pub cleanup_max_age_hours: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            db_path: default_db_path(),
            cleanup_max_age_hours: default_cleanup_max_age_hours(),
        }
    }
}

impl LocalConfig {
    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_hours * 3600)
    }
}

impl TcmConfig {
    /// Default config file path (`~/.config/tcm/config.toml` on Linux).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Load from an explicit path, failing if it cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, falling back to built-in
    /// defaults when no file exists.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            debug!("No config file at {}; using defaults", path.display());
            Ok(Self::default())
        }
    }
}

fn default_connect_secs() -> u64 {
    10
}

fn default_command_secs() -> u64 {
    30
}

fn default_transfer_secs() -> u64 {
    60
}

fn default_result_wait_secs() -> u64 {
    120
}

fn default_upload_attempts() -> u32 {
    2
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_network_reconnect_attempts() -> u32 {
    6
}

fn default_network_reconnect_delay_secs() -> u64 {
    10
}

fn default_pause_between_files_secs() -> u64 {
    2
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_network_poll_interval_secs() -> u64 {
    10
}

fn default_progress_interval_secs() -> u64 {
    15
}

fn default_stabilize_delay_secs() -> u64 {
    2
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("data/temp/results")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/history.db")
}

fn default_cleanup_max_age_hours() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TcmConfig::default();
        assert_eq!(config.timeouts.result_wait_secs, 120);
        assert_eq!(config.timeouts.network_result_wait(), Duration::from_secs(240));
        assert_eq!(config.wait.poll_interval_secs, 3);
        assert_eq!(config.wait.network_poll_interval_secs, 10);
        assert_eq!(config.retry.reconnect_attempts, 3);
        assert_eq!(config.retry.network_reconnect_attempts, 6);
        assert_eq!(config.device.host, "192.168.88.1");
        assert_eq!(config.device.result_dir, "/root/result");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TcmConfig = toml::from_str(
            r#"
            [device]
            host = "10.0.0.2"

            [timeouts]
            result_wait_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.device.host, "10.0.0.2");
        assert_eq!(config.device.user, "root");
        assert_eq!(config.timeouts.result_wait_secs, 60);
        assert_eq!(config.timeouts.connect_secs, 10);
        assert_eq!(config.retry.upload_attempts, 2);
    }

    #[test]
    fn test_roundtrip_serialization() {
        let config = TcmConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: TcmConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.device.host, config.device.host);
        assert_eq!(parsed.wait.poll_interval_secs, config.wait.poll_interval_secs);
    }
}
