//! Result artifact discovery on the remote device.
//!
//! Polls the result directory for a file matching `<base>_*.json`,
//! separating genuinely new artifacts from stale ones by an initial
//! snapshot and the `YYYYMMDD_HHMMSS` suffix embedded in the name, and
//! only accepts a candidate once its size holds still. Tolerates the
//! device dropping off the network mid-wait.

use crate::cancel::CancelFlag;
use crate::config::TcmConfig;
use crate::errors::PipelineError;
use crate::transport::Transport;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Gap between the two size reads of the stability check.
const STABILITY_READ_GAP: Duration = Duration::from_secs(1);

/// Pacing and reconnect budget for one wait.
#[derive(Debug, Clone)]
pub struct WaitProfile {
    pub poll_interval: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub progress_interval: Duration,
    pub stabilize_delay: Duration,
}

impl WaitProfile {
    /// Profile for tests that leave connectivity alone.
    pub fn standard(config: &TcmConfig) -> Self {
        Self {
            poll_interval: config.wait.poll_interval(),
            reconnect_attempts: config.retry.reconnect_attempts,
            reconnect_delay: config.retry.reconnect_delay(),
            progress_interval: config.wait.progress_interval(),
            stabilize_delay: config.wait.stabilize_delay(),
        }
    }

    /// Profile for tests expected to take the device off the network:
    /// slower polls, a larger reconnect budget, wider spacing.
    pub fn network_reset(config: &TcmConfig) -> Self {
        Self {
            poll_interval: config.wait.network_poll_interval(),
            reconnect_attempts: config.retry.network_reconnect_attempts,
            reconnect_delay: config.retry.network_reconnect_delay(),
            progress_interval: config.wait.progress_interval(),
            stabilize_delay: config.wait.stabilize_delay(),
        }
    }
}

/// A discovered, stable result artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedArtifact {
    /// Full remote path.
    pub remote_path: String,
    /// File name alone.
    pub file_name: String,
}

/// Extract the `YYYYMMDD_HHMMSS` suffix from an artifact name.
///
/// The last two `_`-separated segments of the stem form the timestamp;
/// anything that is not two all-digit segments of the right width is
/// treated as unsuffixed.
pub fn timestamp_suffix(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 3 {
        return None;
    }
    let date = parts[parts.len() - 2];
    let time = parts[parts.len() - 1];
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if date.len() == 8 && time.len() == 6 && all_digits(date) && all_digits(time) {
        Some(format!("{date}_{time}"))
    } else {
        None
    }
}

/// Wait for a new result artifact for `base_name` to appear in
/// `result_dir`.
///
/// `on_progress` is called roughly every `progress_interval` with the
/// elapsed wait; it must not block.
#[allow(clippy::too_many_arguments)]
pub async fn wait_for_result<T, F>(
    transport: &mut T,
    base_name: &str,
    result_dir: &str,
    timeout: Duration,
    profile: &WaitProfile,
    connect_timeout: Duration,
    cancel: &CancelFlag,
    mut on_progress: F,
) -> Result<LocatedArtifact, PipelineError>
where
    T: Transport,
    F: FnMut(Duration),
{
    let pattern = format!("{base_name}_*.json");
    let result_dir = result_dir.trim_end_matches('/');
    let start = Instant::now();

    info!(
        "Waiting for result file matching {pattern} in {result_dir} (timeout: {}s)",
        timeout.as_secs()
    );

    // Snapshot what already matches so stale artifacts from earlier
    // runs are never mistaken for this run's result.
    let initial: HashSet<String> = transport
        .list_matching(result_dir, &pattern)
        .await
        .into_iter()
        .collect();
    let latest_known = initial
        .iter()
        .filter_map(|path| timestamp_suffix(path.rsplit('/').next().unwrap_or(path)))
        .max();
    debug!(
        "Initial snapshot: {} file(s), latest timestamp {:?}",
        initial.len(),
        latest_known
    );

    let mut reconnect_attempts = 0u32;
    let mut last_progress = Duration::ZERO;

    while start.elapsed() < timeout {
        cancel.checkpoint()?;

        if !transport.is_connected().await {
            if reconnect_attempts >= profile.reconnect_attempts {
                return Err(PipelineError::ReconnectExhausted {
                    attempts: profile.reconnect_attempts,
                });
            }
            reconnect_attempts += 1;
            info!(
                "Connection lost; reconnect attempt {reconnect_attempts}/{}",
                profile.reconnect_attempts
            );
            if !transport.connect(connect_timeout).await {
                warn!("Reconnect attempt {reconnect_attempts} failed");
                cancel.checkpoint()?;
                tokio::time::sleep(profile.reconnect_delay).await;
                continue;
            }
            info!("Reconnected; resuming result discovery");
        }

        if let Some(file_name) = transport.newest_matching(result_dir, &pattern).await {
            let remote_path = format!("{result_dir}/{file_name}");
            let mut is_new = !initial.contains(&remote_path);
            if !is_new {
                if let (Some(suffix), Some(known)) =
                    (timestamp_suffix(&file_name), latest_known.as_ref())
                {
                    if suffix > *known {
                        is_new = true;
                    }
                }
            }

            if is_new {
                info!("Found candidate result file: {file_name}");
                tokio::time::sleep(profile.stabilize_delay).await;
                if file_is_stable(transport, &remote_path).await {
                    info!("Result file confirmed: {file_name}");
                    return Ok(LocatedArtifact {
                        remote_path,
                        file_name,
                    });
                }
                debug!("Candidate {file_name} is still changing; keep polling");
            }
        }

        let elapsed = start.elapsed();
        if elapsed.saturating_sub(last_progress) >= profile.progress_interval {
            info!("[{}s] Still waiting for result file", elapsed.as_secs());
            on_progress(elapsed);
            last_progress = elapsed;
        }

        cancel.checkpoint()?;
        tokio::time::sleep(profile.poll_interval).await;
    }

    Err(PipelineError::ResultTimeout {
        waited_secs: timeout.as_secs(),
    })
}

/// A candidate only counts once two size reads a second apart agree;
/// the device may still be writing it.
async fn file_is_stable<T: Transport>(transport: &mut T, path: &str) -> bool {
    if !transport.file_exists(path).await {
        return false;
    }
    let first = transport.file_size(path).await;
    if first == 0 {
        return false;
    }
    tokio::time::sleep(STABILITY_READ_GAP).await;
    let second = transport.file_size(path).await;
    second != 0 && first == second
}
