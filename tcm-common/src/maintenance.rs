//! Scheduler-owned periodic maintenance, independent of any UI loop.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// A recurring background task with an explicit tick interval and an
/// explicit stop.
pub struct PeriodicTask {
    interval: Duration,
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl PeriodicTask {
    /// Spawn `tick` every `interval`. The first tick fires one full
    /// interval after the spawn.
    pub fn spawn<F>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(),
                    _ = stopped.changed() => break,
                }
            }
        });
        Self {
            interval,
            handle,
            stop,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the task and wait for it to wind down. No tick fires after
    /// this returns.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

/// Delete downloaded result artifacts older than `max_age`.
/// Returns how many files were removed.
pub fn cleanup_stale_results(dir: &Path, max_age: Duration) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0usize;
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if modified < cutoff {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed stale result file {}", path.display());
                    removed += 1;
                }
                Err(err) => warn!("Could not remove {}: {err}", path.display()),
            }
        }
    }
    Ok(removed)
}
