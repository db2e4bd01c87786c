//! End-to-end lifecycle of submitted test files.
//!
//! Drives each queued file through connect → upload → wait → download
//! → outcome normalization → persistence, with the network-affecting
//! branch that expects the device to drop off the network mid-test.
//! Jobs run strictly in submission order; outcomes are persisted in
//! the same order.

use crate::cancel::CancelFlag;
use crate::config::TcmConfig;
use crate::definition::TestDefinition;
use crate::errors::{DefinitionError, PipelineError};
use crate::impact;
use crate::locator::{self, LocatedArtifact, WaitProfile};
use crate::transport::Transport;
use crate::types::{
    ArtifactCase, CaseResult, JobStatus, OutcomeRecord, OutcomeSink, ResultArtifact, SubmissionJob,
};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Maximum length of a user-visible result label.
const RESULT_LABEL_MAX: usize = 60;

/// Extra wait rounds after a transient locator failure (reconnect
/// budget gone, transport hiccup). Timeouts are not retried; they
/// already consumed the full budget.
const WAIT_ATTEMPTS: u32 = 2;

/// Push-based status surface consumed by the presentation layer.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A job changed state.
    Status {
        index: usize,
        file_name: String,
        status: JobStatus,
        result: String,
        elapsed_secs: f64,
    },
    /// Still waiting on a result file.
    WaitProgress {
        index: usize,
        file_name: String,
        waited_secs: u64,
    },
    /// The remote outcome stands but could not be recorded locally.
    StoreWarning {
        index: usize,
        file_name: String,
        message: String,
    },
    /// The batch is done.
    BatchFinished {
        processed: usize,
        total: usize,
        elapsed_secs: f64,
    },
}

/// Summary of one batch run.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    /// Jobs that reached a terminal state through processing.
    pub processed: usize,
    pub total: usize,
    pub elapsed_secs: f64,
    /// The batch stopped before its end (cancellation or a dead
    /// session between files).
    pub stopped_early: bool,
    pub cancelled: bool,
}

/// Drives the job queue against one device over one transport.
pub struct Orchestrator<T: Transport, S: OutcomeSink> {
    transport: T,
    store: S,
    config: TcmConfig,
    jobs: Vec<SubmissionJob>,
    cancel: CancelFlag,
    events: Option<mpsc::UnboundedSender<JobEvent>>,
}

impl<T: Transport, S: OutcomeSink> Orchestrator<T, S> {
    pub fn new(transport: T, store: S, config: TcmConfig) -> Self {
        Self {
            transport,
            store,
            config,
            jobs: Vec::new(),
            cancel: CancelFlag::new(),
            events: None,
        }
    }

    /// Handle for requesting cancellation from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Subscribe to job events. One subscriber; a later call replaces
    /// the earlier sink.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<JobEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Current queue snapshot.
    pub fn jobs(&self) -> &[SubmissionJob] {
        &self.jobs
    }

    pub fn into_parts(self) -> (T, S) {
        (self.transport, self.store)
    }

    /// Validate, classify, and queue a definition file. Validation
    /// failures never reach the network.
    pub fn enqueue(&mut self, path: impl Into<PathBuf>) -> Result<usize, DefinitionError> {
        let path = path.into();
        let definition = TestDefinition::load(&path)?;
        let impacts = impact::classify(&definition);
        let file_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let job = SubmissionJob::new(path, file_size, definition.case_count(), impacts);
        info!(
            "Queued {} ({} case(s), affects_network={})",
            job.file_name,
            job.test_count,
            impacts.affects_network()
        );
        self.jobs.push(job);
        Ok(self.jobs.len() - 1)
    }

    /// Drop all queued jobs.
    pub fn clear_queue(&mut self) {
        self.jobs.clear();
    }

    /// Process every queued job in order.
    ///
    /// Per-job failures mark that job and move on; a dead session that
    /// cannot be revived *between* jobs stops the whole remaining
    /// queue, and cancellation stops the batch without erroring the
    /// jobs that never started.
    pub async fn run_batch(&mut self) -> BatchSummary {
        let start = Instant::now();
        let total = self.jobs.len();
        let mut processed = 0usize;
        let mut stopped_early = false;

        for index in 0..total {
            if self.cancel.is_cancelled() {
                stopped_early = true;
                break;
            }

            let file_start = Instant::now();
            info!(
                "Processing file {}/{}: {}",
                index + 1,
                total,
                self.jobs[index].file_name
            );

            match self.process_job(index, file_start).await {
                Ok(()) => {
                    processed += 1;
                }
                Err(err) if err.is_cancelled() => {
                    info!("Processing cancelled by user");
                    self.update_job(index, JobStatus::Failed, Some("Cancelled"), file_start);
                    processed += 1;
                    stopped_early = true;
                    break;
                }
                Err(PipelineError::ResultTimeout { waited_secs }) => {
                    error!(
                        "Timed out after {waited_secs}s waiting on {}",
                        self.jobs[index].file_name
                    );
                    self.update_job(index, JobStatus::Failed, Some("Timeout"), file_start);
                    processed += 1;
                }
                Err(err) => {
                    error!("Error processing {}: {err:#}", self.jobs[index].file_name);
                    let label = truncate_label(&err.to_string(), RESULT_LABEL_MAX);
                    self.update_job(index, JobStatus::Error, Some(&label), file_start);
                    processed += 1;
                }
            }

            if index + 1 < total {
                if !self.ensure_session_between_jobs().await {
                    stopped_early = true;
                    break;
                }
                // Give the device room to breathe between files.
                tokio::time::sleep(self.config.retry.pause_between_files()).await;
            }
        }

        let summary = BatchSummary {
            processed,
            total,
            elapsed_secs: start.elapsed().as_secs_f64(),
            stopped_early,
            cancelled: self.cancel.is_cancelled(),
        };
        info!(
            "Batch finished: {}/{} file(s) in {:.1}s",
            summary.processed, summary.total, summary.elapsed_secs
        );
        self.emit(JobEvent::BatchFinished {
            processed: summary.processed,
            total: summary.total,
            elapsed_secs: summary.elapsed_secs,
        });
        summary
    }

    /// One job, start to terminal state. Any error return is turned
    /// into a terminal job state by the caller.
    async fn process_job(&mut self, index: usize, file_start: Instant) -> Result<(), PipelineError> {
        let affects_network = self.jobs[index].impacts.affects_network();
        self.update_job(index, JobStatus::Sending, None, file_start);

        if affects_network {
            warn!(
                "Test {} may temporarily take down network connectivity",
                self.jobs[index].file_name
            );
        }

        self.upload_with_retry(index).await?;
        self.update_job(index, JobStatus::Testing, None, file_start);

        let located = if affects_network {
            self.update_job(index, JobStatus::NetworkReset, None, file_start);
            info!("Network-affecting test; waiting for the device to come back");
            self.wait_for_artifact(index, &WaitProfile::network_reset(&self.config), true)
                .await?
        } else {
            let profile = WaitProfile::standard(&self.config);
            let mut attempt = 1u32;
            loop {
                match self.wait_for_artifact(index, &profile, false).await {
                    Ok(located) => break located,
                    Err(err) if err.is_cancelled() => return Err(err),
                    Err(err @ PipelineError::ResultTimeout { .. }) => return Err(err),
                    Err(err) if attempt < WAIT_ATTEMPTS => {
                        warn!("Error waiting for result: {err:#}. Retrying...");
                        attempt += 1;
                        tokio::time::sleep(self.config.retry.retry_delay()).await;
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        self.download_and_record(index, located, file_start).await
    }

    /// Upload the job's file to the remote config directory, with the
    /// configured attempt budget and reconnection between attempts.
    async fn upload_with_retry(&mut self, index: usize) -> Result<(), PipelineError> {
        let attempts = self.config.retry.upload_attempts.max(1);
        let file_name = self.jobs[index].file_name.clone();
        let source = self.jobs[index].source.clone();
        let remote = format!(
            "{}/{}",
            self.config.device.config_dir.trim_end_matches('/'),
            file_name
        );

        for attempt in 1..=attempts {
            self.cancel.checkpoint()?;

            if !self.transport.is_connected().await {
                info!("SSH connection lost, attempting to reconnect...");
                if !self.transport.connect(self.config.timeouts.connect()).await {
                    if attempt == attempts {
                        return Err(PipelineError::Connect {
                            host: self.config.device.host.clone(),
                        });
                    }
                    tokio::time::sleep(self.config.retry.reconnect_delay()).await;
                    continue;
                }
            }

            if self.transport.upload(&source, &remote).await {
                info!("{file_name} uploaded successfully");
                return Ok(());
            }
            if attempt == attempts {
                break;
            }
            warn!("Upload attempt {attempt} failed for {file_name}; retrying");
            tokio::time::sleep(self.config.retry.retry_delay()).await;
        }

        Err(PipelineError::Upload {
            file: file_name,
            attempts,
        })
    }

    async fn wait_for_artifact(
        &mut self,
        index: usize,
        profile: &WaitProfile,
        network_budget: bool,
    ) -> Result<LocatedArtifact, PipelineError> {
        let timeout = if network_budget {
            self.config.timeouts.network_result_wait()
        } else {
            self.config.timeouts.result_wait()
        };
        let base_name = self.jobs[index].base_name.clone();
        let file_name = self.jobs[index].file_name.clone();
        let result_dir = self.config.device.result_dir.clone();
        let connect_timeout = self.config.timeouts.connect();
        let events = self.events.clone();

        locator::wait_for_result(
            &mut self.transport,
            &base_name,
            &result_dir,
            timeout,
            profile,
            connect_timeout,
            &self.cancel,
            move |elapsed| {
                if let Some(tx) = &events {
                    let _ = tx.send(JobEvent::WaitProgress {
                        index,
                        file_name: file_name.clone(),
                        waited_secs: elapsed.as_secs(),
                    });
                }
            },
        )
        .await
    }

    /// Download the located artifact, normalize its outcome, persist
    /// it, and complete the job.
    async fn download_and_record(
        &mut self,
        index: usize,
        located: LocatedArtifact,
        file_start: Instant,
    ) -> Result<(), PipelineError> {
        let local_dir = self.config.local.results_dir.clone();
        if let Err(err) = tokio::fs::create_dir_all(&local_dir).await {
            return Err(PipelineError::Other(anyhow::Error::new(err).context(
                format!("failed to create local results dir {}", local_dir.display()),
            )));
        }
        let local_path = local_dir.join(&located.file_name);

        if !self.transport.download(&located.remote_path, &local_path).await {
            return Err(PipelineError::Download {
                file: located.file_name,
            });
        }
        info!("Result file {} downloaded successfully", located.file_name);

        let text = tokio::fs::read_to_string(&local_path).await.map_err(|err| {
            PipelineError::Other(
                anyhow::Error::new(err)
                    .context(format!("failed to read downloaded {}", local_path.display())),
            )
        })?;
        let artifact: ResultArtifact =
            serde_json::from_str(&text).map_err(|source| PipelineError::Parse {
                file: located.file_name.clone(),
                source,
            })?;

        let overall = normalize_outcome(&artifact);
        info!("Determined test result: {overall}");

        let elapsed = file_start.elapsed().as_secs_f64();
        let job = &self.jobs[index];
        let cases = collect_cases(&artifact, &job.base_name, &overall, elapsed);
        let record = OutcomeRecord {
            file_name: job.file_name.clone(),
            file_size: job.file_size,
            test_count: cases.len(),
            send_status: "Complete".to_string(),
            overall_result: overall.clone(),
            affects_wan: job.impacts.affects_wan,
            affects_lan: job.impacts.affects_lan,
            execution_time: elapsed,
            target_host: self.config.device.host.clone(),
            target_user: self.config.device.user.clone(),
        };

        // The remote outcome stands even if local recording fails; the
        // user just gets a warning about the missing history row.
        match self.store.save_file_result(&record) {
            Ok(result_id) => {
                if let Err(err) = self.store.save_case_results(result_id, &cases) {
                    self.store_warning(index, format!("failed to record case details: {err:#}"));
                }
            }
            Err(err) => {
                self.store_warning(index, format!("failed to record outcome: {err:#}"));
            }
        }

        self.update_job(index, JobStatus::Complete, Some(&overall), file_start);
        Ok(())
    }

    /// Between-job continuity: a session that cannot be revived in the
    /// configured attempts stops the entire remaining queue. A dropped
    /// connection here usually means the device is in no state to take
    /// more files this run.
    async fn ensure_session_between_jobs(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if self.transport.is_connected().await {
            return true;
        }

        info!("Connection lost between files; attempting to reconnect");
        for attempt in 1..=self.config.retry.reconnect_attempts {
            if self.cancel.is_cancelled() {
                return false;
            }
            if self.transport.connect(self.config.timeouts.connect()).await {
                info!("Reconnected successfully");
                return true;
            }
            warn!(
                "Reconnect attempt {attempt}/{} failed",
                self.config.retry.reconnect_attempts
            );
            tokio::time::sleep(self.config.retry.reconnect_delay()).await;
        }
        error!("Could not re-establish the session; stopping the remaining queue");
        false
    }

    fn update_job(
        &mut self,
        index: usize,
        status: JobStatus,
        result: Option<&str>,
        file_start: Instant,
    ) {
        let job = &mut self.jobs[index];
        job.status = status;
        if let Some(result) = result {
            job.result = result.to_string();
        }
        job.elapsed_secs = file_start.elapsed().as_secs_f64();
        let event = JobEvent::Status {
            index,
            file_name: job.file_name.clone(),
            status,
            result: job.result.clone(),
            elapsed_secs: job.elapsed_secs,
        };
        self.emit(event);
    }

    fn store_warning(&mut self, index: usize, message: String) {
        warn!("{}: {message}", self.jobs[index].file_name);
        let file_name = self.jobs[index].file_name.clone();
        self.emit(JobEvent::StoreWarning {
            index,
            file_name,
            message,
        });
    }

    fn emit(&self, event: JobEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Reconcile an artifact's result fields into a single label.
///
/// An explicit, non-"Unknown" `overall_result` wins verbatim. Otherwise
/// a boolean `pass` field decides, then the per-case statuses (all
/// "pass", case-insensitively), and with no signal at all the outcome
/// defaults to "Pass". That last bias favors false negatives over
/// alarming the user and is kept deliberately; see the tests.
pub fn normalize_outcome(artifact: &ResultArtifact) -> String {
    if let Some(raw) = artifact.overall_result.as_deref() {
        let label = raw.trim();
        if !label.is_empty() && !label.eq_ignore_ascii_case("unknown") {
            return label.to_string();
        }
    }
    if let Some(pass) = artifact.pass {
        return if pass { "Pass" } else { "Fail" }.to_string();
    }
    if let Some(cases) = artifact.test_results.as_deref() {
        if !cases.is_empty() {
            let all_pass = cases.iter().all(ArtifactCase::is_pass);
            return if all_pass { "Pass" } else { "Fail" }.to_string();
        }
    }
    "Pass".to_string()
}

/// Per-case rows for persistence. An artifact without `test_results`
/// yields exactly one synthesized row from its top-level fields.
fn collect_cases(
    artifact: &ResultArtifact,
    base_name: &str,
    overall: &str,
    elapsed: f64,
) -> Vec<CaseResult> {
    match artifact.test_results.as_deref() {
        Some(list) if !list.is_empty() => list
            .iter()
            .map(|case| CaseResult {
                service: if case.service.is_empty() {
                    "unknown".to_string()
                } else {
                    case.service.clone()
                },
                action: case.action.clone(),
                status: if case.status.is_empty() {
                    "unknown".to_string()
                } else {
                    case.status.clone()
                },
                details: case.details.clone(),
                execution_time: case.execution_time.unwrap_or(0.0),
            })
            .collect(),
        _ => vec![synthesized_case(artifact, base_name, overall, elapsed)],
    }
}

/// Build the single stand-in case for an artifact without per-case
/// entries, recovering service/action from the submitted file's name
/// (`<service>_<action...>`) when the artifact does not say.
fn synthesized_case(
    artifact: &ResultArtifact,
    base_name: &str,
    overall: &str,
    elapsed: f64,
) -> CaseResult {
    let (fallback_service, fallback_action) = split_base_name(base_name);
    let service = artifact
        .service
        .clone()
        .filter(|s| !s.is_empty() && s != "unknown")
        .unwrap_or(fallback_service);
    let action = artifact
        .action
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_action);
    let passed = overall.contains("Pass");
    let details = artifact
        .details
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            format!(
                "{service} {action} {}",
                if passed { "completed successfully" } else { "failed" }
            )
        });
    CaseResult {
        service,
        action,
        status: if passed { "pass" } else { "fail" }.to_string(),
        details,
        execution_time: elapsed,
    }
}

fn split_base_name(base: &str) -> (String, String) {
    match base.split_once('_') {
        Some((service, action)) => (service.to_string(), action.to_string()),
        None if base.is_empty() => ("unknown".to_string(), String::new()),
        None => (base.to_string(), String::new()),
    }
}

fn truncate_label(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRemoteFile, MockTransport};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    // ── Normalization ────────────────────────────────────────────────

    fn artifact(json: &str) -> ResultArtifact {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_normalize_defaults_to_pass_on_no_signal_at_all() {
        // Deliberate legacy bias: an empty artifact counts as a pass.
        assert_eq!(normalize_outcome(&artifact("{}")), "Pass");
    }

    #[test]
    fn test_normalize_pass_bool() {
        assert_eq!(normalize_outcome(&artifact(r#"{"pass": true}"#)), "Pass");
        assert_eq!(normalize_outcome(&artifact(r#"{"pass": false}"#)), "Fail");
    }

    #[test]
    fn test_normalize_case_statuses() {
        assert_eq!(
            normalize_outcome(&artifact(
                r#"{"test_results":[{"status":"pass"},{"status":"fail"}]}"#
            )),
            "Fail"
        );
        assert_eq!(
            normalize_outcome(&artifact(r#"{"test_results":[{"status":"PASS"}]}"#)),
            "Pass"
        );
    }

    #[test]
    fn test_normalize_explicit_result_wins() {
        assert_eq!(
            normalize_outcome(&artifact(r#"{"overall_result":"Fail","pass":true}"#)),
            "Fail"
        );
        // Unrecognized labels are carried through verbatim.
        assert_eq!(
            normalize_outcome(&artifact(r#"{"overall_result":"Partial"}"#)),
            "Partial"
        );
    }

    #[test]
    fn test_normalize_unknown_falls_through() {
        assert_eq!(
            normalize_outcome(&artifact(r#"{"overall_result":"Unknown","pass":false}"#)),
            "Fail"
        );
        assert_eq!(
            normalize_outcome(&artifact(r#"{"overall_result":""}"#)),
            "Pass"
        );
    }

    #[test]
    fn test_synthesized_case_from_file_name() {
        let case = synthesized_case(&artifact("{}"), "wifi_channel_switch", "Pass", 4.2);
        assert_eq!(case.service, "wifi");
        assert_eq!(case.action, "channel_switch");
        assert_eq!(case.status, "pass");
        assert!(case.details.contains("completed successfully"));
    }

    #[test]
    fn test_synthesized_case_prefers_artifact_fields() {
        let case = synthesized_case(
            &artifact(r#"{"service":"dhcp","action":"renew","details":"lease ok"}"#),
            "other_name",
            "Fail",
            1.0,
        );
        assert_eq!(case.service, "dhcp");
        assert_eq!(case.action, "renew");
        assert_eq!(case.status, "fail");
        assert_eq!(case.details, "lease ok");
    }

    // ── Batch scenarios ──────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingSink {
        fail: bool,
        records: Mutex<Vec<OutcomeRecord>>,
        cases: Mutex<Vec<(i64, Vec<CaseResult>)>>,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    impl OutcomeSink for RecordingSink {
        fn save_file_result(&self, record: &OutcomeRecord) -> anyhow::Result<i64> {
            if self.fail {
                anyhow::bail!("store unavailable");
            }
            let mut records = self.records.lock().unwrap();
            records.push(record.clone());
            Ok(records.len() as i64)
        }

        fn save_case_results(&self, result_id: i64, cases: &[CaseResult]) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("store unavailable");
            }
            self.cases.lock().unwrap().push((result_id, cases.to_vec()));
            Ok(())
        }
    }

    fn write_definition(dir: &Path, name: &str, json: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, json).unwrap();
        path
    }

    const PLAIN_DEFINITION: &str =
        r#"{"test_cases": [{"service": "system", "action": "info", "params": {}}]}"#;
    const NETWORK_DEFINITION: &str =
        r#"{"test_cases": [{"service": "network", "action": "restart", "params": {}}]}"#;

    fn test_config(scratch: &Path) -> TcmConfig {
        let mut config = TcmConfig::default();
        config.local.results_dir = scratch.join("results");
        config
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_job_completes_with_pass() {
        let scratch = tempfile::tempdir().unwrap();
        let definition = write_definition(scratch.path(), "sysinfo.json", PLAIN_DEFINITION);

        let mock = MockTransport::new().with_scheduled_file(
            2,
            MockRemoteFile::new(
                "/root/result/sysinfo_20250610_120000.json",
                64,
                r#"{"overall_result":"Pass"}"#,
            ),
        );
        let mut orchestrator =
            Orchestrator::new(mock, RecordingSink::default(), test_config(scratch.path()));
        orchestrator.enqueue(definition).unwrap();

        let summary = orchestrator.run_batch().await;
        assert_eq!(summary.processed, 1);
        assert!(!summary.stopped_early);

        let job = &orchestrator.jobs()[0];
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.result, "Pass");

        let (transport, store) = orchestrator.into_parts();
        assert_eq!(transport.uploads.len(), 1);
        assert_eq!(transport.uploads[0].1, "/root/config/sysinfo.json");
        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].overall_result, "Pass");
        assert_eq!(records[0].send_status, "Complete");
        // No test_results in the artifact: exactly one synthesized case.
        let cases = store.cases.lock().unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].1.len(), 1);
        assert_eq!(cases[0].1[0].service, "sysinfo");
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_job_passes_through_network_reset() {
        let scratch = tempfile::tempdir().unwrap();
        let definition = write_definition(scratch.path(), "net_restart.json", NETWORK_DEFINITION);

        // Upload drops the session; first reconnect fails, second lands.
        let mock = MockTransport::new()
            .with_connect_script(vec![true, false, true])
            .with_drop_after_upload()
            .with_scheduled_file(
                1,
                MockRemoteFile::new(
                    "/root/result/net_restart_20250610_120500.json",
                    80,
                    r#"{"pass": true}"#,
                ),
            );
        let mut orchestrator =
            Orchestrator::new(mock, RecordingSink::default(), test_config(scratch.path()));
        let mut events = orchestrator.subscribe();
        orchestrator.enqueue(definition).unwrap();

        let summary = orchestrator.run_batch().await;
        assert_eq!(summary.processed, 1);

        let job = &orchestrator.jobs()[0];
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.result, "Pass");

        let seen: Vec<JobStatus> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                JobEvent::Status { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert!(seen.contains(&JobStatus::NetworkReset), "statuses: {seen:?}");
        assert!(seen.contains(&JobStatus::Complete));

        let (transport, _) = orchestrator.into_parts();
        // Initial connect plus the two reconnect attempts.
        assert_eq!(transport.connect_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_job_but_batch_continues() {
        let scratch = tempfile::tempdir().unwrap();
        let first = write_definition(scratch.path(), "never_done.json", PLAIN_DEFINITION);
        let second = write_definition(scratch.path(), "quick.json", PLAIN_DEFINITION);

        // Only the second job's artifact ever appears.
        let mock = MockTransport::new().with_scheduled_file(
            41,
            MockRemoteFile::new(
                "/root/result/quick_20250610_121000.json",
                32,
                r#"{"overall_result":"Pass"}"#,
            ),
        );
        let mut orchestrator =
            Orchestrator::new(mock, RecordingSink::default(), test_config(scratch.path()));
        orchestrator.enqueue(first).unwrap();
        orchestrator.enqueue(second).unwrap();

        let summary = orchestrator.run_batch().await;
        assert_eq!(summary.processed, 2);
        assert!(!summary.stopped_early);

        assert_eq!(orchestrator.jobs()[0].status, JobStatus::Failed);
        assert_eq!(orchestrator.jobs()[0].result, "Timeout");
        assert_eq!(orchestrator.jobs()[1].status, JobStatus::Complete);
        assert_eq!(orchestrator.jobs()[1].result, "Pass");
    }

    #[tokio::test(start_paused = true)]
    async fn test_between_job_reconnect_failure_stops_batch() {
        let scratch = tempfile::tempdir().unwrap();
        let first = write_definition(scratch.path(), "first.json", PLAIN_DEFINITION);
        let second = write_definition(scratch.path(), "second.json", PLAIN_DEFINITION);

        // The session dies as the first download completes and never
        // comes back: initial connect succeeds, the three between-job
        // reconnects all fail.
        let mock = MockTransport::new()
            .with_connect_script(vec![true, false, false, false])
            .with_drop_after_download()
            .with_scheduled_file(
                1,
                MockRemoteFile::new(
                    "/root/result/first_20250610_121500.json",
                    48,
                    r#"{"overall_result":"Pass"}"#,
                ),
            );
        let mut orchestrator =
            Orchestrator::new(mock, RecordingSink::default(), test_config(scratch.path()));
        orchestrator.enqueue(first).unwrap();
        orchestrator.enqueue(second).unwrap();

        let summary = orchestrator.run_batch().await;
        assert_eq!(summary.processed, 1);
        assert!(summary.stopped_early);
        assert!(!summary.cancelled);

        // Job N's outcome stands; job N+1 stays Queued, not Error.
        assert_eq!(orchestrator.jobs()[0].status, JobStatus::Complete);
        assert_eq!(orchestrator.jobs()[1].status, JobStatus::Queued);

        let (transport, store) = orchestrator.into_parts();
        assert_eq!(transport.connect_calls, 4);
        assert_eq!(store.records.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_batch_within_a_poll() {
        let scratch = tempfile::tempdir().unwrap();
        let first = write_definition(scratch.path(), "first.json", PLAIN_DEFINITION);
        let second = write_definition(scratch.path(), "second.json", PLAIN_DEFINITION);

        let mock = MockTransport::new();
        let mut orchestrator =
            Orchestrator::new(mock, RecordingSink::default(), test_config(scratch.path()));
        orchestrator.enqueue(first).unwrap();
        orchestrator.enqueue(second).unwrap();

        let cancel = orchestrator.cancel_flag();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            cancel.cancel();
        });

        let summary = orchestrator.run_batch().await;
        assert!(summary.cancelled);
        assert!(summary.stopped_early);

        assert_eq!(orchestrator.jobs()[0].status, JobStatus::Failed);
        assert_eq!(orchestrator.jobs()[0].result, "Cancelled");
        assert_eq!(orchestrator.jobs()[1].status, JobStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_errors_job() {
        let scratch = tempfile::tempdir().unwrap();
        let definition = write_definition(scratch.path(), "broken.json", PLAIN_DEFINITION);

        let mock = MockTransport::new().with_upload_ok(false);
        let mut orchestrator =
            Orchestrator::new(mock, RecordingSink::default(), test_config(scratch.path()));
        orchestrator.enqueue(definition).unwrap();

        let summary = orchestrator.run_batch().await;
        assert_eq!(summary.processed, 1);
        assert_eq!(orchestrator.jobs()[0].status, JobStatus::Error);
        assert!(orchestrator.jobs()[0].result.contains("upload"));

        let (transport, _) = orchestrator.into_parts();
        assert_eq!(transport.uploads.len(), 2, "both attempts recorded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_keeps_remote_outcome() {
        let scratch = tempfile::tempdir().unwrap();
        let definition = write_definition(scratch.path(), "stored.json", PLAIN_DEFINITION);

        let mock = MockTransport::new().with_scheduled_file(
            1,
            MockRemoteFile::new(
                "/root/result/stored_20250610_122000.json",
                40,
                r#"{"overall_result":"Pass"}"#,
            ),
        );
        let mut orchestrator =
            Orchestrator::new(mock, RecordingSink::failing(), test_config(scratch.path()));
        let mut events = orchestrator.subscribe();
        orchestrator.enqueue(definition).unwrap();

        orchestrator.run_batch().await;
        assert_eq!(orchestrator.jobs()[0].status, JobStatus::Complete);
        assert_eq!(orchestrator.jobs()[0].result, "Pass");

        let warnings: Vec<JobEvent> = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, JobEvent::StoreWarning { .. }))
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_artifact_cases_persisted_verbatim() {
        let scratch = tempfile::tempdir().unwrap();
        let definition = write_definition(scratch.path(), "multi.json", PLAIN_DEFINITION);

        let mock = MockTransport::new().with_scheduled_file(
            1,
            MockRemoteFile::new(
                "/root/result/multi_20250610_123000.json",
                128,
                r#"{"test_results":[
                    {"service":"wan","action":"ping","status":"pass","details":"8.8.8.8 ok","execution_time":1.5},
                    {"service":"lan","action":"ping","status":"FAIL","details":"gateway lost"}
                ]}"#,
            ),
        );
        let mut orchestrator =
            Orchestrator::new(mock, RecordingSink::default(), test_config(scratch.path()));
        orchestrator.enqueue(definition).unwrap();
        orchestrator.run_batch().await;

        // Mixed statuses normalize to Fail.
        assert_eq!(orchestrator.jobs()[0].result, "Fail");

        let (_, store) = orchestrator.into_parts();
        let records = store.records.lock().unwrap();
        assert_eq!(records[0].test_count, 2);
        let cases = store.cases.lock().unwrap();
        assert_eq!(cases[0].1.len(), 2);
        assert_eq!(cases[0].1[0].service, "wan");
        assert_eq!(cases[0].1[0].execution_time, 1.5);
        assert_eq!(cases[0].1[1].status, "FAIL");
        assert_eq!(cases[0].1[1].execution_time, 0.0);
    }

    #[test]
    fn test_enqueue_rejects_missing_test_cases_without_network() {
        let scratch = tempfile::tempdir().unwrap();
        let definition = write_definition(scratch.path(), "bad.json", r#"{"name":"nope"}"#);

        let mock = MockTransport::new();
        let mut orchestrator = Orchestrator::new(
            mock,
            RecordingSink::default(),
            test_config(scratch.path()),
        );
        let err = orchestrator.enqueue(definition).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingTestCases));
        assert!(orchestrator.jobs().is_empty());

        let (transport, _) = orchestrator.into_parts();
        assert_eq!(transport.connect_calls, 0);
        assert!(transport.uploads.is_empty());
    }

    #[test]
    fn test_truncate_label() {
        assert_eq!(truncate_label("short", 60), "short");
        let long = "x".repeat(100);
        assert_eq!(truncate_label(&long, 60).chars().count(), 60);
    }
}
