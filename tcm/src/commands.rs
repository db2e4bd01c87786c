//! Command implementations: wire config, store, transport, and
//! orchestrator together and render job events for the terminal.

use crate::cli::Cli;
use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::time::Duration;
use tcm_common::{
    CancelFlag, JobEvent, JobStatus, Orchestrator, PeriodicTask, SshOptions, SshTransport,
    TcmConfig, TestDefinition, Transport, check_remote_dirs, classify, cleanup_stale_results,
};
use tcm_store::Database;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

/// Delay between the bounded connect attempts of `tcm check`.
const CHECK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Connect attempts for `tcm check`.
const CHECK_ATTEMPTS: u32 = 3;

/// Settings-table keys mirrored from the effective device config.
const SETTING_HOST: &str = "lan_ip";
const SETTING_USER: &str = "username";
const SETTING_CONFIG_PATH: &str = "config_path";
const SETTING_RESULT_PATH: &str = "result_path";

/// Resolve the effective config: TOML file, then saved settings, then
/// command-line overrides.
fn effective_config(cli: &Cli, db: &Database) -> Result<TcmConfig> {
    let mut config = match cli.config.as_ref() {
        Some(path) => TcmConfig::load(path)?,
        None => TcmConfig::load_or_default()?,
    };

    config.device.host = db.get_setting(SETTING_HOST, &config.device.host);
    config.device.user = db.get_setting(SETTING_USER, &config.device.user);
    config.device.config_dir = db.get_setting(SETTING_CONFIG_PATH, &config.device.config_dir);
    config.device.result_dir = db.get_setting(SETTING_RESULT_PATH, &config.device.result_dir);

    if let Some(host) = cli.host.as_ref() {
        config.device.host = host.clone();
    }
    if let Some(user) = cli.user.as_ref() {
        config.device.user = user.clone();
    }
    if let Some(identity) = cli.identity.as_ref() {
        config.device.identity_file = identity.clone();
    }
    Ok(config)
}

fn open_database(cli: &Cli) -> Result<Database> {
    // The database path comes from the file config alone; settings
    // stored inside it cannot relocate it.
    let config = match cli.config.as_ref() {
        Some(path) => TcmConfig::load(path)?,
        None => TcmConfig::load_or_default()?,
    };
    Database::open(&config.local.db_path)
}

fn persist_device_settings(db: &Database, config: &TcmConfig) {
    let pairs = [
        (SETTING_HOST, config.device.host.as_str()),
        (SETTING_USER, config.device.user.as_str()),
        (SETTING_CONFIG_PATH, config.device.config_dir.as_str()),
        (SETTING_RESULT_PATH, config.device.result_dir.as_str()),
    ];
    for (key, value) in pairs {
        if let Err(err) = db.set_setting(key, value) {
            warn!("Could not persist setting {key}: {err:#}");
        }
    }
}

fn transport_for(config: &TcmConfig) -> SshTransport {
    SshTransport::new(
        config.device.clone(),
        SshOptions {
            command_timeout: config.timeouts.command(),
            transfer_timeout: config.timeouts.transfer(),
        },
    )
}

async fn print_events(mut events: UnboundedReceiver<JobEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            JobEvent::Status {
                file_name,
                status,
                result,
                elapsed_secs,
                ..
            } => {
                if result.is_empty() {
                    println!("{file_name}: {status}");
                } else {
                    println!("{file_name}: {status} ({result}, {elapsed_secs:.1}s)");
                }
            }
            JobEvent::WaitProgress {
                file_name,
                waited_secs,
                ..
            } => {
                println!("{file_name}: waiting for result... {waited_secs}s");
            }
            JobEvent::StoreWarning {
                file_name, message, ..
            } => {
                eprintln!("warning: {file_name}: {message}");
            }
            JobEvent::BatchFinished {
                processed,
                total,
                elapsed_secs,
            } => {
                println!("Processed {processed}/{total} file(s) in {elapsed_secs:.1}s");
            }
        }
    }
}

/// `tcm send` - push files through the pipeline in order.
pub async fn run_send(cli: &Cli, files: &[PathBuf], timeout_secs: Option<u64>) -> Result<i32> {
    let db = open_database(cli)?;
    let mut config = effective_config(cli, &db)?;
    if let Some(secs) = timeout_secs {
        config.timeouts.result_wait_secs = secs;
    }

    println!(
        "Sending {} file(s) to {} (started {})",
        files.len(),
        config.device.host,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    // Hourly sweep of the local scratch dir while the batch runs.
    let scratch = config.local.results_dir.clone();
    let max_age = config.local.cleanup_max_age();
    let cleanup = PeriodicTask::spawn(Duration::from_secs(3600), move || {
        if let Err(err) = cleanup_stale_results(&scratch, max_age) {
            warn!("Scratch cleanup failed: {err:#}");
        }
    });

    persist_device_settings(&db, &config);
    let host = config.device.host.clone();
    let transport = transport_for(&config);
    let mut orchestrator = Orchestrator::new(transport, db, config);

    let mut invalid = 0usize;
    for file in files {
        if let Err(err) = orchestrator.enqueue(file.clone()) {
            eprintln!("error: {}: {err}", file.display());
            invalid += 1;
        }
    }
    if orchestrator.jobs().is_empty() {
        cleanup.stop().await;
        bail!("no valid test definition files to send");
    }

    let events = orchestrator.subscribe();
    let printer = tokio::spawn(print_events(events));
    spawn_ctrl_c_handler(orchestrator.cancel_flag());

    let summary = orchestrator.run_batch().await;
    let jobs = orchestrator.jobs().to_vec();
    let (mut transport, db) = orchestrator.into_parts();
    transport.disconnect().await;
    let _ = printer.await;
    cleanup.stop().await;

    let log_status = if summary.cancelled {
        "batch_cancelled"
    } else if summary.stopped_early {
        "batch_stopped"
    } else {
        "batch_complete"
    };
    if let Err(err) = db.log_connection(
        &host,
        log_status,
        &format!("{}/{} file(s) processed", summary.processed, summary.total),
    ) {
        warn!("Could not record connection log entry: {err:#}");
    }

    println!();
    let mut failures = invalid;
    for job in &jobs {
        println!(
            "  {:<30} {:<14} {:<10} {:>7.1}s",
            job.file_name,
            job.status.to_string(),
            job.result,
            job.elapsed_secs
        );
        if matches!(job.status, JobStatus::Error | JobStatus::Failed) {
            failures += 1;
        }
    }

    Ok(if failures > 0 || summary.stopped_early { 1 } else { 0 })
}

/// `tcm check` - bounded connect probe plus remote directory check.
pub async fn run_check(cli: &Cli) -> Result<i32> {
    let db = open_database(cli)?;
    let config = effective_config(cli, &db)?;
    let mut transport = transport_for(&config);

    println!("Testing connection to {}...", config.device.host);
    let mut connected = false;
    for attempt in 1..=CHECK_ATTEMPTS {
        info!("Connection attempt {attempt}/{CHECK_ATTEMPTS}");
        if transport.connect(config.timeouts.connect()).await {
            connected = true;
            break;
        }
        if attempt < CHECK_ATTEMPTS {
            tokio::time::sleep(CHECK_RETRY_DELAY).await;
        }
    }

    if !connected {
        println!("Connection failed after {CHECK_ATTEMPTS} attempts");
        let _ = db.log_connection(&config.device.host, "failed", "connect probe exhausted");
        return Ok(1);
    }

    let missing = check_remote_dirs(
        &mut transport,
        &[
            config.device.config_dir.as_str(),
            config.device.result_dir.as_str(),
        ],
        config.timeouts.command(),
    )
    .await;
    transport.disconnect().await;

    persist_device_settings(&db, &config);
    if missing.is_empty() {
        println!("Connection OK - all remote paths verified");
        let _ = db.log_connection(&config.device.host, "connected", "all paths verified");
        Ok(0)
    } else {
        println!("Connection OK but paths are missing: {}", missing.join(", "));
        let _ = db.log_connection(
            &config.device.host,
            "path_error",
            &format!("missing: {}", missing.join(", ")),
        );
        Ok(1)
    }
}

/// `tcm inspect` - validate a definition locally and show its impact.
pub fn run_inspect(file: &PathBuf) -> Result<i32> {
    let definition = TestDefinition::load(file)
        .with_context(|| format!("invalid definition {}", file.display()))?;
    let impacts = classify(&definition);

    println!("{}: {} test case(s)", file.display(), definition.case_count());
    for case in &definition.test_cases {
        println!("  - {} / {}", case.service, case.action);
    }
    println!("affects_wan:      {}", impacts.affects_wan);
    println!("affects_lan:      {}", impacts.affects_lan);
    println!("restarts_network: {}", impacts.restarts_network);
    if impacts.affects_network() {
        println!("note: this test may temporarily take down connectivity to the device");
    }
    Ok(0)
}

/// `tcm history` - recent rows or one file's case details.
pub fn run_history(cli: &Cli, limit: u32, details: Option<&str>) -> Result<i32> {
    let db = open_database(cli)?;

    if let Some(file_name) = details {
        let cases = db.test_details(file_name)?;
        if cases.is_empty() {
            println!("No case details recorded for {file_name}");
            return Ok(0);
        }
        for case in cases {
            println!(
                "  {:<16} {:<20} {:<8} {:>6.1}s  {}",
                case.service, case.action, case.status, case.execution_time, case.details
            );
        }
        return Ok(0);
    }

    let rows = db.recent_history(limit)?;
    if rows.is_empty() {
        println!("No history yet");
        return Ok(0);
    }
    for row in rows {
        println!(
            "  {:<20} {:<30} {:<10} {:<8} {:>7.1}s  {}",
            row.timestamp,
            row.file_name,
            row.send_status,
            row.overall_result,
            row.execution_time,
            row.target_ip
        );
    }
    Ok(0)
}

fn spawn_ctrl_c_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested; stopping at the next safe point...");
            cancel.cancel();
        }
    });
}
