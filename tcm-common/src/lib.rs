//! Test Case Manager - Common Library
//!
//! Core pipeline for pushing JSON test definitions to an embedded
//! device over SSH, waiting out the device's result file, and
//! normalizing outcomes: shared types, configuration, logging, impact
//! classification, transport, result locator, and the orchestrator.

pub mod cancel;
pub mod config;
pub mod definition;
pub mod errors;
pub mod impact;
pub mod locator;
pub mod logging;
pub mod maintenance;
pub mod mock;
pub mod orchestrator;
pub mod ssh;
pub mod transport;
pub mod types;

pub use cancel::CancelFlag;
pub use config::{LocalConfig, RetryConfig, TcmConfig, TimeoutConfig, WaitConfig};
pub use definition::{TestCase, TestDefinition};
pub use errors::{DefinitionError, PipelineError};
pub use impact::classify;
pub use locator::{LocatedArtifact, WaitProfile, timestamp_suffix, wait_for_result};
pub use logging::{LogConfig, LogFormat, LoggingGuard, init_logging};
pub use maintenance::{PeriodicTask, cleanup_stale_results};
pub use mock::{MockRemoteFile, MockTransport};
pub use orchestrator::{BatchSummary, JobEvent, Orchestrator, normalize_outcome};
pub use ssh::{SshOptions, SshTransport};
pub use transport::{CommandResult, Transport, check_remote_dirs, is_timeout_error_text};
pub use types::{
    ArtifactCase, CaseResult, DeviceConfig, ImpactAssessment, JobStatus, OutcomeRecord,
    OutcomeSink, ResultArtifact, SubmissionJob,
};
