//! Error taxonomy for the test-dispatch pipeline.
//!
//! Cancellation is a distinct variant so callers branch on the type,
//! never on message text.

use thiserror::Error;

/// Failure of one submitted file somewhere in the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// SSH session could not be (re)established.
    #[error("connection to {host} could not be established")]
    Connect { host: String },

    /// Upload exhausted every attempt and transfer method.
    #[error("upload of {file} failed after {attempts} attempts")]
    Upload { file: String, attempts: u32 },

    /// No qualifying result artifact appeared within the wait budget.
    #[error("no result file appeared within {waited_secs}s")]
    ResultTimeout { waited_secs: u64 },

    /// Reconnect budget exhausted while waiting for a result.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Result artifact could not be downloaded.
    #[error("download of {file} failed")]
    Download { file: String },

    /// Result artifact is not valid JSON.
    #[error("result file {file} is not valid JSON")]
    Parse {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    /// Processing was cancelled by the user.
    #[error("processing cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for failures worth retrying within a job (everything
    /// except cancellation).
    pub fn is_retryable(&self) -> bool {
        !self.is_cancelled()
    }
}

/// Validation failure of a test-definition file, reported before any
/// network activity happens.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("file not found: {path}")]
    NotFound { path: String },

    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("missing 'test_cases' section")]
    MissingTestCases,

    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_detected_by_type_not_text() {
        let err = PipelineError::Cancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());

        let err = PipelineError::ResultTimeout { waited_secs: 120 };
        assert!(!err.is_cancelled());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = PipelineError::Upload {
            file: "lan_dhcp.json".into(),
            attempts: 2,
        };
        assert_eq!(
            err.to_string(),
            "upload of lan_dhcp.json failed after 2 attempts"
        );
        assert_eq!(
            DefinitionError::MissingTestCases.to_string(),
            "missing 'test_cases' section"
        );
    }
}
