//! Structured logging initialization shared by TCM binaries.

use anyhow::Result;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, fmt,
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    util::SubscriberInitExt,
};

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-friendly single-line logs.
    Compact,
    /// JSON-formatted logs for machine parsing.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "compact" | "pretty" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Configuration for logging initialization.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (trace, debug, info, warn, error, off).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Optional file path for daily-rotated logs.
    pub file_path: Option<PathBuf>,
    /// Include the event target in output.
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file_path: None,
            with_target: false,
        }
    }
}

impl LogConfig {
    /// Build a logging configuration from environment variables:
    /// `TCM_LOG_LEVEL`, `TCM_LOG_FORMAT` (compact|json), `TCM_LOG_FILE`.
    pub fn from_env(default_level: &str) -> Self {
        let mut config = Self {
            level: std::env::var("TCM_LOG_LEVEL").unwrap_or_else(|_| default_level.to_string()),
            ..Self::default()
        };

        if let Ok(format) = std::env::var("TCM_LOG_FORMAT") {
            if let Some(parsed) = LogFormat::parse(&format) {
                config.format = parsed;
            }
        }

        if let Ok(path) = std::env::var("TCM_LOG_FILE") {
            if !path.trim().is_empty() {
                config.file_path = Some(PathBuf::from(path));
            }
        }

        config
    }

    /// Override the base log level.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Effective filter; an explicit `RUST_LOG` wins.
    fn env_filter(&self) -> EnvFilter {
        if std::env::var_os("RUST_LOG").is_some() {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return filter;
            }
        }
        EnvFilter::new(self.level.clone())
    }
}

/// Guard keeping the background log writer alive; hold for the
/// lifetime of the process when file logging is enabled.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize tracing for the current process.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard> {
    let filter = config.env_filter();

    let (writer, file_guard) = match config.file_path.as_ref() {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| OsStr::new("tcm.log"));
            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let writer = BoxMakeWriter::new(std::io::stderr.and(non_blocking));
            (writer, Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };
    let ansi = file_guard.is_none();

    match config.format {
        LogFormat::Compact => {
            let subscriber = fmt::Subscriber::builder()
                .with_writer(writer)
                .with_target(config.with_target)
                .with_env_filter(filter)
                .with_ansi(ansi)
                .compact()
                .finish();
            finish(subscriber, file_guard)
        }
        LogFormat::Json => {
            let subscriber = fmt::Subscriber::builder()
                .with_writer(writer)
                .with_target(config.with_target)
                .with_env_filter(filter)
                .with_ansi(false)
                .json()
                .finish();
            finish(subscriber, file_guard)
        }
    }
}

fn finish<S>(
    subscriber: S,
    file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
) -> Result<LoggingGuard>
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = subscriber.try_init() {
        // Tests may initialize logging more than once; that is fine.
        if err.to_string().contains("already initialized") {
            return Ok(LoggingGuard { _file_guard: file_guard });
        }
        return Err(err.into());
    }
    Ok(LoggingGuard { _file_guard: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("COMPACT"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("banana"), None);
    }

    #[test]
    fn test_default_level_applies() {
        let config = LogConfig::default().with_level("debug");
        assert_eq!(config.level, "debug");
    }
}
