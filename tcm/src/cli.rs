//! Command-line interface definition.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Push JSON test definitions to an embedded device, wait out the
/// result files, and record outcomes locally.
#[derive(Debug, Parser)]
#[command(name = "tcm", version, about)]
pub struct Cli {
    /// Path to a TOML config file (default: ~/.config/tcm/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Device hostname or IP (overrides config and saved settings).
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// SSH username.
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// SSH identity file.
    #[arg(long, global = true)]
    pub identity: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "TCM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send test definition files to the device and wait for results.
    Send {
        /// Definition files, processed in order.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Override the base result-wait budget in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Probe the connection and verify the remote directories.
    Check,
    /// Validate a definition file and show its network-impact flags.
    Inspect {
        file: PathBuf,
    },
    /// Show recent submission history.
    History {
        /// Number of rows to show.
        #[arg(long, default_value_t = 20)]
        limit: u32,
        /// Show per-case details for one file instead.
        #[arg(long)]
        details: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_send_requires_files() {
        assert!(Cli::try_parse_from(["tcm", "send"]).is_err());
    }

    #[test]
    fn test_global_overrides_parse() {
        let cli =
            Cli::try_parse_from(["tcm", "send", "a.json", "--host", "10.0.0.1", "--user", "admin"])
                .unwrap();
        assert_eq!(cli.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(cli.user.as_deref(), Some("admin"));
        match cli.command {
            Commands::Send { files, .. } => assert_eq!(files.len(), 1),
            _ => panic!("expected send"),
        }
    }
}
