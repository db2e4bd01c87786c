//! Test Case Manager CLI entry point.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tcm_common::{LogConfig, init_logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env(&cli.log_level);
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("error: failed to initialize logging: {err:#}");
            std::process::exit(2);
        }
    };

    let result = match &cli.command {
        Commands::Send { files, timeout_secs } => {
            commands::run_send(&cli, files, *timeout_secs).await
        }
        Commands::Check => commands::run_check(&cli).await,
        Commands::Inspect { file } => commands::run_inspect(file),
        Commands::History { limit, details } => {
            commands::run_history(&cli, *limit, details.as_deref())
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(2);
        }
    }
}
