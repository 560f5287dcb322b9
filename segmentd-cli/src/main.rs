//! Segmentd CLI - Command-line interface
//!
//! Plans read-ahead windows and produces segments of a local input with ffmpeg.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use segmentd_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "segmentd")]
#[command(about = "On-demand HLS segment producer")]
struct Cli {
    /// Console log level (RUST_LOG takes precedence)
    #[arg(long, global = true, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for the full trace of this run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    commands::handle_command(cli.command).await.map_err(|e| {
        tracing::error!("{}", e);
        anyhow::anyhow!(e.user_message())
    })?;

    Ok(())
}
