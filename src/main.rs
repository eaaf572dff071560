use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use arena_autopilot::app::{self, RunOptions};
use arena_autopilot::{util, Config};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Automated battle runner for the Molt arena
#[derive(Debug, Parser)]
#[command(name = "arena-autopilot", version, about)]
struct Cli {
    /// Fight a single battle and exit
    #[arg(long)]
    once: bool,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Path of the .env file to load and write refreshed cookies to
    #[arg(long, value_name = "PATH", default_value = ".env")]
    env_file: PathBuf,

    /// Directory for arena-autopilot.log
    #[arg(long, value_name = "PATH")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.clone().unwrap_or_else(util::default_log_dir);
    init_tracing(&log_dir, cli.debug)?;

    let config = match Config::load(&cli.env_file).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!("{error}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let cancel = CancellationToken::new();
    app::spawn_signal_watcher(cancel.clone());

    let exit = app::run(config, RunOptions { once: cli.once }, cancel).await?;
    Ok(if exit.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn init_tracing(log_dir: &std::path::Path, debug: bool) -> Result<()> {
    fs::create_dir_all(log_dir)?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path(log_dir))?;

    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,arena_autopilot={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_writer(log_file)
                .with_ansi(false)
                .with_target(false),
        )
        .init();
    Ok(())
}
