use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pulse_core::cfg::{self, AppId, Config};
use pulse_core::logfile::StructuredLogger;
use pulse_core::logx;
use tracing::{debug, info};

const APP: AppId = AppId {
    qualifier: "com",
    organization: "local",
    // Shares the daemon's config directory.
    application: "pulse",
};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"), version, about = "Inspect Pulse health logs")]
struct Cli {
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Config file to use instead of the per-user one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the most recent records as a JSON array, newest first.
    Recent {
        #[arg(short, long, default_value_t = 20, value_parser = clap::value_parser!(u16).range(1..=1000))]
        limit: u16,
    },
    /// Print size, path and retained file count.
    Stats,
    /// Delete the active log and every rotated generation.
    Clear {
        /// Required: the deletion cannot be undone.
        #[arg(long)]
        yes: bool,
    },
    /// Validate the effective configuration (file + environment) and print it.
    Validate,
}

fn main() -> ExitCode {
    // same .env lookup as the daemon
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let level = match cli.verbose { 0 => "warn", 1 => "info", 2 => "debug", _ => "trace" };
    logx::init(level);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let file = match &cli.config {
        Some(path) => cfg::load_or_init_at(path)?,
        None => cfg::load_or_init(&APP)?,
    };
    debug!(log_level = %file.log_level, "config loaded");

    match cli.cmd {
        Command::Validate => validate(file),
        Command::Recent { limit } => {
            let records = open_logger(file)?.recent(limit.into());
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&open_logger(file)?.stats())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Clear { yes } => {
            if !yes {
                eprintln!("refusing to delete health logs without --yes");
                return Ok(ExitCode::FAILURE);
            }
            let removed = open_logger(file)?.clear();
            info!(removed, "cleared");
            println!("removed {removed} file(s)");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_logger(file: Config) -> Result<StructuredLogger> {
    let cfg = file.with_env_overrides()?;
    Ok(StructuredLogger::new(cfg.monitoring.logging))
}

fn validate(file: Config) -> Result<ExitCode> {
    match file.with_env_overrides().and_then(|c| c.monitoring.validate().map(|()| c)) {
        Ok(cfg) => {
            println!("{}", serde_json::to_string_pretty(&cfg.monitoring)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
