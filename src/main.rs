//! CLI entry point for eco
//!
//! Builds a session from the configuration file and runs one command:
//!
//! ```bash
//! eco aliases
//! eco status
//! eco mv theta 1.5
//! eco ascan theta 0 2 20 --pulses 200 --name theta_rocking
//! eco dscan theta -0.1 0.1 10
//! ```
//!
//! Ctrl-C during a scan aborts it after the current step.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use eco::config::{DEFAULT_CONFIG_PATH, EcoConfig};
use eco::eco_core::AdjustableExt;
use eco::eco_scan::{ScanOptions, ScanSimple};
use eco::{Session, logging};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "eco")]
#[command(about = "Experiment control: move, read and scan beamline devices", long_about = None)]
struct Cli {
    /// Session configuration file (TOML)
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log format (pretty, compact, json)
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every alias with its channel
    Aliases,

    /// Read all devices and print the snapshot as JSON
    Status,

    /// Print the current value of a device
    Wm {
        /// Device alias
        alias: String,
    },

    /// Move a device and wait until it arrived
    Mv {
        /// Device alias
        alias: String,
        /// Target value
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Absolute scan from start to end
    Ascan(RangeArgs),

    /// Scan relative to the current value
    Dscan(RangeArgs),
}

#[derive(Args)]
struct RangeArgs {
    /// Device alias
    alias: String,
    /// First value
    #[arg(allow_negative_numbers = true)]
    start: f64,
    /// Last value
    #[arg(allow_negative_numbers = true)]
    end: f64,
    /// Number of intervals (steps minus one)
    intervals: usize,
    /// Pulses per step (session default if absent)
    #[arg(long)]
    pulses: Option<u32>,
    /// Scan name used for the data and log files
    #[arg(long)]
    name: Option<String>,
}

impl RangeArgs {
    fn options(&self) -> ScanOptions {
        ScanOptions {
            file_name: self.name.clone(),
            n_pulses: self.pulses,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EcoConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(format) = cli.log_format {
        config.application.log_format = format;
    }
    logging::init_from_config(&config)?;

    let session = Session::from_config(config).await?;

    match cli.command {
        Commands::Aliases => {
            for record in session.namespace().records() {
                println!(
                    "{:<24} {:<32} {}",
                    record.alias,
                    record.channel.as_deref().unwrap_or("-"),
                    record.channeltype.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Status => {
            let snapshot = session.status().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Wm { alias } => {
            let value = session.adjustable(&alias)?.wm().await?;
            println!("{alias} = {value}");
        }
        Commands::Mv { alias, value } => {
            let adjustable = session.adjustable(&alias)?;
            adjustable.umv(value).await?;
            println!("{alias} = {}", adjustable.wm().await?);
        }
        Commands::Ascan(args) => {
            let adjustable = session.adjustable(&args.alias)?;
            let scan = session
                .scans()
                .ascan(&adjustable, args.start, args.end, args.intervals, args.options())
                .await?;
            run_scan(&session, scan).await?;
        }
        Commands::Dscan(args) => {
            let adjustable = session.adjustable(&args.alias)?;
            let scan = session
                .scans()
                .dscan(&adjustable, args.start, args.end, args.intervals, args.options())
                .await?;
            run_scan(&session, scan).await?;
        }
    }

    Ok(())
}

async fn run_scan(session: &Session, mut scan: ScanSimple) -> Result<()> {
    let abort = session.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, aborting after the current step");
            abort.abort();
        }
    });

    info!(
        scan = %scan.file_name(),
        steps = scan.total_steps(),
        log = %scan.scan_info_path().display(),
        "Starting scan"
    );
    let result = scan.scan_all().await;
    ctrl_c.abort();

    println!(
        "{}: {} of {} steps recorded in {}",
        scan.file_name(),
        scan.scan_info().len(),
        scan.total_steps(),
        scan.scan_info_path().display()
    );
    result
}
