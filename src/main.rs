//! cable_wrap command line
//!
//! Inspect and manage the persisted rotation state, replay recorded sample
//! logs, and dry-run the unwind maneuver against a simulated mount.

use anyhow::{Context, Result};
use cable_wrap::actor::EngineActor;
use cable_wrap::config::EngineConfig;
use cable_wrap::engine::WrapEngine;
use cable_wrap::mount::MockMount;
use cable_wrap::sample::PositionSample;
use cable_wrap::unwind::CancellationToken;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cable_wrap", version, about = "Cable-wrap rotation tracker")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = "cable-wrap.toml")]
    config: PathBuf,

    /// Override the data directory holding the state files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the persisted snapshot as JSON
    Status,
    /// Feed a JSON-lines file of position samples through the engine
    Replay {
        /// One PositionSample per line
        file: PathBuf,
    },
    /// Zero the accumulator
    Reset,
    /// Set the warning threshold in rotations (clamped to 0.5..=3.0)
    SetThreshold {
        /// Threshold in rotations
        rotations: f64,
    },
    /// Run the unwind maneuver against a simulated mount
    SimulateUnwind {
        /// Simulated time per mount command, in milliseconds
        #[arg(long, default_value_t = 200)]
        slew_ms: u64,
        /// Fail the Nth mount command
        #[arg(long)]
        fail_on: Option<usize>,
    },
    /// Print the effective configuration as TOML
    PrintConfig,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("cable_wrap={level},warn"))
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(dir) = cli.data_dir {
        config.application.data_dir = Some(dir);
    }
    init_tracing(&config.application.log_level, cli.json);
    info!(data_dir = %config.data_dir().display(), "Starting cable_wrap");

    match cli.command {
        Command::Status => {
            let engine = WrapEngine::open(&config);
            print_json(&engine.snapshot())?;
        }

        Command::Replay { file } => replay(&config, file).await?,

        Command::Reset => {
            let engine = WrapEngine::open(&config);
            engine.reset()?;
            print_json(&engine.snapshot())?;
        }

        Command::SetThreshold { rotations } => {
            let engine = WrapEngine::open(&config);
            let effective = engine.set_threshold_rotations(rotations);
            println!("{effective}");
        }

        Command::SimulateUnwind { slew_ms, fail_on } => {
            let engine = WrapEngine::open(&config);
            let mut mount = MockMount::new()
                .with_timing(Duration::from_millis(slew_ms), Duration::from_millis(slew_ms / 4));
            if let Some(n) = fail_on {
                mount = mount.failing_on_command(n);
            }

            let cancel = CancellationToken::new();
            let ctrl_c = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupt received; cancelling unwind");
                        cancel.cancel();
                    }
                })
            };

            let result = engine.begin_unwind(&mount, &cancel).await;
            ctrl_c.abort();
            let outcome = result.context("unwind maneuver failed")?;
            print_json(&outcome)?;
            print_json(&engine.snapshot())?;
        }

        Command::PrintConfig => print!("{}", config.to_toml()?),
    }

    Ok(())
}

async fn replay(config: &EngineConfig, file: PathBuf) -> Result<()> {
    let reader = BufReader::new(
        File::open(&file).with_context(|| format!("opening {}", file.display()))?,
    );

    let engine = Arc::new(WrapEngine::open(config));
    let (handle, task) = EngineActor::new(
        Arc::clone(&engine),
        Arc::new(MockMount::new()),
        config.persistence.save_interval,
    )
    .spawn();

    let mut count = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", file.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PositionSample>(&line) {
            Ok(sample) => {
                handle.send_sample(sample).await?;
                count += 1;
            }
            Err(e) => warn!(line = index + 1, error = %e, "Skipping malformed sample"),
        }
    }

    let snapshot = handle.snapshot().await?;
    handle.shutdown().await?;
    task.await.context("engine actor panicked")?;

    info!(samples = count, "Replay finished");
    print_json(&snapshot)
}
