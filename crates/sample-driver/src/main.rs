//! CLI entry point for the `pst-run` harness.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::LevelFilter;
use sample_driver::{load_machine_config, run_demo, DemoOptions};
use sample_hw::MachineConfig;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tempfile as _;
use thiserror as _;
use toml as _;

/// Runs the sample timer driver against an emulated machine.
#[derive(Debug, Parser)]
#[command(name = "pst-run", version, about)]
struct Cli {
    /// Machine configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Timer periods to run
    #[arg(short, long, default_value_t = 3)]
    periods: u32,

    /// Disable the timer after this many periods
    #[arg(long, value_name = "N")]
    disable_after: Option<u32>,

    /// Also attach the DMA stub
    #[arg(long)]
    with_dma: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => load_machine_config(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MachineConfig::default(),
    };
    let options = DemoOptions {
        periods: cli.periods,
        disable_after: cli.disable_after,
        with_dma: cli.with_dma,
    };
    let report = run_demo(config, options).context("demo run failed")?;
    println!("{report}");
    Ok(())
}
