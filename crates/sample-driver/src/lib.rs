//! Driver side of the PCI sample timer.
//!
//! [`TimerDriver`] binds sample timers on a [`sample_hw::pci::PciBus`], counts
//! their interrupts and acknowledges each one. [`demo::run_demo`] wires the
//! driver to an emulated machine; the `pst-run` binary is a thin CLI over it.

/// TOML machine configuration.
pub mod config;
/// End-to-end demo run.
pub mod demo;
/// Sample timer driver.
pub mod driver;

pub use config::{load_machine_config, parse_machine_config, ConfigError};
pub use demo::{run_demo, DemoError, DemoOptions, DemoReport};
pub use driver::{TimerDriver, DRIVER_NAME, PCI_SAMPLE_TIMER_IDS};

use anyhow as _;
use clap as _;
use env_logger as _;
#[cfg(test)]
use tempfile as _;
