//! TOML machine configuration.

use std::fs;
use std::path::{Path, PathBuf};

use sample_hw::MachineConfig;
use thiserror::Error;

/// Longest timer period accepted from a configuration file: one hour of
/// virtual time.
pub const MAX_PERIOD_NS: u64 = 3_600_000_000_000;

/// Most interrupt lines a configuration file may request.
pub const MAX_IRQ_LINES: u32 = 256;

/// Failures loading a machine configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML or does not describe a machine.
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// The values parse but cannot drive a machine.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Parses a machine configuration from TOML text. Missing keys take defaults.
///
/// # Errors
///
/// Returns the TOML error for malformed input or unknown keys.
pub fn parse_machine_config(text: &str) -> Result<MachineConfig, toml::de::Error> {
    toml::from_str(text)
}

/// Checks values the emulator cannot run with.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming the first offending value.
pub fn validate_machine_config(config: &MachineConfig) -> Result<(), ConfigError> {
    if config.timer.period_ns == 0 {
        return Err(ConfigError::Invalid("timer.period_ns must be non-zero"));
    }
    if config.timer.period_ns > MAX_PERIOD_NS {
        return Err(ConfigError::Invalid("timer.period_ns exceeds one hour"));
    }
    if config.irq_lines > MAX_IRQ_LINES {
        return Err(ConfigError::Invalid("irq_lines exceeds 256"));
    }
    if config.first_irq >= config.irq_lines {
        return Err(ConfigError::Invalid("first_irq must be below irq_lines"));
    }
    Ok(())
}

/// Loads and validates a machine configuration file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, parsed or validated.
pub fn load_machine_config(path: &Path) -> Result<MachineConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_machine_config(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate_machine_config(&config)?;
    Ok(config)
}
