//! File configuration.
//!
//! Every section is optional; missing sections and keys take their
//! defaults. Values are checked after parsing.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::{Blake3Suite, CipherSuite};
use crate::scheduler::SchedulerConfig;

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("seed length {0} is outside 16..=64 bytes")]
    InvalidSeedLength(usize),
    #[error("reseed threshold of {threshold} bits is not below the {capacity} bits of a full reseed")]
    InvalidThreshold { threshold: i64, capacity: i64 },
    #[error("retry interval must be greater than zero")]
    InvalidRetryInterval,
    #[error("entropy floor of {floor} bits leaves no room for a 64-bit draw after a full reseed")]
    InvalidFloor { floor: i64 },
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub floor: FloorConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Engine construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes of seed drawn for a new engine.
    pub seed_length: usize,
    /// Entropy level at or below which the engine asks for a reseed.
    pub reseed_threshold_bits: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed_length: Blake3Suite::MAX_TOTAL_SEED_LENGTH_BYTES,
            reseed_threshold_bits: 0,
        }
    }
}

/// Entropy floor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloorConfig {
    /// Lowest entropy estimate the wrapper lets output reach.
    pub minimum_entropy_bits: i64,
    /// Reseed on the calling thread when no worker is attached.
    pub fallback: bool,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            minimum_entropy_bits: -64,
            fallback: true,
        }
    }
}

/// Output settings for the demo binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Words printed per round.
    pub words: usize,
    /// Keep generating until interrupted.
    pub continuous: bool,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            words: 8,
            continuous: false,
            metrics_port: 9090,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges across sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let seed_length = self.engine.seed_length;
        if !(Blake3Suite::MIN_SEED_LENGTH_BYTES..=Blake3Suite::MAX_TOTAL_SEED_LENGTH_BYTES)
            .contains(&seed_length)
        {
            return Err(ConfigError::InvalidSeedLength(seed_length));
        }

        // Workers always reseed with a full-length seed.
        let capacity = Blake3Suite::MAX_TOTAL_SEED_LENGTH_BYTES as i64 * 8;
        if self.engine.reseed_threshold_bits >= capacity {
            return Err(ConfigError::InvalidThreshold {
                threshold: self.engine.reseed_threshold_bits,
                capacity,
            });
        }
        if self.scheduler.retry_interval_ms == 0 {
            return Err(ConfigError::InvalidRetryInterval);
        }
        if self.floor.minimum_entropy_bits.saturating_add(64) > capacity {
            return Err(ConfigError::InvalidFloor {
                floor: self.floor.minimum_entropy_bits,
            });
        }
        Ok(())
    }
}
