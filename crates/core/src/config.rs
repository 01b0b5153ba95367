//! Mirror configuration
//!
//! Loaded from TOML. Every key is optional and falls back to the defaults
//! below, which match the batching the worker has always used
//! (200ms idle window, 50 events per batch, 100 byte classifier look-ahead).
//!
//! ```toml
//! [coalescer]
//! window_ms = 200
//! max_batch_size = 50
//!
//! [classifier]
//! lookahead_bytes = 100
//! ```

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub coalescer: CoalescerConfig,
    pub classifier: ClassifierConfig,
}

/// Event batching settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
    /// Idle window before a timer flush (milliseconds)
    pub window_ms: u64,
    /// Buffered event count that forces an immediate flush
    pub max_batch_size: usize,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            window_ms: 200,
            max_batch_size: 50,
        }
    }
}

impl CoalescerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Binary/text classification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// How many leading bytes the classifier inspects
    pub lookahead_bytes: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            lookahead_bytes: 100,
        }
    }
}

impl MirrorConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: MirrorConfig = toml::from_str(text).context("Failed to parse mirror config")?;
        config.validate().context("Invalid mirror config")?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Check every value against its allowed range
    ///
    /// Valid ranges:
    /// - coalescer.window_ms: 1-60000
    /// - coalescer.max_batch_size: 1 or more
    /// - classifier.lookahead_bytes: 1-65536
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "coalescer.window_ms",
            self.coalescer.window_ms,
            1,
            60_000,
            "1-60000",
        )?;
        check_range(
            "coalescer.max_batch_size",
            self.coalescer.max_batch_size as u64,
            1,
            u64::MAX,
            ">= 1",
        )?;
        check_range(
            "classifier.lookahead_bytes",
            self.classifier.lookahead_bytes as u64,
            1,
            65_536,
            "1-65536",
        )?;
        Ok(())
    }
}

fn check_range(
    key: &'static str,
    value: u64,
    min: u64,
    max: u64,
    range: &'static str,
) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange { key, value, range });
    }
    Ok(())
}
