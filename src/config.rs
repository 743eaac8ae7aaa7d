//! Configuration management for modular-midi
//!
//! Loads the optional YAML configuration file. Every field has a default, so a
//! missing file or a partial one is fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use crate::midi::MAX_CHANNEL;
use crate::output::DEFAULT_CLIENT_NAME;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::serial::port::{DEFAULT_BACKOFF, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT};
use crate::serial::SerialSettings;

/// Config file name inside the application root
pub const CONFIG_FILE_NAME: &str = "modularMidi.yaml";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Serial controller link
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// MIDI channel for ingested events (1-16)
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// MIDI output client
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

/// Message queue sizing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

/// Filesystem layout overrides
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_channel() -> u8 {
    1
}

fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF.as_millis() as u64
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT.as_millis() as u64
}

fn default_client_name() -> String {
    DEFAULT_CLIENT_NAME.to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            channel: default_channel(),
            backoff_ms: default_backoff_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl SerialConfig {
    /// Runtime serial settings; the channel is converted to its 0-15 wire form
    pub fn settings(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud_rate,
            channel: self.channel.saturating_sub(1),
            backoff: Duration::from_millis(self.backoff_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let channel = self.serial.channel;
        if channel == 0 || channel > MAX_CHANNEL + 1 {
            anyhow::bail!("serial.channel {} is invalid (must be 1-16)", channel);
        }
        if self.serial.baud_rate == 0 {
            anyhow::bail!("serial.baud_rate cannot be 0");
        }
        if self.serial.read_timeout_ms == 0 {
            anyhow::bail!("serial.read_timeout_ms cannot be 0");
        }
        if self.queue.capacity == 0 {
            anyhow::bail!("queue.capacity must be at least 1");
        }
        if self.midi.client_name.trim().is_empty() {
            anyhow::bail!("midi.client_name cannot be empty");
        }
        Ok(())
    }
}
