//! Machine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration file.

use crate::cpu::memory::MEMORY_SIZE;
use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where PC points once a program is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Start at the address of the first control section.
    #[default]
    LoadBase,
    /// Start at the entry point named by the End record.
    EntryPoint,
}

/// Machine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Address of the first control section.
    #[serde(default)]
    pub load_base: u32,

    /// Directory holding the device files.
    #[serde(default = "MachineConfig::default_device_dir")]
    pub device_dir: PathBuf,

    #[serde(default)]
    pub start: StartPolicy,

    /// Upper bound on steps for a bounded run.
    #[serde(default)]
    pub max_steps: Option<u64>,
}

impl MachineConfig {
    fn default_device_dir() -> PathBuf {
        PathBuf::from(".")
    }

    /// Load a configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&text)
    }

    /// Parse a configuration from JSON text.
    ///
    /// A load base outside memory is rejected.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.load_base as usize >= MEMORY_SIZE {
            return Err(ConfigError::LoadBaseOutOfRange(config.load_base));
        }
        Ok(config)
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            load_base: 0,
            device_dir: Self::default_device_dir(),
            start: StartPolicy::default(),
            max_steps: None,
        }
    }
}

/// Errors that can occur while reading a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid config: {0}")]
    Parse(String),

    #[error("load base {0:#X} is outside memory")]
    LoadBaseOutOfRange(u32),
}
