//! Bridge Configuration
//!
//! Handles parsing and management of storage-bridge.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::storage::Device;

/// File name searched for by [`BridgeConfig::find_and_load`].
pub const CONFIG_FILE_NAME: &str = "storage-bridge.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching storage-bridge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgeConfig {
    /// Wrapper type registration
    #[serde(default)]
    pub types: TypesConfig,

    /// Allocation defaults
    #[serde(default)]
    pub allocation: AllocationConfig,
}

impl BridgeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Names and capabilities of the wrapper types created at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypesConfig {
    /// Abstract base every storage wrapper type derives from
    #[serde(default = "default_base_name")]
    pub base_name: String,

    /// Concrete class used when no subtype is requested
    #[serde(default = "default_class_name")]
    pub default_class: String,

    /// Whether the default class participates in cyclic GC
    #[serde(default = "default_true")]
    pub gc: bool,

    /// Whether the default class carries an attribute dict
    #[serde(default = "default_true")]
    pub dict: bool,

    /// Whether the default class supports weak references
    #[serde(default = "default_true")]
    pub weakrefs: bool,
}

fn default_base_name() -> String {
    "StorageBase".to_string()
}

fn default_class_name() -> String {
    "UntypedStorage".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for TypesConfig {
    fn default() -> Self {
        Self {
            base_name: default_base_name(),
            default_class: default_class_name(),
            gc: true,
            dict: true,
            weakrefs: true,
        }
    }
}

/// Allocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationConfig {
    /// Device used when a constructor names neither allocator nor device
    #[serde(default = "default_device")]
    pub default_device: Device,
}

fn default_device() -> Device {
    Device::CPU
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            default_device: default_device(),
        }
    }
}
