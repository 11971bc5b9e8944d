//! Configuration for daqlink
//!
//! A [`DaqConfig`] bundles the settings of every subsystem. It is plain data:
//! nothing here touches process state, so a config can be built, validated
//! and passed to constructors explicitly.
//!
//! # Files
//!
//! Configuration files are JSON or TOML, chosen by extension:
//!
//! - `*.json` - parsed with `serde_json`
//! - `*.toml` (or anything else) - parsed with `toml`
//!
//! The default location is `daqlink/config.toml` under the platform config
//! directory:
//!
//! - **Linux**: `~/.config/daqlink/`
//! - **macOS**: `~/Library/Application Support/daqlink/`
//! - **Windows**: `%APPDATA%\daqlink\`
//!
//! # Example
//!
//! ```ignore
//! use daqlink::config::DaqConfig;
//!
//! let config = DaqConfig::load_or_default(DaqConfig::default_config_path().unwrap());
//! config.validate()?;
//! let master = Master::with_config("ctrl", &config.memory);
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{DaqError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application directory name under the platform config dir
pub const APP_DIR: &str = "daqlink";

/// Default configuration filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default transaction timeout in microseconds (1 second)
pub const DEFAULT_TIMEOUT_US: u64 = 1_000_000;

/// Default reaper sweep interval in microseconds
pub const DEFAULT_REAPER_INTERVAL_US: u64 = 1_000;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaqConfig {
    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub fifo: FifoConfig,

    #[serde(default)]
    pub map_memory: MapMemoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Toml,
        }
    }
}

impl DaqConfig {
    /// Default config file location, if the platform has a config directory
    pub fn default_config_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DaqError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Parse a JSON document
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| DaqError::Config(format!("Failed to parse JSON config: {}", e)))
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DaqError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config = match Format::for_path(path) {
            Format::Json => Self::from_json_str(&content)?,
            Format::Toml => Self::from_toml_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = match Format::for_path(path) {
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| DaqError::Serialization(e.to_string()))?,
            Format::Toml => {
                toml::to_string_pretty(self).map_err(|e| DaqError::Serialization(e.to_string()))?
            }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DaqError::Config(format!("Failed to create config directory {:?}: {}", parent, e))
            })?;
        }

        std::fs::write(path, content)
            .map_err(|e| DaqError::Config(format!("Failed to write config file {:?}: {}", path, e)))
    }

    /// Reject settings no subsystem can run with
    pub fn validate(&self) -> Result<()> {
        if self.memory.reaper_interval_us == 0 {
            return Err(DaqError::Config(
                "memory.reaper_interval_us must be non-zero".to_string(),
            ));
        }
        if self.pool.region_sizes.is_empty() {
            return Err(DaqError::Config(
                "pool.region_sizes must name at least one size".to_string(),
            ));
        }
        if self.pool.region_sizes.contains(&0) {
            return Err(DaqError::Config(
                "pool.region_sizes must not contain zero".to_string(),
            ));
        }
        Ok(())
    }
}
