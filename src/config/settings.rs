//! Per-subsystem settings
//!
//! Each section of [`DaqConfig`](super::DaqConfig) lives here. Every field
//! has a serde default so partial configuration files load cleanly.
//!
//! # Sections
//!
//! - [`MemoryConfig`] - transaction deadline and reaper sweep interval
//! - [`PoolConfig`] - buffer region sizes, hard cap and exhaustion policy
//! - [`FifoConfig`] - queue depth, trim size and copy mode
//! - [`MapMemoryConfig`] - device node and bus base address
//! - [`LoggingConfig`] - filter directives and optional log directory

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Memory master settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Default transaction deadline in microseconds
    #[serde(default = "default_timeout_us")]
    pub timeout_us: u64,

    /// Interval between timeout reaper sweeps in microseconds
    #[serde(default = "default_reaper_interval_us")]
    pub reaper_interval_us: u64,
}

fn default_timeout_us() -> u64 {
    super::DEFAULT_TIMEOUT_US
}

fn default_reaper_interval_us() -> u64 {
    super::DEFAULT_REAPER_INTERVAL_US
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            timeout_us: default_timeout_us(),
            reaper_interval_us: default_reaper_interval_us(),
        }
    }
}

/// What a pool does when its hard cap is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustPolicy {
    /// Wait until a buffer is returned
    #[default]
    Block,
    /// Fail immediately with a boundary error
    Fail,
}

/// Buffer pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Region size classes in bytes; one pool is created per class
    #[serde(default = "default_region_sizes")]
    pub region_sizes: Vec<usize>,

    /// Hard cap on outstanding buffers per pool (0 = unlimited)
    #[serde(default)]
    pub max_buffers: usize,

    /// Behavior when `max_buffers` is reached
    #[serde(default)]
    pub policy: ExhaustPolicy,

    /// Regions kept on the free list; extras are released (0 = keep all)
    #[serde(default)]
    pub max_free: usize,
}

fn default_region_sizes() -> Vec<usize> {
    vec![2048, 65536]
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            region_sizes: default_region_sizes(),
            max_buffers: 0,
            policy: ExhaustPolicy::default(),
            max_free: 0,
        }
    }
}

/// Fifo settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FifoConfig {
    /// Maximum queued frames (0 = unbounded)
    #[serde(default)]
    pub max_depth: usize,

    /// Copy at most this many payload bytes (0 = whole payload)
    #[serde(default)]
    pub trim_size: usize,

    /// Queue incoming frames without copying
    #[serde(default)]
    pub no_copy: bool,
}

impl FifoConfig {
    pub fn new(max_depth: usize, trim_size: usize, no_copy: bool) -> Self {
        Self {
            max_depth,
            trim_size,
            no_copy,
        }
    }
}

/// Memory-mapped device settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapMemoryConfig {
    /// Device node to map
    #[serde(default = "default_device_path")]
    pub device_path: PathBuf,

    /// Bus address of the device's transaction address 0
    #[serde(default)]
    pub base_address: u64,
}

fn default_device_path() -> PathBuf {
    PathBuf::from("/dev/mem")
}

impl Default for MapMemoryConfig {
    fn default() -> Self {
        Self {
            device_path: default_device_path(),
            base_address: 0,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Directory for daily rolling log files (console only when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Colored console output
    #[serde(default = "default_true")]
    pub ansi: bool,
}

fn default_filter() -> String {
    "info,daqlink=debug".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            log_dir: None,
            ansi: true,
        }
    }
}
