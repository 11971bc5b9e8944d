//! Logging setup
//!
//! Installs the process-wide `tracing` subscriber. Call [`init`] once at
//! startup, before any pipeline threads are spawned, and keep the returned
//! guard alive for as long as file logging should flush.
//!
//! Subsystems log under these targets:
//!
//! - `daqlink::memory` - masters, hubs, terminals
//! - `daqlink::stream` - sinks
//! - `daqlink::fifo` - fifo workers
//! - `daqlink::batcher` - batcher decoding

use crate::config::LoggingConfig;
use crate::error::{DaqError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rolling log file prefix inside `log_dir`
pub const LOG_FILE_PREFIX: &str = "daqlink.log";

/// Build the level filter. `RUST_LOG` wins over the configured directives.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| {
            DaqError::Config(format!("Invalid log filter {:?}: {}", config.filter, e))
        }),
    }
}

/// Install the global subscriber.
///
/// Returns the file writer guard when `log_dir` is set. Fails with
/// [`DaqError::Config`] if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(config)?;
    let console = tracing_subscriber::fmt::layer().with_ansi(config.ansi);

    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                DaqError::Config(format!("Failed to create log directory {:?}: {}", dir, e))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| DaqError::Config(format!("Logging already initialized: {}", e)))?;

    tracing::info!(
        "Logging initialized (file output: {})",
        config.log_dir.as_ref().map_or("off".to_string(), |d| d.display().to_string())
    );
    Ok(guard)
}
