//! Global `tracing` subscriber setup.
//!
//! Console output always; a daily rolling file under
//! [`LoggingConfig::log_dir`] when configured. `RUST_LOG` overrides the
//! configured filter.

use crate::config::LoggingConfig;
use crate::error::{PipeDataError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the file writer alive. Buffered lines are flushed when dropped.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    file: Option<WorkerGuard>,
}

impl LoggingGuard {
    pub fn writes_file(&self) -> bool {
        self.file.is_some()
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| PipeDataError::Config(format!("Invalid log filter '{}': {}", config.filter, e)))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = build_filter(config)?;

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                PipeDataError::Config(format!("Failed to create log directory {:?}: {}", dir, e))
            })?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(config.show_target))
        .with(file_layer)
        .try_init()
        .map_err(|e| PipeDataError::Config(format!("Failed to install logger: {}", e)))?;

    tracing::debug!(file = guard.is_some(), "logging initialized");
    Ok(LoggingGuard { file: guard })
}
