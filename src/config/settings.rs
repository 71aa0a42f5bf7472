//! Settings sections of the runtime configuration
//!
//! - [`LoggingConfig`] - log filter and optional rolling log file
//! - [`ScriptLimits`] - safety limits applied to every script engine
//!
//! Every field has a serde default, so a config file only needs to name the
//! values it changes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default log filter when neither the config nor `RUST_LOG` sets one
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default file name prefix for rolling log files
pub const DEFAULT_LOG_FILE_PREFIX: &str = "pipedata.log";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"pipedata_rs=debug"`.
    /// `RUST_LOG` takes precedence when set.
    pub filter: String,

    /// Directory for daily rolling log files. Console only when unset.
    pub log_dir: Option<PathBuf>,

    /// File name prefix inside `log_dir`
    pub file_prefix: String,

    /// Include the event target in console output
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
            file_prefix: DEFAULT_LOG_FILE_PREFIX.to_string(),
            show_target: true,
        }
    }
}

/// Safety limits for the Rhai engine of a scripted step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum operations per call, 0 for unlimited
    pub max_operations: u64,

    /// Maximum function call nesting
    pub max_call_levels: usize,

    /// Maximum expression nesting at global level
    pub max_expr_depth: usize,

    /// Maximum expression nesting inside functions
    pub max_function_expr_depth: usize,

    /// Maximum string length in bytes, 0 for unlimited
    pub max_string_size: usize,

    /// Maximum array length, 0 for unlimited
    pub max_array_size: usize,

    /// Maximum object map size, 0 for unlimited
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 10_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_string_size: 16 * 1024 * 1024,
            max_array_size: 1_000_000,
            max_map_size: 100_000,
        }
    }
}

impl ScriptLimits {
    /// Limits with every size and operation cap disabled
    pub fn unlimited() -> Self {
        Self {
            max_operations: 0,
            max_string_size: 0,
            max_array_size: 0,
            max_map_size: 0,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.filter, "info");
        assert!(logging.log_dir.is_none());
        assert!(logging.show_target);
    }

    #[test]
    fn test_partial_limits_keep_defaults() {
        let limits: ScriptLimits = toml::from_str("max_operations = 500").unwrap();
        assert_eq!(limits.max_operations, 500);
        assert_eq!(limits.max_call_levels, ScriptLimits::default().max_call_levels);
    }

    #[test]
    fn test_unlimited() {
        let limits = ScriptLimits::unlimited();
        assert_eq!(limits.max_operations, 0);
        assert_eq!(limits.max_array_size, 0);
        assert_eq!(limits.max_call_levels, 64);
    }
}
