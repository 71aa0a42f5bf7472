//! Configuration module for pipedata-rs
//!
//! Runtime configuration is a TOML file with three sections:
//!
//! ```toml
//! [logging]
//! filter = "pipedata_rs=debug"
//! log_dir = "/var/log/pipedata"
//!
//! [script]
//! max_operations = 1000000
//!
//! [[steps]]
//! name = "increment"
//! code = "fn run(input) { let out = Data(); out[\"x\"] = input[\"x\"] + 1; out }"
//! ```
//!
//! # Config Location
//!
//! Without an explicit path the file is looked up in the platform config
//! directory:
//! - **Linux**: `~/.config/dev.pipedata.pipedata-rs/config.toml`
//! - **macOS**: `~/Library/Application Support/dev.pipedata.pipedata-rs/config.toml`
//! - **Windows**: `%APPDATA%\dev.pipedata.pipedata-rs\config.toml`

pub mod settings;

pub use settings::*;

use crate::error::{PipeDataError, Result};
use crate::pipeline::ScriptStep;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.pipedata.pipedata-rs";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Get the application config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Logging settings
    pub logging: LoggingConfig,

    /// Limits for every scripted step's engine
    pub script: ScriptLimits,

    /// Scripted steps, run in order by the demo binary
    pub steps: Vec<ScriptStep>,
}

impl RuntimeConfig {
    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PipeDataError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Serialize the config to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PipeDataError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Load a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipeDataError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::from_toml_str(&content).map_err(|e| e.with_context(format!("{:?}", path)))
    }

    /// Load the config from the default location, falling back to defaults
    /// when the file is missing or invalid
    pub fn load_or_default() -> Self {
        match default_config_path() {
            Some(path) => Self::load_or_default_at(&path),
            None => Self::default(),
        }
    }

    /// Load `path`, falling back to defaults when it is missing or invalid
    pub fn load_or_default_at(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipeDataError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|e| {
            PipeDataError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_is_default() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_parse_sections() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [logging]
            filter = "debug"

            [script]
            max_call_levels = 8

            [[steps]]
            name = "inc"
            code = "fn run(input) { input }"
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.script.max_call_levels, 8);
        assert_eq!(config.steps.len(), 1);
        assert_eq!(config.steps[0].name, "inc");
        assert_eq!(config.steps[0].run_method, "run");
        assert_eq!(config.steps[0].setup_method, "setup");
    }

    #[test]
    fn test_default_path_is_under_app_dir() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with(format!("{}/{}", APP_ID, CONFIG_FILE)));
        }
    }

    #[test]
    fn test_load_or_default_falls_back() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        assert_eq!(RuntimeConfig::load_or_default_at(&missing), RuntimeConfig::default());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[script\nmax_call_levels = ").unwrap();
        assert_eq!(RuntimeConfig::load_or_default_at(&broken), RuntimeConfig::default());

        let valid = dir.path().join("valid.toml");
        std::fs::write(&valid, "[logging]\nfilter = \"trace\"\n").unwrap();
        assert_eq!(RuntimeConfig::load_or_default_at(&valid).logging.filter, "trace");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = RuntimeConfig::from_toml_str("[logging\n").unwrap_err();
        assert!(matches!(err, PipeDataError::Config(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = RuntimeConfig::default();
        config.logging.log_dir = Some(dir.path().join("logs"));
        config.steps.push(ScriptStep::new("fn run(input) { input }").with_name("echo"));
        config.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = RuntimeConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, PipeDataError::Config(_)));
    }
}
