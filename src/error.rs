//! Error handling for pipedata-rs
//!
//! This module defines the crate error type and a Result alias used by the
//! value container, the converter registries, the marshaling protocol and the
//! step runners.
//!
//! Every variant names the offending key and/or type so a caller can locate
//! the faulty step and key without additional logging.

use crate::data::ValueType;
use thiserror::Error;

/// Main error type for pipedata-rs operations
#[derive(Error, Debug)]
pub enum PipeDataError {
    /// A key was read that is not present in the container
    #[error("Value not found for key \"{key}\"")]
    ValueNotFound { key: String },

    /// A key was read through an accessor for a different type
    #[error("Type mismatch for key \"{key}\": expected {expected}, found {actual}")]
    TypeMismatch {
        key: String,
        expected: ValueType,
        actual: ValueType,
    },

    /// No conversion or classification path exists for a type
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// The converter registry has no converter for the requested pair
    #[error("No converter available to convert {from} to {to}")]
    ConversionCapability { from: String, to: String },

    /// A guest list was empty, so its element type cannot be inferred
    #[error("Cannot infer type from empty list (key \"{key}\")")]
    EmptyListInference { key: String },

    /// A list was declared with LIST as its element type
    #[error("Nested lists are not supported (key \"{key}\")")]
    NestedList { key: String },

    /// Keys must be non-empty strings
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Array arithmetic on incompatible operands
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// No unique key of the requested type exists
    #[error("Cannot infer field: {0}")]
    FieldInference(String),

    /// Operation attempted on a closed or not-yet-initialized runner
    #[error("Resource lifecycle error: {0}")]
    ResourceLifecycle(String),

    /// Acquiring a step's resources failed
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Errors related to Rhai script compilation or execution
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the JSON/binary codecs and image codecs
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipeDataError>,
    },
}

impl PipeDataError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipeDataError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        PipeDataError::Script(err.to_string())
    }

    /// Strip any `WithContext` layers and return the underlying error
    pub fn root(&self) -> &PipeDataError {
        match self {
            PipeDataError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn type_mismatch(key: &str, expected: ValueType, actual: ValueType) -> Self {
        PipeDataError::TypeMismatch {
            key: key.to_string(),
            expected,
            actual,
        }
    }

    pub(crate) fn not_found(key: &str) -> Self {
        PipeDataError::ValueNotFound {
            key: key.to_string(),
        }
    }
}

impl From<serde_json::Error> for PipeDataError {
    fn from(err: serde_json::Error) -> Self {
        PipeDataError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for PipeDataError {
    fn from(err: bincode::Error) -> Self {
        PipeDataError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for PipeDataError {
    fn from(err: image::ImageError) -> Self {
        PipeDataError::Serialization(format!("image codec: {}", err))
    }
}

/// Result type alias for pipedata-rs operations
pub type Result<T> = std::result::Result<T, PipeDataError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipeDataError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PipeDataError::from_rhai_error(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipeDataError::not_found("x");
        assert_eq!(err.to_string(), "Value not found for key \"x\"");
    }

    #[test]
    fn test_type_mismatch_names_key_and_types() {
        let err = PipeDataError::type_mismatch("k", ValueType::Boolean, ValueType::Double);
        let msg = err.to_string();
        assert!(msg.contains("\"k\""));
        assert!(msg.contains("BOOLEAN"));
        assert!(msg.contains("DOUBLE"));
    }

    #[test]
    fn test_error_with_context() {
        let err = PipeDataError::Script("boom".to_string());
        let with_ctx = err.with_context("Failed to run step");
        assert!(with_ctx.to_string().contains("Failed to run step"));
        assert!(matches!(with_ctx.root(), PipeDataError::Script(_)));
    }

    #[test]
    fn test_conversion_capability_names_both_formats() {
        let err = PipeDataError::ConversionCapability {
            from: "SerializedArray".to_string(),
            to: "ScriptArray".to_string(),
        };
        assert!(err.to_string().contains("SerializedArray"));
        assert!(err.to_string().contains("ScriptArray"));
    }
}
