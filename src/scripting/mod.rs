//! Rhai scripting for pipeline steps.
//!
//! Scripted steps exchange a `Data` container with the host. Inside a script
//! the following are available:
//!
//! - `Data()` - a new ordered container; `d["key"]`, `d["key"] = v`,
//!   `d.keys()`, `d.len()`, `"key" in d`, `d.remove("key")`, `d.meta`
//! - `ndarray([..])`, `ndarray([..], shape)` - arrays with `+ - * /`
//!   against arrays and numbers, `a.shape`, `a.dtype`, `a.sum()`,
//!   `a.to_list()`
//! - images expose `width`, `height` and `channels`
//! - `BoundingBox(cx, cy, height, width [, label [, probability]])`
//! - `bytes([..])` / `bytes("text")` - blobs, concatenated with `+`
//!
//! ## Example
//!
//! ```rhai
//! fn setup() {
//!     this.calls = 0;
//! }
//!
//! fn run(input) {
//!     this.calls += 1;
//!     let out = Data();
//!     out["x"] = input["x"] + 1;
//!     out["scaled"] = input["arr1"] * 2 + input["arr2"];
//!     out
//! }
//! ```

mod engine;
mod marshal;
mod types;

pub use engine::ScriptEngine;
pub use marshal::{classify, Marshaller};
pub use types::{bbox_to_map, register_converters, ScriptArray, ScriptData, ScriptImage};

use crate::error::{PipeDataError, Result};
use rhai::{Engine, AST};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A compiled script that can be executed efficiently
#[derive(Clone)]
pub struct CompiledScript {
    /// The compiled AST
    ast: AST,
    /// The original source code
    source: String,
    /// Name/identifier for this script
    name: String,
}

impl CompiledScript {
    /// Get the source code of this script
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Get the name of this script
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }

    /// Whether the script defines `name` taking exactly `arity` parameters.
    pub fn has_function(&self, name: &str, arity: usize) -> bool {
        self.ast
            .iter_functions()
            .any(|f| f.name == name && f.params.len() == arity)
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

/// Cache for compiled scripts to avoid recompilation
#[derive(Default)]
pub struct ScriptCache {
    /// Map from script source to compiled script
    cache: HashMap<String, CompiledScript>,
}

impl ScriptCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Get a cached script or compile and cache it
    pub fn get_or_compile(
        &mut self,
        engine: &Engine,
        name: &str,
        source: &str,
    ) -> Result<CompiledScript> {
        if let Some(script) = self.cache.get(source) {
            return Ok(script.clone());
        }

        let ast = engine
            .compile(source)
            .map_err(|e| PipeDataError::Script(format!("Compilation error in '{}': {}", name, e)))?;

        let script = CompiledScript {
            ast,
            source: source.to_string(),
            name: name.to_string(),
        };

        tracing::debug!(name, "compiled script");
        self.cache.insert(source.to_string(), script.clone());
        Ok(script)
    }

    /// Clear the cache
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Thread-safe script cache wrapper
pub type SharedScriptCache = Arc<RwLock<ScriptCache>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_cache() {
        let engine = Engine::new();
        let mut cache = ScriptCache::new();

        let script = "fn run(x) { x }";
        let first = cache.get_or_compile(&engine, "test", script).unwrap();
        let second = cache.get_or_compile(&engine, "test", script).unwrap();

        // Should be the same (cached)
        assert_eq!(first.source(), second.source());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_has_function_checks_arity() {
        let engine = Engine::new();
        let mut cache = ScriptCache::new();
        let script = cache
            .get_or_compile(&engine, "t", "fn setup() {} fn run(input) { input }")
            .unwrap();
        assert!(script.has_function("run", 1));
        assert!(script.has_function("setup", 0));
        assert!(!script.has_function("run", 0));
        assert!(!script.has_function("missing", 1));
    }

    #[test]
    fn test_compile_error_names_script() {
        let engine = Engine::new();
        let mut cache = ScriptCache::new();
        let err = cache.get_or_compile(&engine, "broken", "fn run( {").unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
