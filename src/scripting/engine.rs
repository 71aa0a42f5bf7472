//! Rhai engine setup for scripted steps.

use super::types::{bbox_to_map, number, ScriptArray, ScriptData, ScriptImage};
use super::{CompiledScript, ScriptCache, SharedScriptCache};
use crate::array::{ArithOp, NativeArray, Scalar};
use crate::config::ScriptLimits;
use crate::data::BoundingBox;
use crate::error::{PipeDataError, Result, ResultExt};
use rhai::{
    Array, Blob, CallFnOptions, Dynamic, Engine, EvalAltResult, FuncArgs, ImmutableString, Map,
    Scope, FLOAT, INT,
};
use std::sync::{Arc, RwLock};

type RhaiResult<T> = std::result::Result<T, Box<EvalAltResult>>;

fn script_error(err: PipeDataError) -> Box<EvalAltResult> {
    err.to_string().into()
}

/// A Rhai engine with the pipeline value types registered.
pub struct ScriptEngine {
    /// The Rhai engine instance
    engine: Engine,
    /// Cache of compiled scripts
    cache: SharedScriptCache,
    limits: ScriptLimits,
}

impl ScriptEngine {
    /// Create a new script engine with default limits
    pub fn new() -> Self {
        Self::with_limits(ScriptLimits::default())
    }

    pub fn with_limits(limits: ScriptLimits) -> Self {
        Self::with_cache(Arc::new(RwLock::new(ScriptCache::new())), limits)
    }

    /// Create a new script engine with a shared cache
    pub fn with_cache(cache: SharedScriptCache, limits: ScriptLimits) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine, &limits);

        Self {
            engine,
            cache,
            limits,
        }
    }

    /// Configure the Rhai engine with the guest API and safety limits
    fn configure_engine(engine: &mut Engine, limits: &ScriptLimits) {
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_operations(limits.max_operations);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);

        engine.on_print(|text| tracing::info!(target: "pipedata::script", "{}", text));
        engine.on_debug(|text, source, pos| {
            tracing::debug!(target: "pipedata::script", source = source.unwrap_or(""), %pos, "{}", text)
        });

        register_data_api(engine);
        register_array_api(engine);
        register_image_api(engine);
        register_bbox_api(engine);
        register_bytes_api(engine);
    }

    /// Compile a script and cache it
    pub fn compile(&self, name: &str, source: &str) -> Result<CompiledScript> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| PipeDataError::Script(format!("Failed to acquire cache lock: {}", e)))?;

        cache.get_or_compile(&self.engine, name, source)
    }

    /// Validate a script without executing it
    pub fn validate(&self, source: &str) -> Result<()> {
        self.engine
            .compile(source)
            .map(|_| ())
            .map_err(|e| PipeDataError::Script(format!("Validation error: {}", e)))
    }

    /// Evaluate a script's top-level statements into `scope`.
    pub fn run_top_level(&self, scope: &mut Scope<'static>, script: &CompiledScript) -> Result<()> {
        self.engine
            .run_ast_with_scope(scope, script.ast())
            .with_context(|| format!("Failed to evaluate script '{}'", script.name()))
    }

    /// Call a script function with `this` bound to `state`.
    ///
    /// Top-level statements are not re-evaluated and any variables the
    /// function pushes into `scope` are rewound afterwards.
    pub fn call_with_state(
        &self,
        scope: &mut Scope<'static>,
        script: &CompiledScript,
        function: &str,
        state: &mut Dynamic,
        args: impl FuncArgs,
    ) -> Result<Dynamic> {
        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(state);
        self.engine
            .call_fn_with_options::<Dynamic>(options, scope, script.ast(), function, args)
            .with_context(|| format!("Failed to call {}() in script '{}'", function, script.name()))
    }

    /// Clear the script cache
    pub fn clear_cache(&self) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| PipeDataError::Script(format!("Failed to acquire cache lock: {}", e)))?;
        cache.clear();
        Ok(())
    }

    /// Get a reference to the underlying Rhai engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get a reference to the shared cache
    pub fn cache(&self) -> &SharedScriptCache {
        &self.cache
    }

    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("cache_size", &self.cache.read().map(|c| c.len()).ok())
            .field("limits", &self.limits)
            .finish()
    }
}

/// `Data()` container: indexers, `keys`, `len`, `contains` (and `in`),
/// `remove`, and the `meta` property.
fn register_data_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<ScriptData>("Data")
        .register_fn("Data", ScriptData::new)
        .register_indexer_get(
            |data: &mut ScriptData, key: ImmutableString| -> RhaiResult<Dynamic> {
                data.get(&key)
                    .cloned()
                    .ok_or_else(|| format!("key \"{}\" not found in Data", key).into())
            },
        )
        .register_indexer_set(|data: &mut ScriptData, key: ImmutableString, value: Dynamic| {
            data.set(key, value)
        })
        .register_fn("keys", |data: &mut ScriptData| -> Array {
            data.keys().map(|k| Dynamic::from(k.to_string())).collect()
        })
        .register_fn("len", |data: &mut ScriptData| data.len() as INT)
        .register_fn("is_empty", |data: &mut ScriptData| data.is_empty())
        .register_fn("contains", |data: &mut ScriptData, key: &str| data.contains(key))
        .register_fn("remove", |data: &mut ScriptData, key: &str| {
            data.remove(key).unwrap_or(Dynamic::UNIT)
        })
        .register_get("meta", |data: &mut ScriptData| -> Dynamic {
            data.meta().cloned().map_or(Dynamic::UNIT, Dynamic::from)
        })
        .register_set("meta", |data: &mut ScriptData, meta: ScriptData| {
            data.set_meta(meta)
        })
        .register_fn("to_string", |data: &mut ScriptData| format!("{:?}", data))
        .register_fn("to_debug", |data: &mut ScriptData| format!("{:?}", data));
}

/// `NDArray` arithmetic (`+ - * /` with arrays and scalars on either side),
/// `shape`, `dtype`, `len`, `sum`, `to_list`, and the `ndarray(...)`
/// constructors.
fn register_array_api(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptArray>("NDArray");

    for op in [ArithOp::Add, ArithOp::Sub, ArithOp::Mul, ArithOp::Div] {
        let name = op.symbol();
        engine.register_fn(name, move |a: ScriptArray, b: ScriptArray| -> RhaiResult<ScriptArray> {
            a.native().binary(op, b.native()).map(ScriptArray::new).map_err(script_error)
        });
        engine.register_fn(name, move |a: ScriptArray, s: INT| -> RhaiResult<ScriptArray> {
            a.native().scalar(op, Scalar::Int(s), false).map(ScriptArray::new).map_err(script_error)
        });
        engine.register_fn(name, move |a: ScriptArray, s: FLOAT| -> RhaiResult<ScriptArray> {
            a.native().scalar(op, Scalar::Float(s), false).map(ScriptArray::new).map_err(script_error)
        });
        engine.register_fn(name, move |s: INT, a: ScriptArray| -> RhaiResult<ScriptArray> {
            a.native().scalar(op, Scalar::Int(s), true).map(ScriptArray::new).map_err(script_error)
        });
        engine.register_fn(name, move |s: FLOAT, a: ScriptArray| -> RhaiResult<ScriptArray> {
            a.native().scalar(op, Scalar::Float(s), true).map(ScriptArray::new).map_err(script_error)
        });
    }

    engine
        .register_get("shape", |a: &mut ScriptArray| -> Array {
            a.native().shape().iter().map(|&d| Dynamic::from_int(d as INT)).collect()
        })
        .register_get("dtype", |a: &mut ScriptArray| a.native().dtype().name().to_string())
        .register_fn("len", |a: &mut ScriptArray| a.native().len() as INT)
        .register_fn("sum", |a: &mut ScriptArray| a.native().sum())
        .register_fn("to_list", |a: &mut ScriptArray| -> Array {
            a.native().to_f64_vec().into_iter().map(Dynamic::from_float).collect()
        })
        .register_fn("ndarray", |values: Array| -> RhaiResult<ScriptArray> {
            let shape = [values.len()];
            array_from_script(&values, &shape)
        })
        .register_fn("ndarray", |values: Array, shape: Array| -> RhaiResult<ScriptArray> {
            let shape = shape
                .iter()
                .map(|d| d.as_int().ok().filter(|d| *d >= 0).map(|d| d as usize))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| -> Box<EvalAltResult> { "ndarray shape must be non-negative integers".into() })?;
            array_from_script(&values, &shape)
        })
        .register_fn("to_string", |a: &mut ScriptArray| {
            format!("NDArray({}, {:?})", a.native().dtype(), a.native().shape())
        });
}

fn array_from_script(values: &Array, shape: &[usize]) -> RhaiResult<ScriptArray> {
    let numbers = values
        .iter()
        .map(number)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| -> Box<EvalAltResult> { "ndarray values must be numbers".into() })?;
    NativeArray::from_f64_vec(shape, numbers)
        .map(ScriptArray::new)
        .map_err(script_error)
}

fn register_image_api(engine: &mut Engine) {
    use crate::imaging::ImageRepr;

    engine
        .register_type_with_name::<ScriptImage>("Image")
        .register_get("width", |img: &mut ScriptImage| img.width() as INT)
        .register_get("height", |img: &mut ScriptImage| img.height() as INT)
        .register_get("channels", |img: &mut ScriptImage| img.channels() as INT)
        .register_fn("to_string", |img: &mut ScriptImage| {
            format!("Image({}x{}x{})", img.width(), img.height(), img.channels())
        });
}

fn bbox_number(name: &str, value: &Dynamic) -> RhaiResult<FLOAT> {
    number(value).ok_or_else(|| {
        format!("BoundingBox() expects a number for {}, got {}", name, value.type_name()).into()
    })
}

fn new_bbox(cx: &Dynamic, cy: &Dynamic, h: &Dynamic, w: &Dynamic) -> RhaiResult<BoundingBox> {
    Ok(BoundingBox::new(
        bbox_number("cx", cx)?,
        bbox_number("cy", cy)?,
        bbox_number("height", h)?,
        bbox_number("width", w)?,
    ))
}

/// `BoundingBox(cx, cy, height, width [, label [, probability]])`. Numeric
/// arguments may be INT or FLOAT.
fn register_bbox_api(engine: &mut Engine) {
    engine
        .register_fn(
            "BoundingBox",
            |cx: Dynamic, cy: Dynamic, h: Dynamic, w: Dynamic| -> RhaiResult<Map> {
                Ok(bbox_to_map(&new_bbox(&cx, &cy, &h, &w)?))
            },
        )
        .register_fn(
            "BoundingBox",
            |cx: Dynamic, cy: Dynamic, h: Dynamic, w: Dynamic, label: ImmutableString| -> RhaiResult<Map> {
                Ok(bbox_to_map(&new_bbox(&cx, &cy, &h, &w)?.with_label(label.as_str())))
            },
        )
        .register_fn(
            "BoundingBox",
            |cx: Dynamic,
             cy: Dynamic,
             h: Dynamic,
             w: Dynamic,
             label: ImmutableString,
             p: Dynamic|
             -> RhaiResult<Map> {
                Ok(bbox_to_map(
                    &new_bbox(&cx, &cy, &h, &w)?
                        .with_label(label.as_str())
                        .with_probability(bbox_number("probability", &p)?),
                ))
            },
        );
}

/// `bytes([...])` builds a blob from integers in 0..=255; `+` concatenates.
fn register_bytes_api(engine: &mut Engine) {
    engine
        .register_fn("bytes", |values: Array| -> RhaiResult<Blob> {
            values
                .iter()
                .map(|v| v.as_int().ok().and_then(|i| u8::try_from(i).ok()))
                .collect::<Option<Blob>>()
                .ok_or_else(|| "bytes() expects integers in 0..=255".into())
        })
        .register_fn("bytes", |text: &str| -> Blob { text.as_bytes().to_vec() })
        .register_fn("+", |a: Blob, b: Blob| -> Blob {
            let mut out = a;
            out.extend_from_slice(&b);
            out
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval<T: rhai::Variant + Clone>(script: &str) -> T {
        ScriptEngine::new().engine().eval::<T>(script).unwrap()
    }

    #[test]
    fn test_engine_creation() {
        let engine = ScriptEngine::new();
        assert_eq!(engine.cache().read().unwrap().len(), 0);
    }

    #[test]
    fn test_data_container_in_script() {
        let data: ScriptData = eval(
            r#"
            let d = Data();
            d["b"] = 1;
            d["a"] = "two";
            d["b"] = 3.5;
            d
            "#,
        );
        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(data.get("b").unwrap().as_float().unwrap(), 3.5);
    }

    #[test]
    fn test_missing_key_is_script_error() {
        let engine = ScriptEngine::new();
        let result = engine.engine().eval::<Dynamic>(r#"let d = Data(); d["nope"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_contains_and_in_operator() {
        let found: bool = eval(r#"let d = Data(); d["x"] = 1; "x" in d && !d.contains("y")"#);
        assert!(found);
    }

    #[test]
    fn test_array_arithmetic() {
        let total: FLOAT = eval("let a = ndarray([1.0, 2.0, 3.0]); let b = a * 2 + a; b.sum()");
        assert_eq!(total, 18.0);
        let shape: Array = eval("ndarray([1, 2, 3, 4, 5, 6], [2, 3]).shape");
        assert_eq!(shape.len(), 2);
        assert_eq!(shape[1].as_int().unwrap(), 3);
    }

    #[test]
    fn test_array_shape_mismatch_is_error() {
        let engine = ScriptEngine::new();
        let result = engine
            .engine()
            .eval::<ScriptArray>("ndarray([1.0, 2.0]) + ndarray([1.0, 2.0, 3.0])");
        assert!(result.is_err());
    }

    #[test]
    fn test_bounding_box_constructor() {
        let map: Map = eval(r#"BoundingBox(0.5, 0.5, 0.2, 0.1, "cat", 0.9)"#);
        assert_eq!(map.get("label").unwrap().clone().into_string().unwrap(), "cat");
        assert_eq!(map.get("probability").unwrap().as_float().unwrap(), 0.9);
        let bare: Map = eval("BoundingBox(0.5, 0.5, 0.2, 0.1)");
        assert!(bare.get("label").unwrap().is_unit());
    }

    #[test]
    fn test_bounding_box_accepts_integers() {
        let map: Map = eval(r#"BoundingBox(0, 0, 1, 1.5, "full", 1)"#);
        assert_eq!(map.get("cx").unwrap().as_float().unwrap(), 0.0);
        assert_eq!(map.get("height").unwrap().as_float().unwrap(), 1.0);
        assert_eq!(map.get("width").unwrap().as_float().unwrap(), 1.5);
        assert_eq!(map.get("probability").unwrap().as_float().unwrap(), 1.0);

        let engine = ScriptEngine::new();
        let err = engine
            .engine()
            .eval::<Map>(r#"BoundingBox("a", 0, 1, 1)"#)
            .unwrap_err();
        assert!(err.to_string().contains("cx"));
    }

    #[test]
    fn test_bytes_helper() {
        let blob: Blob = eval(r#"bytes("abc") + bytes([100, 101, 102])"#);
        assert_eq!(blob, b"abcdef".to_vec());
        let engine = ScriptEngine::new();
        assert!(engine.engine().eval::<Blob>("bytes([256])").is_err());
    }

    #[test]
    fn test_operation_limit() {
        let limits = ScriptLimits {
            max_operations: 1_000,
            ..ScriptLimits::default()
        };
        let engine = ScriptEngine::with_limits(limits);
        let result = engine.engine().eval::<INT>("let x = 0; loop { x += 1; }");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let engine = ScriptEngine::new();
        assert!(engine.validate("fn run(input) { input }").is_ok());
        assert!(engine.validate("fn run(input { input }").is_err());
    }

    #[test]
    fn test_caching() {
        let engine = ScriptEngine::new();
        let source = "fn run(input) { input }";
        let a = engine.compile("a", source).unwrap();
        let b = engine.compile("b", source).unwrap();
        assert_eq!(a.source(), b.source());
        assert_eq!(engine.cache().read().unwrap().len(), 1);
        engine.clear_cache().unwrap();
        assert_eq!(engine.cache().read().unwrap().len(), 0);
    }
}
