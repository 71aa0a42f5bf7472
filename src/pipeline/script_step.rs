//! Scripted step: user Rhai code driven through the runner lifecycle.
//!
//! ## Script Interface
//!
//! - `run(input)` (or `run(input, ctx)`) is required. `input` is a `Data`
//!   container; the function returns a `Data` (or an object map).
//! - `setup()` is optional and runs once during initialization.
//! - Inside both, `this` is a map that persists for the runner's lifetime.
//! - `ctx` is a map of the call context's attributes.
//!
//! ```rhai
//! fn setup() {
//!     this.offset = 1;
//! }
//!
//! fn run(input) {
//!     let out = Data();
//!     out["x"] = input["x"] + this.offset;
//!     out
//! }
//! ```

use super::lifecycle::{LazyRunner, ManagedStep};
use super::step::{Context, PipelineStep, PipelineStepRunner, StepRunnerFactory};
use crate::config::ScriptLimits;
use crate::data::Data;
use crate::error::{PipeDataError, Result, ResultExt};
use crate::format::SharedFormatRegistry;
use crate::scripting::{CompiledScript, Marshaller, ScriptEngine};
use rhai::{Dynamic, Map, Scope};
use serde::{Deserialize, Serialize};
use std::any::Any;

pub const DEFAULT_SETUP_METHOD: &str = "setup";
pub const DEFAULT_RUN_METHOD: &str = "run";

fn default_name() -> String {
    "script".to_string()
}

fn default_setup_method() -> String {
    DEFAULT_SETUP_METHOD.to_string()
}

fn default_run_method() -> String {
    DEFAULT_RUN_METHOD.to_string()
}

/// A step whose logic is a Rhai script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStep {
    #[serde(default = "default_name")]
    pub name: String,

    /// Script source
    pub code: String,

    /// Function called once during initialization. A missing function is
    /// only an error when the name was changed from `setup`.
    #[serde(default = "default_setup_method")]
    pub setup_method: String,

    /// Function called on every `exec`
    #[serde(default = "default_run_method")]
    pub run_method: String,
}

impl ScriptStep {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            name: default_name(),
            code: code.into(),
            setup_method: default_setup_method(),
            run_method: default_run_method(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_setup_method(mut self, method: impl Into<String>) -> Self {
        self.setup_method = method.into();
        self
    }

    pub fn with_run_method(mut self, method: impl Into<String>) -> Self {
        self.run_method = method.into();
        self
    }
}

impl PipelineStep for ScriptStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "script"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Interpreter state owned by one initialized runner.
pub struct ScriptSession {
    engine: ScriptEngine,
    script: CompiledScript,
    scope: Scope<'static>,
    state: Dynamic,
    pass_context: bool,
}

impl ScriptSession {
    /// The persistent `this` map.
    pub fn state(&self) -> &Dynamic {
        &self.state
    }
}

/// Runs a [`ScriptStep`] against a converter registry.
#[derive(Debug, Clone)]
pub struct ScriptStepHost {
    step: ScriptStep,
    registry: SharedFormatRegistry,
    limits: ScriptLimits,
}

impl ScriptStepHost {
    pub fn new(step: ScriptStep, registry: SharedFormatRegistry, limits: ScriptLimits) -> Self {
        Self {
            step,
            registry,
            limits,
        }
    }
}

fn context_map(ctx: &Context) -> Map {
    ctx.attributes()
        .map(|(k, v)| (k.into(), Dynamic::from(v.to_string())))
        .collect()
}

impl ManagedStep for ScriptStepHost {
    type Resource = ScriptSession;

    fn pipeline_step(&self) -> &dyn PipelineStep {
        &self.step
    }

    fn acquire(&self, _ctx: &Context) -> Result<ScriptSession> {
        let step = &self.step;
        let engine = ScriptEngine::with_limits(self.limits.clone());
        let script = engine.compile(&step.name, &step.code)?;

        let pass_context = if script.has_function(&step.run_method, 1) {
            false
        } else if script.has_function(&step.run_method, 2) {
            true
        } else {
            return Err(PipeDataError::Initialization(format!(
                "script for step '{}' does not define {}(input)",
                step.name, step.run_method
            )));
        };

        let mut scope = Scope::new();
        engine.run_top_level(&mut scope, &script)?;

        let mut state = Dynamic::from_map(Map::new());
        if script.has_function(&step.setup_method, 0) {
            engine.call_with_state(&mut scope, &script, &step.setup_method, &mut state, ())?;
        } else if step.setup_method != DEFAULT_SETUP_METHOD {
            return Err(PipeDataError::Initialization(format!(
                "script for step '{}' does not define {}()",
                step.name, step.setup_method
            )));
        }

        Ok(ScriptSession {
            engine,
            script,
            scope,
            state,
            pass_context,
        })
    }

    fn run(&self, session: &mut ScriptSession, ctx: &Context, input: Data) -> Result<Data> {
        let step = &self.step;
        let marshaller = Marshaller::new(&self.registry);
        let guest = Dynamic::from(
            marshaller
                .to_guest(&input)
                .with_context(|| format!("step '{}' input", step.name))?,
        );

        let ScriptSession {
            engine,
            script,
            scope,
            state,
            pass_context,
        } = session;
        let output = if *pass_context {
            let ctx = Dynamic::from_map(context_map(ctx));
            engine.call_with_state(scope, script, &step.run_method, state, (guest, ctx))?
        } else {
            engine.call_with_state(scope, script, &step.run_method, state, (guest,))?
        };

        marshaller
            .from_guest(&output)
            .with_context(|| format!("step '{}' output", step.name))
    }

    fn release(&self, session: ScriptSession) -> Result<()> {
        tracing::debug!(step = %self.step.name, "dropping script session");
        drop(session);
        Ok(())
    }
}

pub type ScriptStepRunner = LazyRunner<ScriptStepHost>;

/// A runner for `step` with default script limits.
pub fn runner(step: ScriptStep, registry: SharedFormatRegistry) -> ScriptStepRunner {
    runner_with_limits(step, registry, ScriptLimits::default())
}

pub fn runner_with_limits(
    step: ScriptStep,
    registry: SharedFormatRegistry,
    limits: ScriptLimits,
) -> ScriptStepRunner {
    LazyRunner::new(ScriptStepHost::new(step, registry, limits))
}

/// Creates runners for [`ScriptStep`]s.
#[derive(Debug, Clone)]
pub struct ScriptStepFactory {
    registry: SharedFormatRegistry,
    limits: ScriptLimits,
}

impl ScriptStepFactory {
    pub fn new(registry: SharedFormatRegistry, limits: ScriptLimits) -> Self {
        Self { registry, limits }
    }
}

impl StepRunnerFactory for ScriptStepFactory {
    fn can_run(&self, step: &dyn PipelineStep) -> bool {
        step.as_any().is::<ScriptStep>()
    }

    fn create(&self, step: &dyn PipelineStep) -> Result<Box<dyn PipelineStepRunner>> {
        let step = step
            .as_any()
            .downcast_ref::<ScriptStep>()
            .ok_or_else(|| {
                PipeDataError::UnsupportedType(format!("step '{}' is not a script step", step.name()))
            })?;
        Ok(Box::new(runner_with_limits(
            step.clone(),
            self.registry.clone(),
            self.limits.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatRegistry;
    use crate::pipeline::RunnerState;

    fn run_once(code: &str, input: Data) -> Result<Data> {
        let runner = runner(ScriptStep::new(code), FormatRegistry::shared());
        runner.exec(&Context::new(), input)
    }

    #[test]
    fn test_increment() {
        let out = run_once(
            r#"fn run(input) { let out = Data(); out["x"] = input["x"] + 1; out }"#,
            Data::singleton("x", 5i64).unwrap(),
        )
        .unwrap();
        assert_eq!(out.get_long("x").unwrap(), 6);
    }

    #[test]
    fn test_setup_state_persists() {
        let code = r#"
            fn setup() { this.calls = 0; }
            fn run(input) {
                this.calls += 1;
                let out = Data();
                out["calls"] = this.calls;
                out
            }
        "#;
        let runner = runner(ScriptStep::new(code), FormatRegistry::shared());
        for expected in 1..=3 {
            let out = runner.exec(&Context::new(), Data::new()).unwrap();
            assert_eq!(out.get_long("calls").unwrap(), expected);
        }
        assert_eq!(runner.initializations(), 1);
    }

    #[test]
    fn test_context_is_passed_to_two_argument_run() {
        let code = r#"fn run(input, ctx) { let out = Data(); out["who"] = ctx.caller; out }"#;
        let runner = runner(ScriptStep::new(code), FormatRegistry::shared());
        let ctx = Context::new().with_attribute("caller", "tests");
        let out = runner.exec(&ctx, Data::new()).unwrap();
        assert_eq!(out.get_string("who").unwrap(), "tests");
    }

    #[test]
    fn test_custom_method_names() {
        let code = r#"
            fn prepare() { this.factor = 3; }
            fn apply(input) { let out = Data(); out["y"] = input["y"] * this.factor; out }
        "#;
        let step = ScriptStep::new(code)
            .with_setup_method("prepare")
            .with_run_method("apply");
        let runner = runner(step, FormatRegistry::shared());
        let out = runner
            .exec(&Context::new(), Data::singleton("y", 2i64).unwrap())
            .unwrap();
        assert_eq!(out.get_long("y").unwrap(), 6);
    }

    #[test]
    fn test_missing_custom_setup_fails_init() {
        let step = ScriptStep::new("fn run(input) { input }").with_setup_method("prepare");
        let runner = runner(step, FormatRegistry::shared());
        let err = runner.exec(&Context::new(), Data::new()).unwrap_err();
        assert!(matches!(err, PipeDataError::Initialization(ref msg) if msg.contains("prepare")));
        assert_eq!(runner.state(), RunnerState::Uninitialized);
    }

    #[test]
    fn test_missing_run_fails_init() {
        let err = run_once("fn other(input) { input }", Data::new()).unwrap_err();
        assert!(matches!(err, PipeDataError::Initialization(_)));
    }

    #[test]
    fn test_compile_error_fails_init() {
        let err = run_once("fn run(input { input }", Data::new()).unwrap_err();
        assert!(matches!(err, PipeDataError::Initialization(_)));
    }

    #[test]
    fn test_runtime_error_keeps_runner_ready() {
        let code = r#"fn run(input) { let out = Data(); out["v"] = input["v"]; out }"#;
        let runner = runner(ScriptStep::new(code), FormatRegistry::shared());
        assert!(runner.exec(&Context::new(), Data::new()).is_err());
        assert_eq!(runner.state(), RunnerState::Ready);
        let out = runner
            .exec(&Context::new(), Data::singleton("v", "ok").unwrap())
            .unwrap();
        assert_eq!(out.get_string("v").unwrap(), "ok");
    }

    #[test]
    fn test_factory_creates_runner() {
        let factory = ScriptStepFactory::new(FormatRegistry::shared(), ScriptLimits::default());
        let step = ScriptStep::new("fn run(input) { input }").with_name("echo");
        assert!(factory.can_run(&step));
        let runner = factory.create(&step).unwrap();
        assert_eq!(runner.pipeline_step().name(), "echo");
        let data = Data::singleton("k", 1.5).unwrap();
        assert_eq!(runner.exec(&Context::new(), data.clone()).unwrap(), data);
        runner.close().unwrap();
    }
}
