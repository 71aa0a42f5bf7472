//! Step descriptions and the runner contract.

use crate::data::Data;
use crate::error::{PipeDataError, Result};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Per-call ambient configuration passed to [`PipelineStepRunner::exec`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    attributes: HashMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Declarative description of a step. Runners are created from these.
pub trait PipelineStep: fmt::Debug + Send + Sync {
    /// Instance name, used in logs and errors.
    fn name(&self) -> &str;

    /// Kind of step, e.g. `"script"`.
    fn kind(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

/// Executes one step.
///
/// `exec` is synchronous and serialized per runner. The first call
/// initializes the step. `close` releases whatever initialization acquired;
/// it is idempotent and every `exec` after it fails.
pub trait PipelineStepRunner: Send + Sync {
    fn pipeline_step(&self) -> &dyn PipelineStep;

    fn exec(&self, ctx: &Context, input: Data) -> Result<Data>;

    fn close(&self) -> Result<()>;
}

/// Builds runners for the steps it understands.
pub trait StepRunnerFactory: Send + Sync {
    fn can_run(&self, step: &dyn PipelineStep) -> bool;

    fn create(&self, step: &dyn PipelineStep) -> Result<Box<dyn PipelineStepRunner>>;
}

/// Ordered set of runner factories. The first one that can run a step wins.
#[derive(Default)]
pub struct RunnerRegistry {
    factories: Vec<Box<dyn StepRunnerFactory>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: impl StepRunnerFactory + 'static) -> &mut Self {
        self.factories.push(Box::new(factory));
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn can_run(&self, step: &dyn PipelineStep) -> bool {
        self.factories.iter().any(|f| f.can_run(step))
    }

    pub fn create(&self, step: &dyn PipelineStep) -> Result<Box<dyn PipelineStepRunner>> {
        let factory = self
            .factories
            .iter()
            .find(|f| f.can_run(step))
            .ok_or_else(|| {
                PipeDataError::UnsupportedType(format!(
                    "no runner available for step '{}' of kind {}",
                    step.name(),
                    step.kind()
                ))
            })?;
        tracing::debug!(step = step.name(), kind = step.kind(), "creating runner");
        factory.create(step)
    }
}

impl fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("factories", &self.factories.len())
            .finish()
    }
}
