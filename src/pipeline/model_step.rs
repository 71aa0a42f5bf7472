//! Model-backed step: load an opaque model once, apply it on every call.

use super::lifecycle::{LazyRunner, ManagedStep};
use super::step::{Context, PipelineStep};
use crate::data::Data;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::marker::PhantomData;

/// Turns stored bytes into a runnable model and back.
pub trait ModelLoader: Send + Sync + 'static {
    type Model: Send + 'static;

    fn load_model(&self) -> Result<Self::Model>;

    fn save_model(&self, model: &Self::Model) -> Result<Vec<u8>>;
}

/// Loader over a bincode-encoded model held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryModelLoader<M> {
    bytes: Vec<u8>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Serialize + DeserializeOwned> InMemoryModelLoader<M> {
    pub fn new(model: &M) -> Result<Self> {
        Ok(Self::from_bytes(bincode::serialize(model)?))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            _model: PhantomData,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl<M> ModelLoader for InMemoryModelLoader<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    type Model = M;

    fn load_model(&self) -> Result<M> {
        Ok(bincode::deserialize(&self.bytes)?)
    }

    fn save_model(&self, model: &M) -> Result<Vec<u8>> {
        Ok(bincode::serialize(model)?)
    }
}

/// Description of a model step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStep {
    pub name: String,
}

impl ModelStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl PipelineStep for ModelStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "model"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Pairs a loader with the function that applies its model.
pub struct ModelStepHost<L, F> {
    step: ModelStep,
    loader: L,
    apply: F,
}

impl<L, F> ModelStepHost<L, F>
where
    L: ModelLoader,
    F: Fn(&L::Model, &Context, Data) -> Result<Data> + Send + Sync + 'static,
{
    pub fn new(step: ModelStep, loader: L, apply: F) -> Self {
        Self {
            step,
            loader,
            apply,
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }
}

impl<L, F> ManagedStep for ModelStepHost<L, F>
where
    L: ModelLoader,
    F: Fn(&L::Model, &Context, Data) -> Result<Data> + Send + Sync + 'static,
{
    type Resource = L::Model;

    fn pipeline_step(&self) -> &dyn PipelineStep {
        &self.step
    }

    fn acquire(&self, _ctx: &Context) -> Result<L::Model> {
        tracing::debug!(step = %self.step.name, "loading model");
        self.loader.load_model()
    }

    fn run(&self, model: &mut L::Model, ctx: &Context, input: Data) -> Result<Data> {
        (self.apply)(model, ctx, input)
    }
}

pub type ModelStepRunner<L, F> = LazyRunner<ModelStepHost<L, F>>;

/// A runner that loads its model on the first `exec`.
pub fn model_runner<L, F>(step: ModelStep, loader: L, apply: F) -> ModelStepRunner<L, F>
where
    L: ModelLoader,
    F: Fn(&L::Model, &Context, Data) -> Result<Data> + Send + Sync + 'static,
{
    LazyRunner::new(ModelStepHost::new(step, loader, apply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineStepRunner;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Linear {
        weight: f64,
        bias: f64,
    }

    #[test]
    fn test_in_memory_loader_round_trip() {
        let model = Linear {
            weight: 2.0,
            bias: 0.5,
        };
        let loader = InMemoryModelLoader::new(&model).unwrap();
        assert_eq!(loader.load_model().unwrap(), model);
        assert_eq!(loader.save_model(&model).unwrap(), loader.bytes());
    }

    #[test]
    fn test_corrupt_bytes_fail_to_load() {
        let loader = InMemoryModelLoader::<Linear>::from_bytes(vec![1, 2]);
        assert!(loader.load_model().is_err());
    }

    #[test]
    fn test_model_runner_applies_model() {
        let loader = InMemoryModelLoader::new(&Linear {
            weight: 3.0,
            bias: 1.0,
        })
        .unwrap();
        let runner = model_runner(ModelStep::new("linear"), loader, |m: &Linear, _ctx, input| {
            let x = input.get_double("x")?;
            Data::singleton("y", m.weight * x + m.bias)
        });

        let out = runner
            .exec(&Context::new(), Data::singleton("x", 2.0).unwrap())
            .unwrap();
        assert_eq!(out.get_double("y").unwrap(), 7.0);
        assert_eq!(runner.pipeline_step().kind(), "model");
        assert_eq!(runner.initializations(), 1);
    }
}
