//! Pipeline steps and their execution contract.
//!
//! A pipeline driver holds one [`PipelineStepRunner`] per step and feeds each
//! step's output [`Data`](crate::data::Data) to the next. Runners follow one
//! lifecycle:
//!
//! ```text
//! Uninitialized ──exec──► Ready ◄──► Executing
//!       │                   │
//!       └──────close────────┴──► Closed
//! ```
//!
//! # Design
//!
//! - **Lazy initialization** — constructing a runner acquires nothing; the
//!   first `exec` does, and retries on the next call if it failed.
//! - **One lock per runner** — held across init, exec and close, so calls on
//!   one runner are serialized while separate runners run in parallel.
//! - **Scoped release** — `close` and `Drop` release exactly once.
//! - **Factories** — [`RunnerRegistry`] picks a runner for a step description.

pub mod lifecycle;
pub mod model_step;
pub mod script_step;
pub mod step;

pub use lifecycle::{LazyRunner, ManagedStep, RunnerState};
pub use model_step::{model_runner, InMemoryModelLoader, ModelLoader, ModelStep, ModelStepHost, ModelStepRunner};
pub use script_step::{
    runner, runner_with_limits, ScriptSession, ScriptStep, ScriptStepFactory, ScriptStepHost,
    ScriptStepRunner,
};
pub use step::{Context, PipelineStep, PipelineStepRunner, RunnerRegistry, StepRunnerFactory};

use crate::config::ScriptLimits;
use crate::format::SharedFormatRegistry;

impl RunnerRegistry {
    /// A registry that can run [`ScriptStep`]s.
    pub fn with_defaults(registry: SharedFormatRegistry, limits: ScriptLimits) -> Self {
        let mut runners = Self::new();
        runners.register(ScriptStepFactory::new(registry, limits));
        runners
    }
}
