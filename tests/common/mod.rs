//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use pipedata_rs::data::Data;
use pipedata_rs::format::FormatRegistry;
use pipedata_rs::pipeline::{self, Context, PipelineStepRunner, ScriptStep};
use pipedata_rs::Result;

/// Run `code` once through a fresh scripted-step runner and close it.
pub fn run_script(code: &str, input: Data) -> Result<Data> {
    let runner = pipeline::runner(ScriptStep::new(code), FormatRegistry::shared());
    let output = runner.exec(&Context::new(), input);
    runner.close()?;
    output
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
