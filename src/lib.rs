//! # pipedata-rs: self-describing records for pipeline steps
//!
//! Pipeline steps exchange a [`Data`] container: an ordered, typed record of
//! scalars, bytes, arrays, images, bounding boxes, nested containers and
//! homogeneous lists. Scripted steps run user code in an embedded Rhai
//! engine, and every step follows the same lazy lifecycle.
//!
//! ## Architecture
//!
//! - **Data**: the value container with JSON and binary codecs
//! - **Array / Imaging**: format-independent NDArray and Image handles
//! - **Format**: converter registries moving handles between representations
//! - **Scripting**: Rhai engine, guest types and the marshaling protocol
//! - **Pipeline**: runner contract, lazy lifecycle, scripted and model steps
//!
//! ## Example
//!
//! ```no_run
//! use pipedata_rs::{
//!     data::Data,
//!     format::FormatRegistry,
//!     pipeline::{self, Context, PipelineStepRunner, ScriptStep},
//! };
//!
//! fn main() -> pipedata_rs::Result<()> {
//!     let step = ScriptStep::new(
//!         r#"fn run(input) { let out = Data(); out["x"] = input["x"] + 1; out }"#,
//!     );
//!     let runner = pipeline::runner(step, FormatRegistry::shared());
//!
//!     let output = runner.exec(&Context::new(), Data::singleton("x", 5i64)?)?;
//!     assert_eq!(output.get_long("x")?, 6);
//!     runner.close()
//! }
//! ```

pub mod array;
pub mod config;
pub mod data;
pub mod error;
pub mod format;
pub mod imaging;
pub mod logging;
pub mod pipeline;
pub mod scripting;

// Re-export commonly used types
pub use array::{NDArray, NDArrayType};
pub use config::{LoggingConfig, RuntimeConfig, ScriptLimits};
pub use data::{BoundingBox, Data, List, Value, ValueType};
pub use error::{PipeDataError, Result};
pub use format::{FormatRegistry, SharedFormatRegistry};
pub use imaging::Image;
pub use pipeline::{Context, PipelineStepRunner, RunnerRegistry, ScriptStep};
pub use scripting::ScriptEngine;
