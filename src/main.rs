//! pipedata - run a JSON record through the scripted steps of a config
//!
//! ```text
//! pipedata [--config <config.toml>] <input.json>
//! ```
//!
//! Without `--config` the config is read from the platform config directory
//! and defaults are used when it is missing. Prints the final record as
//! pretty JSON on stdout.

use anyhow::{Context as _, Result};
use clap::Parser;
use pipedata_rs::{
    data::Data,
    format::FormatRegistry,
    logging,
    pipeline::{Context, RunnerRegistry},
    RuntimeConfig,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pipedata")]
#[command(author, version)]
#[command(about = "Run a JSON record through the scripted steps of a config")]
struct Args {
    /// Path to the input record (JSON)
    input: PathBuf,

    /// Config file (default: the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::load_or_default(),
    };
    let _log_guard = logging::init(&config.logging)?;

    tracing::info!(steps = config.steps.len(), "starting pipeline");

    let input = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading input {}", args.input.display()))?;
    let mut data = Data::from_json(&input).context("parsing input record")?;

    let runners = RunnerRegistry::with_defaults(FormatRegistry::shared(), config.script.clone());
    let ctx = Context::new().with_attribute("input", args.input.display().to_string());

    for step in &config.steps {
        let runner = runners.create(step)?;
        data = runner
            .exec(&ctx, data)
            .with_context(|| format!("step '{}' failed", step.name))?;
        runner.close()?;
        tracing::debug!(step = %step.name, keys = data.len(), "step finished");
    }

    println!("{}", data.to_json_pretty()?);
    Ok(())
}
