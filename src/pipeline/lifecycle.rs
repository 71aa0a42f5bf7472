//! Lazy initialization and deterministic release for step runners.
//!
//! A [`LazyRunner`] wraps a [`ManagedStep`] and drives it through
//! `Uninitialized -> Ready -> Closed`. One mutex guards the step's resource
//! and is held across initialization, execution and teardown, so calls on
//! one runner never overlap and `close` waits for an in-flight `exec`.

use super::step::{Context, PipelineStep, PipelineStepRunner};
use crate::data::Data;
use crate::error::{PipeDataError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use uuid::Uuid;

/// Step logic split into resource acquisition and use.
pub trait ManagedStep: Send + Sync + 'static {
    /// Whatever initialization builds: an interpreter, a loaded model.
    type Resource: Send;

    fn pipeline_step(&self) -> &dyn PipelineStep;

    /// Build the resource. Called on the first `exec`, and again on a later
    /// `exec` if it failed.
    fn acquire(&self, ctx: &Context) -> Result<Self::Resource>;

    fn run(&self, resource: &mut Self::Resource, ctx: &Context, input: Data) -> Result<Data>;

    /// Tear the resource down. Dropping it is enough unless overridden.
    fn release(&self, resource: Self::Resource) -> Result<()> {
        drop(resource);
        Ok(())
    }
}

/// Observable lifecycle state of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Uninitialized,
    Ready,
    /// Another call currently holds the runner.
    Executing,
    Closed,
}

enum Slot<R> {
    Uninitialized,
    Ready(R),
    Closed,
}

impl<R> Slot<R> {
    fn state(&self) -> RunnerState {
        match self {
            Slot::Uninitialized => RunnerState::Uninitialized,
            Slot::Ready(_) => RunnerState::Ready,
            Slot::Closed => RunnerState::Closed,
        }
    }
}

/// Runner that initializes its step on first use and releases it on
/// `close` or drop.
pub struct LazyRunner<S: ManagedStep> {
    id: Uuid,
    step: S,
    slot: Mutex<Slot<S::Resource>>,
    initializations: AtomicUsize,
}

impl<S: ManagedStep> LazyRunner<S> {
    /// Wrap a step. No resources are acquired here.
    pub fn new(step: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            step,
            slot: Mutex::new(Slot::Uninitialized),
            initializations: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn step(&self) -> &S {
        &self.step
    }

    pub fn state(&self) -> RunnerState {
        match self.slot.try_lock() {
            Ok(slot) => slot.state(),
            Err(TryLockError::WouldBlock) => RunnerState::Executing,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().state(),
        }
    }

    /// Number of successful initializations so far (0 or 1).
    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        self.step.pipeline_step().name()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slot<S::Resource>>> {
        self.slot.lock().map_err(|_| {
            PipeDataError::ResourceLifecycle(format!(
                "runner for step '{}' was poisoned by a panic",
                self.name()
            ))
        })
    }

    fn initialize(&self, ctx: &Context) -> Result<S::Resource> {
        tracing::debug!(runner = %self.id, step = self.name(), "initializing step");
        let resource = self.step.acquire(ctx).map_err(|e| match e {
            PipeDataError::Initialization(_) => e,
            other => PipeDataError::Initialization(format!("step '{}': {}", self.name(), other)),
        })?;
        self.initializations.fetch_add(1, Ordering::SeqCst);
        Ok(resource)
    }

    fn release(&self, slot: &mut Slot<S::Resource>) -> Result<()> {
        match std::mem::replace(slot, Slot::Closed) {
            Slot::Ready(resource) => {
                tracing::debug!(runner = %self.id, step = self.name(), "releasing step");
                self.step.release(resource)
            }
            Slot::Uninitialized | Slot::Closed => Ok(()),
        }
    }
}

impl<S: ManagedStep> PipelineStepRunner for LazyRunner<S> {
    fn pipeline_step(&self) -> &dyn PipelineStep {
        self.step.pipeline_step()
    }

    fn exec(&self, ctx: &Context, input: Data) -> Result<Data> {
        let mut slot = self.lock()?;
        if let Slot::Uninitialized = *slot {
            let resource = self.initialize(ctx)?;
            *slot = Slot::Ready(resource);
        }
        match &mut *slot {
            Slot::Ready(resource) => self.step.run(resource, ctx, input),
            Slot::Closed => Err(PipeDataError::ResourceLifecycle(format!(
                "exec called on closed runner for step '{}'",
                self.name()
            ))),
            Slot::Uninitialized => Err(PipeDataError::ResourceLifecycle(format!(
                "runner for step '{}' is not initialized",
                self.name()
            ))),
        }
    }

    fn close(&self) -> Result<()> {
        let mut slot = self.lock()?;
        self.release(&mut slot)
    }
}

impl<S: ManagedStep> Drop for LazyRunner<S> {
    fn drop(&mut self) {
        let slot = match self.slot.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Slot::Ready(resource) = std::mem::replace(slot, Slot::Closed) {
            tracing::debug!(runner = %self.id, "releasing step on drop");
            if let Err(e) = self.step.release(resource) {
                tracing::warn!(runner = %self.id, "failed to release step: {}", e);
            }
        }
    }
}

impl<S: ManagedStep + std::fmt::Debug> std::fmt::Debug for LazyRunner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyRunner")
            .field("id", &self.id)
            .field("step", &self.step)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[derive(Debug)]
    struct Counter;

    impl PipelineStep for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn kind(&self) -> &'static str {
            "test"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Counts calls; the resource is the number of runs so far.
    #[derive(Default)]
    struct CountingStep {
        acquired: AtomicUsize,
        released: Arc<AtomicUsize>,
        fail_first_acquire: AtomicBool,
    }

    impl ManagedStep for CountingStep {
        type Resource = i64;

        fn pipeline_step(&self) -> &dyn PipelineStep {
            &Counter
        }

        fn acquire(&self, _ctx: &Context) -> Result<i64> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            if self.fail_first_acquire.swap(false, Ordering::SeqCst) {
                return Err(PipeDataError::Script("device busy".to_string()));
            }
            Ok(0)
        }

        fn run(&self, runs: &mut i64, _ctx: &Context, input: Data) -> Result<Data> {
            if input.contains("fail") {
                return Err(PipeDataError::Script("asked to fail".to_string()));
            }
            *runs += 1;
            Data::singleton("runs", *runs)
        }

        fn release(&self, _resource: i64) -> Result<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn exec(runner: &LazyRunner<CountingStep>) -> Result<Data> {
        runner.exec(&Context::new(), Data::new())
    }

    #[test]
    fn test_construction_is_lazy() {
        let runner = LazyRunner::new(CountingStep::default());
        assert_eq!(runner.state(), RunnerState::Uninitialized);
        assert_eq!(runner.step().acquired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_single_initialization() {
        let runner = LazyRunner::new(CountingStep::default());
        for expected in 1..=3 {
            assert_eq!(exec(&runner).unwrap().get_long("runs").unwrap(), expected);
        }
        assert_eq!(runner.initializations(), 1);
        assert_eq!(runner.state(), RunnerState::Ready);
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let step = CountingStep::default();
        let released = Arc::clone(&step.released);
        let runner = LazyRunner::new(step);
        exec(&runner).unwrap();

        runner.close().unwrap();
        runner.close().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(runner.state(), RunnerState::Closed);

        let err = exec(&runner).unwrap_err();
        assert!(matches!(err, PipeDataError::ResourceLifecycle(_)));
    }

    #[test]
    fn test_close_without_exec() {
        let step = CountingStep::default();
        let released = Arc::clone(&step.released);
        let runner = LazyRunner::new(step);
        runner.close().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert_eq!(runner.step().acquired.load(Ordering::SeqCst), 0);
        assert!(exec(&runner).is_err());
    }

    #[test]
    fn test_init_failure_is_retried() {
        let step = CountingStep {
            fail_first_acquire: AtomicBool::new(true),
            ..CountingStep::default()
        };
        let runner = LazyRunner::new(step);

        let err = exec(&runner).unwrap_err();
        assert!(matches!(err, PipeDataError::Initialization(ref msg) if msg.contains("device busy")));
        assert_eq!(runner.state(), RunnerState::Uninitialized);

        assert_eq!(exec(&runner).unwrap().get_long("runs").unwrap(), 1);
        assert_eq!(runner.step().acquired.load(Ordering::SeqCst), 2);
        assert_eq!(runner.initializations(), 1);
    }

    #[test]
    fn test_exec_failure_keeps_runner_ready() {
        let runner = LazyRunner::new(CountingStep::default());
        let failing = Data::singleton("fail", true).unwrap();
        assert!(runner.exec(&Context::new(), failing).is_err());
        assert_eq!(runner.state(), RunnerState::Ready);
        assert_eq!(exec(&runner).unwrap().get_long("runs").unwrap(), 1);
        assert_eq!(runner.initializations(), 1);
    }

    #[test]
    fn test_drop_releases() {
        let step = CountingStep::default();
        let released = Arc::clone(&step.released);
        {
            let runner = LazyRunner::new(step);
            exec(&runner).unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_exec_is_serialized() {
        let runner = Arc::new(LazyRunner::new(CountingStep::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let runner = Arc::clone(&runner);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        exec(&runner).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(runner.initializations(), 1);
        assert_eq!(exec(&runner).unwrap().get_long("runs").unwrap(), 201);
    }

    /// Holds every `run` until the test has seen it start.
    struct SlowStep {
        entered: Barrier,
        run_finished: AtomicBool,
        released_after_run: AtomicBool,
    }

    impl ManagedStep for SlowStep {
        type Resource = ();

        fn pipeline_step(&self) -> &dyn PipelineStep {
            &Counter
        }

        fn acquire(&self, _ctx: &Context) -> Result<()> {
            Ok(())
        }

        fn run(&self, _: &mut (), _ctx: &Context, input: Data) -> Result<Data> {
            self.entered.wait();
            std::thread::sleep(Duration::from_millis(50));
            self.run_finished.store(true, Ordering::SeqCst);
            Ok(input)
        }

        fn release(&self, _resource: ()) -> Result<()> {
            self.released_after_run
                .store(self.run_finished.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_close_waits_for_in_flight_exec() {
        let runner = Arc::new(LazyRunner::new(SlowStep {
            entered: Barrier::new(2),
            run_finished: AtomicBool::new(false),
            released_after_run: AtomicBool::new(false),
        }));

        let worker = {
            let runner = Arc::clone(&runner);
            std::thread::spawn(move || runner.exec(&Context::new(), Data::singleton("k", 1i64)?))
        };
        runner.step().entered.wait();
        assert_eq!(runner.state(), RunnerState::Executing);

        runner.close().unwrap();
        assert!(runner.step().released_after_run.load(Ordering::SeqCst));
        assert_eq!(runner.state(), RunnerState::Closed);

        let output = worker.join().unwrap().unwrap();
        assert_eq!(output.get_long("k").unwrap(), 1);
    }
}
