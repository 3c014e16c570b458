//! Pluggable task-body executors.
//!
//! The dispatch loop never runs bodies itself: it hands them to an
//! executor together with a listener that must be told about completion
//! or failure (which clears the per-trigger coalescing marker).

use super::{ExecutionError, TaskBody, TaskId};
use crate::knowledge::Trigger;
use std::sync::Arc;
use tracing::trace;

/// Told about the outcome of every dispatched execution.
pub trait ExecutionListener: Send + Sync {
    fn execution_completed(&self, task_id: TaskId, trigger: &Trigger);
    fn execution_failed(&self, task_id: TaskId, trigger: &Trigger, error: ExecutionError);
}

/// Runs task bodies and reports their outcome.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        task_id: TaskId,
        body: Arc<dyn TaskBody>,
        trigger: Trigger,
        listener: Arc<dyn ExecutionListener>,
    );
}

fn run_body(
    task_id: TaskId,
    body: &dyn TaskBody,
    trigger: &Trigger,
    listener: &dyn ExecutionListener,
) {
    trace!(%task_id, name = body.name(), "executing task body");
    match body.invoke(trigger) {
        Ok(()) => listener.execution_completed(task_id, trigger),
        Err(error) => listener.execution_failed(task_id, trigger, error),
    }
}

/// Same-thread executor for deterministic simulation.
///
/// Bodies run synchronously inside the dispatch loop, so they must be
/// fast and side-effect-bounded to preserve simulated-time fidelity.
#[derive(Default)]
pub struct InlineExecutor;

impl InlineExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for InlineExecutor {
    fn execute(
        &self,
        task_id: TaskId,
        body: Arc<dyn TaskBody>,
        trigger: Trigger,
        listener: Arc<dyn ExecutionListener>,
    ) {
        run_body(task_id, body.as_ref(), &trigger, listener.as_ref());
    }
}

/// Worker-pool executor for real deployments.
///
/// Bodies run on tokio's blocking pool so that slow predicate evaluation
/// or network sends never stall the dispatch loop.
pub struct PoolExecutor {
    handle: tokio::runtime::Handle,
}

impl PoolExecutor {
    /// Uses the current tokio runtime. Panics outside one, which is a
    /// deployment wiring error.
    pub fn new() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl Executor for PoolExecutor {
    fn execute(
        &self,
        task_id: TaskId,
        body: Arc<dyn TaskBody>,
        trigger: Trigger,
        listener: Arc<dyn ExecutionListener>,
    ) {
        self.handle.spawn_blocking(move || {
            run_body(task_id, body.as_ref(), &trigger, listener.as_ref());
        });
    }
}
