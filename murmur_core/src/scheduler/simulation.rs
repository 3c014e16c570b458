//! Discrete-event scheduling strategy, driven by an external clock.

use super::{
    Scheduler, SchedulerConfig, SchedulerShared, Task, TaskId, TaskTriggerBridge,
};
use crate::knowledge::TriggerListener;
use crate::scheduler::{Executor, InlineExecutor};
use std::sync::Arc;

/// Scheduler for single-threaded simulation.
///
/// The simulation runner owns logical time and repeatedly calls
/// [`SimulationScheduler::advance_to`] "as of" a given time; the
/// scheduler dispatches everything due up to that point. With the default
/// [`InlineExecutor`] the whole node is deterministic given its seed.
pub struct SimulationScheduler {
    shared: Arc<SchedulerShared>,
}

impl SimulationScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_executor(config, Box::new(InlineExecutor::new()))
    }

    pub fn with_executor(config: SchedulerConfig, executor: Box<dyn Executor>) -> Self {
        Self {
            shared: SchedulerShared::new(config, executor),
        }
    }

    /// Dispatches every occurrence due at or before `now_ms`.
    ///
    /// Bodies scheduled by the dispatched bodies themselves (zero-delay
    /// trigger fires) are dispatched in the same call.
    pub fn advance_to(&self, now_ms: u64) {
        self.shared.dispatch_due(now_ms);
    }

    /// Earliest pending execution time, for event-driven simulation
    /// clocks that jump straight to the next deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.shared.next_deadline()
    }
}

impl Scheduler for SimulationScheduler {
    fn start(&self) {
        self.shared.set_running(true);
    }

    fn stop(&self) {
        self.shared.set_running(false);
    }

    fn add_task(&self, task: Task) -> TaskId {
        self.shared.add_task(task)
    }

    fn remove_task(&self, task_id: TaskId) {
        self.shared.remove_task(task_id);
    }

    fn trigger_listener(&self, task_id: TaskId) -> Arc<dyn TriggerListener> {
        Arc::new(TaskTriggerBridge {
            shared: Arc::clone(&self.shared),
            task_id,
        })
    }
}
