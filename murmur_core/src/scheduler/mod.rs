//! Task scheduling: periodic and trigger-driven execution.
//!
//! One logical dispatch loop per node. Two interchangeable strategies
//! drive it: [`RealTimeScheduler`] waits on wall-clock deadlines via the
//! node context, [`SimulationScheduler`] is driven externally by a
//! discrete-event clock calling [`SimulationScheduler::advance_to`].
//! Task bodies run through a pluggable [`Executor`]: inline for
//! deterministic simulation, a worker pool for real deployments.
//!
//! Periodic occurrences are rescheduled with seeded jitter
//! (`previous period start + period + jitter`, jitter bounded by a
//! fraction of the period). Without the jitter, nodes deployed or booted
//! simultaneously keep their publishers phase-locked and collide on the
//! shared broadcast medium every period.

mod executor;
mod queue;
mod real_time;
mod simulation;

pub use executor::{ExecutionListener, Executor, InlineExecutor, PoolExecutor};
pub use real_time::RealTimeScheduler;
pub use simulation::SimulationScheduler;

use crate::knowledge::{KnowledgeError, Trigger, TriggerListener};
use murmur_env::NodeId;
use queue::EventQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

/// Stable handle for a task owned by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// When a task runs: on a period, on triggers, or both.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    /// Period in milliseconds, if the task is periodic.
    pub period_ms: Option<u64>,
    /// Knowledge-change triggers the task subscribes to.
    pub triggers: Vec<Trigger>,
    /// Whether the first periodic occurrence gets a random offset within
    /// the period. Decorrelates nodes that start simultaneously.
    pub randomized_start: bool,
}

impl Schedule {
    /// A purely periodic schedule with randomized start offset.
    pub fn periodic(period_ms: u64) -> Self {
        Self {
            period_ms: Some(period_ms),
            triggers: Vec::new(),
            randomized_start: true,
        }
    }

    /// A purely trigger-driven schedule.
    pub fn triggered(triggers: Vec<Trigger>) -> Self {
        Self {
            period_ms: None,
            triggers,
            randomized_start: false,
        }
    }

    pub fn with_triggers(mut self, triggers: Vec<Trigger>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn with_randomized_start(mut self, randomized: bool) -> Self {
        self.randomized_start = randomized;
        self
    }
}

/// Executable body of a task (process call or ensemble evaluation).
pub trait TaskBody: Send + Sync {
    /// Task name for logging.
    fn name(&self) -> &str;

    /// Runs the body for one trigger occurrence.
    fn invoke(&self, trigger: &Trigger) -> Result<(), ExecutionError>;
}

/// A schedulable unit: a schedule plus a body. Owned by the scheduler
/// once added.
pub struct Task {
    pub schedule: Schedule,
    pub body: Arc<dyn TaskBody>,
}

impl Task {
    pub fn new(schedule: Schedule, body: Arc<dyn TaskBody>) -> Self {
        Self { schedule, body }
    }
}

/// A task body failed. Caught per-task: logged, the task stays scheduled
/// for its next period or trigger.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Process execution failed: {0}")]
    Process(String),

    #[error("Membership predicate failed: {0}")]
    Membership(String),

    #[error("Knowledge exchange failed: {0}")]
    Exchange(String),

    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
}

/// Scheduler configuration.
///
/// The jitter seed is an explicit input (derived from the node id by
/// default) so that runs are reproducible; there is no hidden entropy.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seed for jitter and start-offset randomness.
    pub seed: u64,
    /// Maximum jitter as a fraction of the period, clamped to [0, 1].
    pub jitter_fraction: f64,
}

impl SchedulerConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            jitter_fraction: 0.75,
        }
    }

    /// Per-node config with the seed derived from the node id.
    pub fn for_node(node: NodeId) -> Self {
        Self::new(0x6d75_726d_7572_0000 ^ node.as_u32() as u64)
    }

    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// The task-management contract shared by both scheduling strategies.
pub trait Scheduler: Send + Sync {
    /// Transitions stopped → running.
    fn start(&self);

    /// Transitions running → stopped. No further dispatches happen;
    /// in-flight executions may complete.
    fn stop(&self);

    /// Adds a task. Periodic tasks get their first execution at
    /// `now + offset` (offset random within the period when the schedule
    /// asks for it); triggered tasks wait for [`Scheduler::trigger_listener`]
    /// fires.
    fn add_task(&self, task: Task) -> TaskId;

    /// Removes all pending occurrences of the task and clears its trigger
    /// bookkeeping. Idempotent. Best-effort: an already-dispatched body
    /// may still run to completion.
    fn remove_task(&self, task_id: TaskId);

    /// A listener to register on knowledge stores for the task's
    /// triggers; fires schedule an immediate one-shot execution,
    /// coalesced per trigger while one is pending.
    fn trigger_listener(&self, task_id: TaskId) -> Arc<dyn TriggerListener>;
}

/// A popped occurrence, ready to hand to the executor.
pub(crate) struct Dispatchable {
    pub(crate) task_id: TaskId,
    pub(crate) body: Arc<dyn TaskBody>,
    pub(crate) trigger: Trigger,
}

/// State and behavior shared by both strategies: the guarded event queue,
/// the executor, and the completion bookkeeping.
pub(crate) struct SchedulerShared {
    queue: Mutex<EventQueue>,
    executor: Box<dyn Executor>,
    running: AtomicBool,
    /// Wakes the real-time driver when an earlier deadline appears.
    wakeup: Notify,
}

impl SchedulerShared {
    pub(crate) fn new(config: SchedulerConfig, executor: Box<dyn Executor>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(EventQueue::new(config)),
            executor,
            running: AtomicBool::new(false),
            wakeup: Notify::new(),
        })
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn wakeup(&self) -> &Notify {
        &self.wakeup
    }

    pub(crate) fn add_task(&self, task: Task) -> TaskId {
        let id = self.queue.lock().unwrap().add_task(task);
        self.wakeup.notify_waiters();
        id
    }

    pub(crate) fn remove_task(&self, task_id: TaskId) {
        self.queue.lock().unwrap().remove_task(task_id);
    }

    pub(crate) fn on_trigger(&self, task_id: TaskId, trigger: &Trigger) {
        let scheduled = self.queue.lock().unwrap().on_trigger(task_id, trigger);
        if scheduled {
            self.wakeup.notify_waiters();
        }
    }

    /// Pops and executes every event due at `now_ms`. The queue lock is
    /// released around each body execution so that bodies can write
    /// knowledge (and thereby re-enter the scheduler through triggers).
    pub(crate) fn dispatch_due(self: &Arc<Self>, now_ms: u64) {
        if !self.is_running() {
            return;
        }
        loop {
            let dispatch = self.queue.lock().unwrap().pop_due(now_ms);
            let Some(dispatch) = dispatch else {
                break;
            };
            let listener: Arc<dyn ExecutionListener> = Arc::clone(self) as _;
            self.executor
                .execute(dispatch.task_id, dispatch.body, dispatch.trigger, listener);
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<u64> {
        self.queue.lock().unwrap().next_deadline()
    }
}

impl ExecutionListener for SchedulerShared {
    fn execution_completed(&self, task_id: TaskId, trigger: &Trigger) {
        self.queue.lock().unwrap().execution_finished(task_id, trigger);
    }

    fn execution_failed(&self, task_id: TaskId, trigger: &Trigger, error: ExecutionError) {
        warn!(%task_id, %error, "task execution failed");
        self.queue.lock().unwrap().execution_finished(task_id, trigger);
    }
}

/// Bridges store trigger fires into the scheduler for one task.
pub(crate) struct TaskTriggerBridge {
    pub(crate) shared: Arc<SchedulerShared>,
    pub(crate) task_id: TaskId,
}

impl TriggerListener for TaskTriggerBridge {
    fn triggered(&self, trigger: &Trigger) {
        self.shared.on_trigger(self.task_id, trigger);
    }
}
