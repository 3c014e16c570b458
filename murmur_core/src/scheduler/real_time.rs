//! Wall-clock scheduling strategy for production deployments.

use super::{
    Executor, PoolExecutor, Scheduler, SchedulerConfig, SchedulerShared, Task, TaskId,
    TaskTriggerBridge,
};
use crate::knowledge::TriggerListener;
use murmur_env::NodeContext;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Scheduler driven by wall-clock waits on the nearest deadline.
///
/// The driver loop sleeps until the earliest pending execution time and
/// is interruptible: adding a task or firing a trigger with an earlier
/// deadline wakes it immediately. Bodies are handed to a [`PoolExecutor`]
/// by default so the loop itself never blocks on them.
pub struct RealTimeScheduler {
    shared: Arc<SchedulerShared>,
}

impl RealTimeScheduler {
    pub fn new(config: SchedulerConfig, executor: Box<dyn Executor>) -> Self {
        Self {
            shared: SchedulerShared::new(config, executor),
        }
    }

    /// Convenience constructor using the ambient tokio runtime's pool.
    pub fn on_current_runtime(config: SchedulerConfig) -> Self {
        Self::new(config, Box::new(PoolExecutor::new()))
    }

    /// The dispatch driver. Runs until [`Scheduler::stop`] is called.
    ///
    /// Intended to be spawned once per node:
    /// `ctx.spawn("scheduler", async move { scheduler.run(ctx2).await })`.
    pub async fn run<C: NodeContext>(&self, ctx: Arc<C>) {
        debug!("real-time scheduler driver started");
        while self.shared.is_running() {
            let now = ctx.now_ms();
            self.shared.dispatch_due(now);

            match self.shared.next_deadline() {
                Some(deadline) if deadline > now => {
                    let wait = Duration::from_millis(deadline - now);
                    tokio::select! {
                        _ = ctx.sleep(wait) => {}
                        _ = self.shared.wakeup().notified() => {}
                    }
                }
                Some(_) => {
                    // Already due; loop around and dispatch.
                }
                None => {
                    // Nothing scheduled: park until a task or trigger
                    // arrives (or stop() notifies).
                    self.shared.wakeup().notified().await;
                }
            }
        }
        debug!("real-time scheduler driver stopped");
    }
}

impl Scheduler for RealTimeScheduler {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Trigger;
    use crate::scheduler::{ExecutionError, InlineExecutor, Schedule, TaskBody};
    use murmur_env::TokioContext;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(AtomicU32);

    impl TaskBody for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn invoke(&self, _trigger: &Trigger) -> Result<(), ExecutionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_real_time_periodic_dispatch() {
        let ctx = TokioContext::shared();
        let scheduler = Arc::new(RealTimeScheduler::new(
            SchedulerConfig::new(3).with_jitter_fraction(0.1),
            Box::new(InlineExecutor::new()),
        ));
        scheduler.start();

        let counter = Arc::new(Counter(AtomicU32::new(0)));
        scheduler.add_task(Task::new(
            Schedule::periodic(10).with_randomized_start(false),
            counter.clone(),
        ));

        let driver = Arc::clone(&scheduler);
        let driver_ctx = Arc::clone(&ctx);
        let handle = tokio::spawn(async move { driver.run(driver_ctx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop();
        handle.await.unwrap();

        let count = counter.0.load(Ordering::SeqCst);
        assert!(count >= 3, "expected several periodic executions, got {}", count);
    }

    #[tokio::test]
    async fn test_real_time_wakes_for_new_earlier_deadline() {
        let ctx = TokioContext::shared();
        let scheduler = Arc::new(RealTimeScheduler::new(
            SchedulerConfig::new(3),
            Box::new(InlineExecutor::new()),
        ));
        scheduler.start();

        let driver = Arc::clone(&scheduler);
        let driver_ctx = Arc::clone(&ctx);
        let handle = tokio::spawn(async move { driver.run(driver_ctx).await });

        // Driver is parked on an empty queue; adding a task must wake it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let counter = Arc::new(Counter(AtomicU32::new(0)));
        scheduler.add_task(Task::new(
            Schedule::periodic(5).with_randomized_start(false),
            counter.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop();
        handle.await.unwrap();

        assert!(counter.0.load(Ordering::SeqCst) >= 1);
    }
}
