//! Time-ordered event queue shared by both scheduling strategies.
//!
//! Tasks live in an id-keyed arena; heap entries reference them by id, so
//! removal is lazy (stale entries are skipped when popped) and never
//! iterates the heap.

use super::{Dispatchable, Schedule, SchedulerConfig, Task, TaskBody, TaskId};
use crate::knowledge::Trigger;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand::SeedableRng;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A scheduled occurrence of a task.
#[derive(Clone)]
struct QueuedEvent {
    /// Absolute execution time in milliseconds.
    time_ms: u64,
    /// Insertion order tiebreaker (FIFO at equal times).
    seq: u64,
    task_id: TaskId,
    trigger: Trigger,
    periodic: bool,
    /// Unjittered start of the period this occurrence belongs to.
    period_start_ms: u64,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time_ms == other.time_ms && self.seq == other.seq
    }
}
impl Eq for QueuedEvent {}
impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time_ms, self.seq).cmp(&(other.time_ms, other.seq))
    }
}

struct TaskRecord {
    body: Arc<dyn TaskBody>,
    schedule: Schedule,
}

pub(crate) struct EventQueue {
    heap: BinaryHeap<Reverse<QueuedEvent>>,
    tasks: HashMap<TaskId, TaskRecord>,
    /// Triggers with a scheduled-but-not-finished execution; further
    /// fires of the same trigger are coalesced.
    pending_triggers: HashSet<(TaskId, Trigger)>,
    rng: ChaCha8Rng,
    jitter_fraction: f64,
    next_task_id: u64,
    next_seq: u64,
    /// Last dispatch time; zero-delay trigger events are stamped with it.
    now_ms: u64,
}

impl EventQueue {
    pub(crate) fn new(config: SchedulerConfig) -> Self {
        Self {
            heap: BinaryHeap::new(),
            tasks: HashMap::new(),
            pending_triggers: HashSet::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            jitter_fraction: config.jitter_fraction.clamp(0.0, 1.0),
            next_task_id: 0,
            next_seq: 0,
            now_ms: 0,
        }
    }

    pub(crate) fn add_task(&mut self, task: Task) -> TaskId {
        let task_id = TaskId(self.next_task_id);
        self.next_task_id += 1;

        if let Some(period) = task.schedule.period_ms {
            let offset = if task.schedule.randomized_start && period > 0 {
                self.rng.gen_range(0..=period)
            } else {
                0
            };
            debug!(%task_id, name = task.body.name(), period, offset, "periodic task added");
            let start = self.now_ms + offset;
            self.push(QueuedEvent {
                time_ms: start,
                seq: 0,
                task_id,
                trigger: Trigger::Timed { period_ms: period },
                periodic: true,
                period_start_ms: start,
            });
        }
        self.tasks.insert(
            task_id,
            TaskRecord {
                body: task.body,
                schedule: task.schedule,
            },
        );
        task_id
    }

    pub(crate) fn remove_task(&mut self, task_id: TaskId) {
        if self.tasks.remove(&task_id).is_none() {
            return;
        }
        // Heap entries for the task are skipped lazily on pop.
        self.pending_triggers.retain(|(id, _)| *id != task_id);
    }

    /// Schedules an immediate one-shot execution for a trigger fire.
    /// Returns false when the fire is coalesced with a pending one or the
    /// task is unknown.
    pub(crate) fn on_trigger(&mut self, task_id: TaskId, trigger: &Trigger) -> bool {
        if !self.tasks.contains_key(&task_id) {
            return false;
        }
        let key = (task_id, trigger.clone());
        if self.pending_triggers.contains(&key) {
            return false;
        }
        self.pending_triggers.insert(key);
        self.push(QueuedEvent {
            time_ms: self.now_ms,
            seq: 0,
            task_id,
            trigger: trigger.clone(),
            periodic: false,
            period_start_ms: self.now_ms,
        });
        true
    }

    /// Pops the earliest due event, rescheduling periodic occurrences as
    /// `period start + period + jitter` before handing the dispatch out.
    pub(crate) fn pop_due(&mut self, now_ms: u64) -> Option<Dispatchable> {
        self.now_ms = self.now_ms.max(now_ms);
        loop {
            match self.heap.peek() {
                Some(Reverse(event)) if event.time_ms <= now_ms => {}
                _ => return None,
            }
            let Reverse(event) = self.heap.pop().unwrap();
            let Some(record) = self.tasks.get(&event.task_id) else {
                continue; // removed task, stale entry
            };
            let body = Arc::clone(&record.body);
            if event.periodic {
                if let Some(period) = record.schedule.period_ms {
                    let next_start = event.period_start_ms + period;
                    let max_jitter = ((period as f64) * self.jitter_fraction) as u64;
                    let jitter = if max_jitter > 0 {
                        self.rng.gen_range(0..max_jitter)
                    } else {
                        0
                    };
                    self.push(QueuedEvent {
                        time_ms: next_start + jitter,
                        seq: 0,
                        task_id: event.task_id,
                        trigger: event.trigger.clone(),
                        periodic: true,
                        period_start_ms: next_start,
                    });
                }
            }
            return Some(Dispatchable {
                task_id: event.task_id,
                body,
                trigger: event.trigger,
            });
        }
    }

    /// Earliest pending execution time, skipping entries of removed tasks.
    pub(crate) fn next_deadline(&mut self) -> Option<u64> {
        while let Some(Reverse(event)) = self.heap.peek() {
            if self.tasks.contains_key(&event.task_id) {
                return Some(event.time_ms);
            }
            self.heap.pop();
        }
        None
    }

    /// Clears the coalescing marker once an execution finished (or
    /// failed), allowing the next fire of the trigger to schedule again.
    pub(crate) fn execution_finished(&mut self, task_id: TaskId, trigger: &Trigger) {
        self.pending_triggers.remove(&(task_id, trigger.clone()));
    }

    fn push(&mut self, mut event: QueuedEvent) {
        event.seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(event));
    }
}
