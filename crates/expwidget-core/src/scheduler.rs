//! Cancellable delayed tasks.
//!
//! The browser implementation sits on `setTimeout`; [`ManualScheduler`]
//! runs tasks when a test advances its clock.

use crate::clock::{Clock, ManualClock};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

/// Handle to a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub u64);

/// A one-shot task.
pub type Task = Box<dyn FnOnce()>;

/// Runs tasks after a delay.
pub trait Scheduler {
    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;

    /// Cancel a pending task. Unknown or already-run handles are ignored.
    fn cancel(&self, handle: TaskHandle);
}

#[derive(Default)]
struct Queue {
    next_id: u64,
    /// Ordered by (due time, insertion order)
    tasks: BTreeMap<(u64, u64), Task>,
    due_by_id: HashMap<u64, u64>,
}

/// Deterministic scheduler driven by a [`ManualClock`]. Clones share the queue.
#[derive(Clone)]
pub struct ManualScheduler {
    queue: Rc<RefCell<Queue>>,
    clock: ManualClock,
}

impl ManualScheduler {
    /// Create a scheduler reading and advancing `clock`.
    #[must_use]
    pub fn new(clock: ManualClock) -> Self {
        Self {
            queue: Rc::default(),
            clock,
        }
    }

    /// The clock this scheduler advances.
    #[must_use]
    pub const fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().tasks.len()
    }

    /// Advance time by `by`, running every task that falls due, in order.
    ///
    /// Tasks scheduled while advancing run too if they fall inside the
    /// window. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.clock.now_ms() + by.as_millis() as u64;
        let mut ran = 0;

        loop {
            let next = {
                let mut queue = self.queue.borrow_mut();
                let first = queue.tasks.first_key_value().map(|(&key, _)| key);
                match first {
                    Some((due, id)) if due <= target => {
                        queue.due_by_id.remove(&id);
                        queue.tasks.remove(&(due, id)).map(|task| (due, task))
                    }
                    _ => None,
                }
            };

            let Some((due, task)) = next else { break };
            self.clock.set(due.max(self.clock.now_ms()));
            task();
            ran += 1;
        }

        self.clock.set(target);
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let due = self.clock.now_ms() + delay.as_millis() as u64;
        let mut queue = self.queue.borrow_mut();
        let id = queue.next_id;
        queue.next_id += 1;
        queue.tasks.insert((due, id), task);
        queue.due_by_id.insert(id, due);
        TaskHandle(id)
    }

    fn cancel(&self, handle: TaskHandle) {
        let removed = {
            let mut queue = self.queue.borrow_mut();
            queue
                .due_by_id
                .remove(&handle.0)
                .and_then(|due| queue.tasks.remove(&(due, handle.0)))
        };
        // Dropped outside the borrow: the task may own handles into this queue
        drop(removed);
    }
}
