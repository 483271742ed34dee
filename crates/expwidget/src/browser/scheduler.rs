//! `setTimeout`-backed [`Scheduler`].

use expwidget_core::{Scheduler, Task, TaskHandle};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::warn;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

struct Slot {
    timeout_id: i32,
    _callback: Closure<dyn FnMut()>,
}

#[derive(Default)]
struct Timers {
    next_id: u64,
    slots: HashMap<u64, Slot>,
}

/// Runs tasks through `window.setTimeout`. Clones share pending timers.
#[derive(Clone, Default)]
pub struct TimeoutScheduler {
    timers: Rc<RefCell<Timers>>,
}

impl TimeoutScheduler {
    /// Create a scheduler with no pending timers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers that have not fired or been cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.timers.borrow().slots.len()
    }

    fn fire(timers: &Weak<RefCell<Timers>>, id: u64, task: Task) {
        let slot = timers
            .upgrade()
            .and_then(|timers| timers.borrow_mut().slots.remove(&id));
        task();
        // the closure running now is released only after it returns
        drop(slot);
    }
}

impl Scheduler for TimeoutScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let id = {
            let mut timers = self.timers.borrow_mut();
            timers.next_id += 1;
            timers.next_id
        };
        let handle = TaskHandle(id);

        let Some(window) = web_sys::window() else {
            warn!("no window, task dropped");
            return handle;
        };

        let weak = Rc::downgrade(&self.timers);
        let mut task = Some(task);
        let callback = Closure::<dyn FnMut()>::new(move || {
            if let Some(task) = task.take() {
                Self::fire(&weak, id, task);
            }
        });

        let millis = i32::try_from(delay.as_millis()).unwrap_or(i32::MAX);
        match window.set_timeout_with_callback_and_timeout_and_arguments_0(
            callback.as_ref().unchecked_ref(),
            millis,
        ) {
            Ok(timeout_id) => {
                self.timers.borrow_mut().slots.insert(
                    id,
                    Slot {
                        timeout_id,
                        _callback: callback,
                    },
                );
            }
            Err(err) => warn!(error = ?err, "setTimeout failed"),
        }
        handle
    }

    fn cancel(&self, handle: TaskHandle) {
        let slot = self.timers.borrow_mut().slots.remove(&handle.0);
        if let (Some(slot), Some(window)) = (slot, web_sys::window()) {
            window.clear_timeout_with_handle(slot.timeout_id);
        }
    }
}

#[cfg(test)]
mod wasm_tests {
    use super::*;
    use futures::channel::oneshot;
    use std::cell::Cell;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    async fn test_task_runs_once_and_slot_is_freed() {
        let scheduler = TimeoutScheduler::new();
        let (tx, rx) = oneshot::channel();
        scheduler.schedule(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert_eq!(scheduler.pending(), 1);
        rx.await.unwrap();
        assert_eq!(scheduler.pending(), 0);
    }

    #[wasm_bindgen_test]
    async fn test_cancelled_task_never_runs() {
        let scheduler = TimeoutScheduler::new();
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let handle = scheduler.schedule(Duration::from_millis(5), Box::new(move || flag.set(true)));
        scheduler.cancel(handle);
        assert_eq!(scheduler.pending(), 0);

        let (tx, rx) = oneshot::channel();
        scheduler.schedule(
            Duration::from_millis(20),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        rx.await.unwrap();
        assert!(!ran.get());
    }
}
