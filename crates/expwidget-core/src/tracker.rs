//! Impression visibility tracking.
//!
//! An impression counts once at least half of the creative element has been
//! visible for [`DWELL_TIME`] without interruption. Each canonical creative
//! identifier is reported at most once per tracker.

use crate::creative::CreativeId;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::view::ElementId;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Visible fraction that counts as "in view".
pub const IMPRESSION_THRESHOLD: f64 = 0.5;

/// Continuous visibility required before an impression is sent.
pub const DWELL_TIME: Duration = Duration::from_millis(500);

/// One intersection observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// Observed element
    pub element: ElementId,
    /// Whether the element intersects the viewport at all
    pub is_intersecting: bool,
    /// Visible fraction, 0.0 to 1.0
    pub ratio: f64,
}

impl Intersection {
    /// Whether this observation meets [`IMPRESSION_THRESHOLD`].
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.is_intersecting && self.ratio >= IMPRESSION_THRESHOLD
    }
}

/// Viewport intersection source (an `IntersectionObserver` in the browser).
pub trait ElementObserver {
    /// Start delivering observations crossing `threshold` to `callback`.
    fn connect(&mut self, threshold: f64, callback: Box<dyn Fn(Intersection)>);

    /// Watch an element.
    fn observe(&mut self, element: ElementId);

    /// Stop watching an element.
    fn unobserve(&mut self, element: ElementId);

    /// Stop watching everything.
    fn disconnect(&mut self);
}

/// Receives impressions once they qualify.
pub trait ImpressionSink {
    /// Report an impression. Must not block.
    fn send_impression(&self, creative_id: &CreativeId);
}

#[derive(Default)]
struct TrackerState {
    sent: HashSet<CreativeId>,
    observed: HashMap<ElementId, CreativeId>,
    timers: HashMap<ElementId, TaskHandle>,
    connected: bool,
    destroyed: bool,
}

struct Inner<S, O> {
    state: RefCell<TrackerState>,
    scheduler: S,
    observer: RefCell<O>,
    sink: Rc<dyn ImpressionSink>,
}

/// Dwell-time impression tracker. Clones share state.
pub struct VisibilityTracker<S, O> {
    inner: Rc<Inner<S, O>>,
}

impl<S, O> Clone for VisibilityTracker<S, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S, O> VisibilityTracker<S, O>
where
    S: Scheduler + 'static,
    O: ElementObserver + 'static,
{
    /// Create a tracker. The observer is connected on the first [`track`](Self::track).
    pub fn new(scheduler: S, observer: O, sink: Rc<dyn ImpressionSink>) -> Self {
        Self {
            inner: Rc::new(Inner {
                state: RefCell::default(),
                scheduler,
                observer: RefCell::new(observer),
                sink,
            }),
        }
    }

    /// Watch `element`, which shows `creative_id`.
    ///
    /// Re-tracking an element with another identifier cancels its pending
    /// dwell timer and restarts observation.
    pub fn track(&self, element: ElementId, creative_id: CreativeId) {
        let (needs_connect, retracked, stale_timer) = {
            let mut state = self.inner.state.borrow_mut();
            if state.destroyed {
                return;
            }
            let previous = state.observed.insert(element, creative_id.clone());
            let stale_timer = match &previous {
                Some(prev) if *prev != creative_id => state.timers.remove(&element),
                _ => None,
            };
            let needs_connect = !state.connected;
            state.connected = true;
            (needs_connect, previous.is_some(), stale_timer)
        };

        if let Some(handle) = stale_timer {
            self.inner.scheduler.cancel(handle);
        }

        let mut observer = self.inner.observer.borrow_mut();
        if needs_connect {
            let weak = Rc::downgrade(&self.inner);
            observer.connect(
                IMPRESSION_THRESHOLD,
                Box::new(move |entry| {
                    if let Some(inner) = weak.upgrade() {
                        Inner::on_intersection(&inner, entry);
                    }
                }),
            );
        }
        if retracked {
            observer.unobserve(element);
        }
        observer.observe(element);
        debug!(element = element.0, creative_id = %creative_id, "tracking visibility");
    }

    /// Feed one observation. The observer callback calls this.
    pub fn on_intersection(&self, entry: Intersection) {
        Inner::on_intersection(&self.inner, entry);
    }

    /// Stop observing and cancel every pending timer. Idempotent.
    pub fn destroy(&self) {
        let timers: Vec<TaskHandle> = {
            let mut state = self.inner.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.observed.clear();
            state.timers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in timers {
            self.inner.scheduler.cancel(handle);
        }
        self.inner.observer.borrow_mut().disconnect();
        debug!("visibility tracker destroyed");
    }

    /// Whether an impression for `creative_id` was sent.
    #[must_use]
    pub fn has_sent(&self, creative_id: &CreativeId) -> bool {
        self.inner.state.borrow().sent.contains(creative_id)
    }

    /// Number of impressions sent.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.inner.state.borrow().sent.len()
    }

    /// Number of running dwell timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.state.borrow().timers.len()
    }

    /// Whether [`destroy`](Self::destroy) ran.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.borrow().destroyed
    }
}

impl<S, O> Inner<S, O>
where
    S: Scheduler + 'static,
    O: ElementObserver + 'static,
{
    fn on_intersection(this: &Rc<Self>, entry: Intersection) {
        let element = entry.element;

        if !entry.is_visible() {
            let cancelled = this.state.borrow_mut().timers.remove(&element);
            if let Some(handle) = cancelled {
                this.scheduler.cancel(handle);
            }
            return;
        }

        {
            let state = this.state.borrow();
            if state.destroyed || state.timers.contains_key(&element) {
                return;
            }
            match state.observed.get(&element) {
                Some(id) if !state.sent.contains(id) => {}
                _ => return,
            }
        }

        let weak: Weak<Self> = Rc::downgrade(this);
        let handle = this.scheduler.schedule(
            DWELL_TIME,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire(element);
                }
            }),
        );
        this.state.borrow_mut().timers.insert(element, handle);
    }

    fn fire(&self, element: ElementId) {
        let creative_id = {
            let mut state = self.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.timers.remove(&element);
            let Some(id) = state.observed.get(&element).cloned() else {
                return;
            };
            if !state.sent.insert(id.clone()) {
                return;
            }
            id
        };

        info!(creative_id = %creative_id, "impression qualified");
        self.sink.send_impression(&creative_id);
    }
}
