//! In-memory collaborators for tests and native embedding.
//!
//! [`Harness`] wires them into a [`TestPlatform`] with a deterministic clock,
//! a manual scheduler and a single-threaded executor, so whole widget
//! lifecycles can be driven step by step.

use crate::clock::ManualClock;
use crate::config::WidgetConfig;
use crate::scheduler::ManualScheduler;
use crate::storage::MemoryStore;
use crate::tracker::{ElementObserver, Intersection};
use crate::transport::{Transport, TransportError};
use crate::view::{CreativeView, ElementId, RenderSurface, Status};
use crate::widget::{Platform, Services, Widget};
use futures::channel::oneshot;
use futures::executor::{LocalPool, LocalSpawner};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

/// Something a [`RecordingSurface`] was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    /// Status line shown
    Status(String),
    /// Creative rendered into an element
    Creative(CreativeView, ElementId),
    /// Panel opened or closed
    Panel(bool),
    /// Toast shown
    Toast(String),
    /// Toast hidden
    ToastHidden,
    /// UI removed
    Unmounted,
}

#[derive(Debug, Default)]
struct SurfaceLog {
    events: Vec<SurfaceEvent>,
    next_element: u64,
}

/// Surface that records every call. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    log: Rc<RefCell<SurfaceLog>>,
}

impl RecordingSurface {
    /// Empty recording.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded call, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.log.borrow().events.clone()
    }

    /// Titles of all rendered creatives, in order.
    #[must_use]
    pub fn titles(&self) -> Vec<String> {
        self.log
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                SurfaceEvent::Creative(view, _) => Some(view.title.clone()),
                _ => None,
            })
            .collect()
    }

    /// All status texts shown, in order.
    #[must_use]
    pub fn statuses(&self) -> Vec<String> {
        self.log
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                SurfaceEvent::Status(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of creative renders.
    #[must_use]
    pub fn render_count(&self) -> usize {
        self.titles().len()
    }

    /// The card content right now.
    #[must_use]
    pub fn content(&self) -> Option<SurfaceEvent> {
        self.log
            .borrow()
            .events
            .iter()
            .rev()
            .find(|e| matches!(e, SurfaceEvent::Status(_) | SurfaceEvent::Creative(..)))
            .cloned()
    }

    /// Title of the creative on the card, if the card shows one.
    #[must_use]
    pub fn current_title(&self) -> Option<String> {
        match self.content() {
            Some(SurfaceEvent::Creative(view, _)) => Some(view.title),
            _ => None,
        }
    }

    /// Status on the card, if the card shows one.
    #[must_use]
    pub fn status(&self) -> Option<String> {
        match self.content() {
            Some(SurfaceEvent::Status(text)) => Some(text),
            _ => None,
        }
    }

    /// Toast currently visible.
    #[must_use]
    pub fn toast(&self) -> Option<String> {
        self.log
            .borrow()
            .events
            .iter()
            .rev()
            .find_map(|e| match e {
                SurfaceEvent::Toast(text) => Some(Some(text.clone())),
                SurfaceEvent::ToastHidden | SurfaceEvent::Unmounted => Some(None),
                _ => None,
            })
            .flatten()
    }

    #[must_use]
    pub fn panel_open(&self) -> bool {
        self.log
            .borrow()
            .events
            .iter()
            .rev()
            .find_map(|e| match e {
                SurfaceEvent::Panel(open) => Some(*open),
                _ => None,
            })
            .unwrap_or(false)
    }

    #[must_use]
    pub fn is_unmounted(&self) -> bool {
        self.log
            .borrow()
            .events
            .iter()
            .any(|e| matches!(e, SurfaceEvent::Unmounted))
    }

    fn push(&self, event: SurfaceEvent) {
        self.log.borrow_mut().events.push(event);
    }
}

impl RenderSurface for RecordingSurface {
    fn show_status(&mut self, status: &Status) {
        self.push(SurfaceEvent::Status(status.text()));
    }

    fn render_creative(&mut self, view: &CreativeView) -> ElementId {
        let element = {
            let mut log = self.log.borrow_mut();
            log.next_element += 1;
            ElementId(log.next_element)
        };
        self.push(SurfaceEvent::Creative(view.clone(), element));
        element
    }

    fn set_panel_open(&mut self, open: bool) {
        self.push(SurfaceEvent::Panel(open));
    }

    fn show_toast(&mut self, message: &str) {
        self.push(SurfaceEvent::Toast(message.to_string()));
    }

    fn hide_toast(&mut self) {
        self.push(SurfaceEvent::ToastHidden);
    }

    fn unmount(&mut self) {
        self.push(SurfaceEvent::Unmounted);
    }
}

#[derive(Default)]
struct ObserverState {
    callback: Option<Rc<dyn Fn(Intersection)>>,
    threshold: Option<f64>,
    observed: BTreeSet<ElementId>,
    connects: usize,
    disconnected: bool,
}

/// Observer whose intersections are emitted by the test. Clones share state.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    state: Rc<RefCell<ObserverState>>,
}

impl RecordingObserver {
    /// Disconnected observer watching nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an observation for `element` at `ratio` visibility.
    ///
    /// Returns `false` (and delivers nothing) when the element is not
    /// observed or the observer is not connected.
    pub fn emit(&self, element: ElementId, ratio: f64) -> bool {
        let callback = {
            let state = self.state.borrow();
            if state.disconnected || !state.observed.contains(&element) {
                return false;
            }
            state.callback.clone()
        };
        let Some(callback) = callback else {
            return false;
        };
        callback(Intersection {
            element,
            is_intersecting: ratio > 0.0,
            ratio,
        });
        true
    }

    /// Threshold passed to `connect`.
    #[must_use]
    pub fn threshold(&self) -> Option<f64> {
        self.state.borrow().threshold
    }

    /// Currently observed elements.
    #[must_use]
    pub fn observed(&self) -> Vec<ElementId> {
        self.state.borrow().observed.iter().copied().collect()
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.borrow().connects
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.state.borrow().disconnected
    }
}

impl ElementObserver for RecordingObserver {
    fn connect(&mut self, threshold: f64, callback: Box<dyn Fn(Intersection)>) {
        let mut state = self.state.borrow_mut();
        state.callback = Some(Rc::from(callback));
        state.threshold = Some(threshold);
        state.connects += 1;
        state.disconnected = false;
    }

    fn observe(&mut self, element: ElementId) {
        self.state.borrow_mut().observed.insert(element);
    }

    fn unobserve(&mut self, element: ElementId) {
        self.state.borrow_mut().observed.remove(&element);
    }

    fn disconnect(&mut self) {
        let mut state = self.state.borrow_mut();
        state.disconnected = true;
        state.observed.clear();
        state.callback = None;
    }
}

type Reply = Result<Value, TransportError>;

enum Scripted {
    Ready(Reply),
    Deferred(oneshot::Receiver<Reply>),
}

struct TransportState {
    replies: VecDeque<Scripted>,
    gets: Vec<String>,
    posts: Vec<(String, Value)>,
    post_error: Option<TransportError>,
    beacons: Vec<(String, Value)>,
    accept_beacons: bool,
    images: HashMap<String, String>,
    image_fetches: Vec<String>,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            replies: VecDeque::new(),
            gets: Vec::new(),
            posts: Vec::new(),
            post_error: None,
            beacons: Vec::new(),
            accept_beacons: true,
            images: HashMap::new(),
            image_fetches: Vec::new(),
        }
    }
}

/// Transport answering GETs from a script and recording everything sent.
/// Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Rc<RefCell<TransportState>>,
}

impl ScriptedTransport {
    /// Transport with no scripted replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the reply to the next GET.
    pub fn reply(&self, reply: Reply) {
        self.state
            .borrow_mut()
            .replies
            .push_back(Scripted::Ready(reply));
    }

    /// Queue a GET reply the test sends later; the request stays pending
    /// until then. Dropping the sender fails the request.
    #[must_use]
    pub fn defer(&self) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        self.state
            .borrow_mut()
            .replies
            .push_back(Scripted::Deferred(rx));
        tx
    }

    /// Make every POST fail with `error`.
    pub fn fail_posts(&self, error: TransportError) {
        self.state.borrow_mut().post_error = Some(error);
    }

    /// Make `send_fire_and_forget` refuse requests.
    pub fn reject_beacons(&self) {
        self.state.borrow_mut().accept_beacons = false;
    }

    /// Serve `data_url` for image `url`.
    pub fn serve_image(&self, url: &str, data_url: &str) {
        self.state
            .borrow_mut()
            .images
            .insert(url.to_string(), data_url.to_string());
    }

    /// Paths of all GETs.
    #[must_use]
    pub fn gets(&self) -> Vec<String> {
        self.state.borrow().gets.clone()
    }

    /// All POSTs.
    #[must_use]
    pub fn posts(&self) -> Vec<(String, Value)> {
        self.state.borrow().posts.clone()
    }

    /// All accepted fire-and-forget requests.
    #[must_use]
    pub fn beacons(&self) -> Vec<(String, Value)> {
        self.state.borrow().beacons.clone()
    }

    /// URLs of all image fetches.
    #[must_use]
    pub fn image_fetches(&self) -> Vec<String> {
        self.state.borrow().image_fetches.clone()
    }
}

impl Transport for ScriptedTransport {
    async fn get(&self, path: &str) -> Result<Value, TransportError> {
        let scripted = {
            let mut state = self.state.borrow_mut();
            state.gets.push(path.to_string());
            state.replies.pop_front()
        };
        match scripted {
            Some(Scripted::Ready(reply)) => reply,
            Some(Scripted::Deferred(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(TransportError::Network("request aborted".into()))),
            None => Err(TransportError::Network("no scripted reply".into())),
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        let mut state = self.state.borrow_mut();
        state.posts.push((path.to_string(), body.clone()));
        match &state.post_error {
            Some(err) => Err(err.clone()),
            None => Ok(Value::Null),
        }
    }

    fn send_fire_and_forget(&self, path: &str, body: &Value) -> bool {
        let mut state = self.state.borrow_mut();
        if state.accept_beacons {
            state.beacons.push((path.to_string(), body.clone()));
        }
        state.accept_beacons
    }

    async fn fetch_image_data(&self, url: &str) -> Result<String, TransportError> {
        let mut state = self.state.borrow_mut();
        state.image_fetches.push(url.to_string());
        state
            .images
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                status: 404,
                status_text: "Not Found".into(),
            })
    }
}

/// [`Platform`] built from the in-memory collaborators.
#[derive(Debug)]
pub enum TestPlatform {}

impl Platform for TestPlatform {
    type Store = MemoryStore;
    type Clock = ManualClock;
    type Transport = ScriptedTransport;
    type Scheduler = ManualScheduler;
    type Observer = RecordingObserver;
    type Surface = RecordingSurface;
    type Spawner = LocalSpawner;
}

/// Deterministic environment for whole-widget tests.
pub struct Harness {
    /// Executor for background futures
    pub pool: LocalPool,
    pub store: MemoryStore,
    pub clock: ManualClock,
    pub scheduler: ManualScheduler,
    pub transport: ScriptedTransport,
    pub surface: RecordingSurface,
    pub observer: RecordingObserver,
}

impl Harness {
    /// Fresh environment with the clock at `now_ms`.
    #[must_use]
    pub fn new(now_ms: u64) -> Self {
        let clock = ManualClock::new(now_ms);
        Self {
            pool: LocalPool::new(),
            store: MemoryStore::new(),
            scheduler: ManualScheduler::new(clock.clone()),
            clock,
            transport: ScriptedTransport::new(),
            surface: RecordingSurface::new(),
            observer: RecordingObserver::new(),
        }
    }

    /// Collaborators sharing this harness's state.
    #[must_use]
    pub fn services(&self) -> Services<TestPlatform> {
        Services {
            store: self.store.clone(),
            clock: self.clock.clone(),
            transport: self.transport.clone(),
            scheduler: self.scheduler.clone(),
            observer: self.observer.clone(),
            surface: self.surface.clone(),
            spawner: self.pool.spawner(),
        }
    }

    /// Create a widget in this environment.
    #[must_use]
    pub fn widget(&self, config: WidgetConfig) -> Widget<TestPlatform> {
        Widget::new(config, self.services())
    }

    /// Run background futures until none can make progress.
    pub fn run(&mut self) {
        self.pool.run_until_stalled();
    }

    /// Advance time, firing due tasks, and let futures settle.
    pub fn advance(&mut self, ms: u64) {
        self.run();
        self.scheduler.advance(Duration::from_millis(ms));
        self.run();
    }
}
