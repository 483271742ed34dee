//! Widget orchestration.
//!
//! A [`Widget`] wires one reconciler, one visibility tracker and one click
//! reporter to the collaborators supplied by a [`Platform`]. It owns the
//! panel and toast state and is torn down by [`Widget::destroy`].

use crate::clock::Clock;
use crate::config::WidgetConfig;
use crate::creative::Creative;
use crate::identity::AnonId;
use crate::reconciler::{Phase, Reconciler, Rendered};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::storage::KeyValueStore;
use crate::telemetry::{ClickReporter, ImpressionSender};
use crate::tracker::{ElementObserver, VisibilityTracker};
use crate::transport::{Endpoints, Transport};
use crate::view::RenderSurface;
use futures::task::{LocalSpawn, LocalSpawnExt};
use std::cell::RefCell;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Toast shown after a card click.
pub const TOAST_MESSAGE: &str = "Click collected for A/B experiment. Thanks for your feedback.";

/// How long the toast stays up.
pub const TOAST_DURATION: Duration = Duration::from_millis(1800);

/// Collaborator types for one environment.
pub trait Platform: 'static {
    /// Persistent key/value storage
    type Store: KeyValueStore + Clone + 'static;
    /// Wall clock
    type Clock: Clock + Clone + 'static;
    /// Experiment service client
    type Transport: Transport + Clone + 'static;
    /// Delayed tasks
    type Scheduler: Scheduler + Clone + 'static;
    /// Viewport intersection source
    type Observer: ElementObserver + 'static;
    /// Display
    type Surface: RenderSurface + 'static;
    /// Runs background futures on the current thread
    type Spawner: LocalSpawn + Clone + 'static;
}

/// Collaborator instances handed to [`Widget::new`].
pub struct Services<P: Platform> {
    /// Persistent key/value storage
    pub store: P::Store,
    /// Wall clock
    pub clock: P::Clock,
    /// Experiment service client
    pub transport: P::Transport,
    /// Delayed tasks
    pub scheduler: P::Scheduler,
    /// Viewport intersection source
    pub observer: P::Observer,
    /// Display
    pub surface: P::Surface,
    /// Background futures
    pub spawner: P::Spawner,
}

#[derive(Debug, Default)]
struct UiState {
    panel_open: bool,
    toast_timer: Option<TaskHandle>,
    destroyed: bool,
}

struct Inner<P: Platform> {
    config: WidgetConfig,
    anon_id: AnonId,
    reconciler: RefCell<Reconciler<P::Store, P::Clock>>,
    surface: RefCell<P::Surface>,
    tracker: VisibilityTracker<P::Scheduler, P::Observer>,
    clicks: ClickReporter<P::Transport>,
    transport: P::Transport,
    scheduler: P::Scheduler,
    spawner: P::Spawner,
    ui: RefCell<UiState>,
}

/// One embedded experiment widget. Clones are handles to the same widget.
pub struct Widget<P: Platform> {
    inner: Rc<Inner<P>>,
}

impl<P: Platform> Clone for Widget<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Non-owning handle, for event listeners owned by the surface.
pub struct WeakWidget<P: Platform> {
    inner: Weak<Inner<P>>,
}

impl<P: Platform> Clone for WeakWidget<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<P: Platform> WeakWidget<P> {
    /// The widget, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Widget<P>> {
        self.inner.upgrade().map(|inner| Widget { inner })
    }
}

impl<P: Platform> Widget<P> {
    /// Build a widget. Loads or creates the anonymous id; does not render.
    pub fn new(config: WidgetConfig, services: Services<P>) -> Self {
        let Services {
            store,
            clock,
            transport,
            scheduler,
            observer,
            surface,
            spawner,
        } = services;

        let anon_id = AnonId::load_or_create(&store, &clock);
        let endpoints = Endpoints::new(config.experiment_id());
        let reconciler = Reconciler::new(&config, &anon_id, store, clock);
        let impressions =
            ImpressionSender::new(transport.clone(), spawner.clone(), endpoints.clone());
        let tracker = VisibilityTracker::new(scheduler.clone(), observer, Rc::new(impressions));
        let clicks = ClickReporter::new(transport.clone(), endpoints);

        info!(
            experiment_id = config.experiment_id(),
            random_assignment = config.random_assignment(),
            caching = config.caching_enabled(),
            "widget created"
        );

        Self {
            inner: Rc::new(Inner {
                config,
                anon_id,
                reconciler: RefCell::new(reconciler),
                surface: RefCell::new(surface),
                tracker,
                clicks,
                transport,
                scheduler,
                spawner,
                ui: RefCell::default(),
            }),
        }
    }

    /// Run the assignment cycle in the background.
    pub fn start(&self) {
        if let Err(err) = self.inner.spawner.spawn_local(self.assign()) {
            warn!(error = %err, "could not start assignment");
        }
    }

    /// The assignment cycle: optimistic cached render, network request,
    /// reconciliation, then image prefetch. Only the first call does anything.
    pub fn assign(&self) -> impl Future<Output = ()> + 'static {
        let inner = Rc::clone(&self.inner);
        async move { inner.assign().await }
    }

    /// Card click: report it and show the toast. Ignored without a creative.
    pub fn handle_card_click(&self) -> bool {
        self.inner.handle_card_click()
    }

    /// Open, close (`Some`) or flip (`None`) the panel. Returns the new state.
    pub fn toggle_panel(&self, open: Option<bool>) -> bool {
        let open = {
            let mut ui = self.inner.ui.borrow_mut();
            if ui.destroyed {
                return ui.panel_open;
            }
            ui.panel_open = open.unwrap_or(!ui.panel_open);
            ui.panel_open
        };
        self.inner.surface.borrow_mut().set_panel_open(open);
        open
    }

    /// Tear down: cancel timers, stop tracking, remove the UI. Idempotent;
    /// an in-flight assignment finishes without touching the screen or cache.
    pub fn destroy(&self) {
        let toast_timer = {
            let mut ui = self.inner.ui.borrow_mut();
            if ui.destroyed {
                return;
            }
            ui.destroyed = true;
            ui.toast_timer.take()
        };
        if let Some(handle) = toast_timer {
            self.inner.scheduler.cancel(handle);
        }
        self.inner.tracker.destroy();
        self.inner.surface.borrow_mut().unmount();
        info!(experiment_id = self.inner.config.experiment_id(), "widget destroyed");
    }

    /// Non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakWidget<P> {
        WeakWidget {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &WidgetConfig {
        &self.inner.config
    }

    /// Anonymous id of this browser.
    #[must_use]
    pub fn anon_id(&self) -> &AnonId {
        &self.inner.anon_id
    }

    /// Assignment phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.reconciler.borrow().phase()
    }

    /// Creative on screen.
    #[must_use]
    pub fn current_creative(&self) -> Option<Creative> {
        self.inner.reconciler.borrow().current_creative().cloned()
    }

    /// Whether the panel is open.
    #[must_use]
    pub fn panel_open(&self) -> bool {
        self.inner.ui.borrow().panel_open
    }

    /// Whether [`destroy`](Self::destroy) has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// The impression tracker.
    #[must_use]
    pub fn tracker(&self) -> &VisibilityTracker<P::Scheduler, P::Observer> {
        &self.inner.tracker
    }
}

impl<P: Platform> Inner<P> {
    fn is_destroyed(&self) -> bool {
        self.ui.borrow().destroyed
    }

    fn track(&self, rendered: Option<Rendered>) {
        if let Some(rendered) = rendered {
            self.tracker.track(rendered.element, rendered.creative_id);
        }
    }

    async fn assign(self: Rc<Self>) {
        if self.is_destroyed() {
            return;
        }

        let begin = {
            let mut surface = self.surface.borrow_mut();
            self.reconciler.borrow_mut().begin(&mut *surface)
        };
        let Some(begin) = begin else {
            debug!("assignment already started");
            return;
        };
        self.track(begin.rendered);

        debug!(path = %begin.request.path, "requesting assignment");
        let response = self.transport.get(&begin.request.path).await;

        if self.is_destroyed() {
            debug!("widget destroyed while assignment was in flight");
            return;
        }

        let rendered = {
            let mut surface = self.surface.borrow_mut();
            self.reconciler.borrow_mut().resolve(response, &mut *surface)
        };
        self.track(rendered);

        self.prefetch_image().await;
    }

    async fn prefetch_image(&self) {
        let candidate = self.reconciler.borrow().image_to_prefetch();
        let Some((key, url)) = candidate else {
            return;
        };

        match self.transport.fetch_image_data(&url).await {
            Ok(data_url) => {
                if self.is_destroyed() {
                    return;
                }
                self.reconciler.borrow().store_image(&key, &url, &data_url);
                debug!(url = %url, "image cached");
            }
            Err(err) => debug!(url = %url, error = %err, "image prefetch failed"),
        }
    }

    fn handle_card_click(self: &Rc<Self>) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let creative_id = self
            .reconciler
            .borrow()
            .current_creative()
            .map(|c| c.id.clone());
        let Some(creative_id) = creative_id else {
            debug!("click ignored, no creative on screen");
            return false;
        };

        self.clicks.track(&creative_id);
        self.show_toast();
        true
    }

    fn show_toast(self: &Rc<Self>) {
        let previous = self.ui.borrow_mut().toast_timer.take();
        if let Some(handle) = previous {
            self.scheduler.cancel(handle);
        }

        self.surface.borrow_mut().show_toast(TOAST_MESSAGE);

        let weak = Rc::downgrade(self);
        let handle = self.scheduler.schedule(
            TOAST_DURATION,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.hide_toast();
                }
            }),
        );
        self.ui.borrow_mut().toast_timer = Some(handle);
    }

    fn hide_toast(&self) {
        {
            let mut ui = self.ui.borrow_mut();
            ui.toast_timer = None;
            if ui.destroyed {
                return;
            }
        }
        self.surface.borrow_mut().hide_toast();
    }
}
