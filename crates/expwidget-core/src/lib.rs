//! Platform-independent core of the embeddable experiment widget.
//!
//! On every load the widget decides whether to show a cached creative right
//! away, asks the experiment service for the real assignment, and reconciles
//! the two without flicker or duplicate telemetry:
//! - Identifiers and payloads: [`CreativeId`], [`Creative`], [`extract_assignment`]
//! - Caching: [`CreativeCache`], [`CacheKey`]
//! - Reconciliation: [`Reconciler`], [`Phase`]
//! - Impressions and clicks: [`VisibilityTracker`], [`ImpressionSender`], [`ClickReporter`]
//! - Orchestration: [`Widget`], [`Platform`], [`InstanceSlot`]
//!
//! Everything that touches the browser sits behind a trait ([`KeyValueStore`],
//! [`Clock`], [`Transport`], [`Scheduler`], [`ElementObserver`],
//! [`RenderSurface`]). In-memory implementations live in `testing`, behind
//! the `testing` feature.

pub mod cache;
pub mod clock;
pub mod config;
pub mod creative;
pub mod identity;
pub mod instance;
pub mod reconciler;
pub mod scheduler;
pub mod storage;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracker;
pub mod transport;
pub mod view;
pub mod widget;

pub use cache::{CacheKey, CreativeCache, Freshness, StalePolicy, StoredEntry, CACHE_PREFIX};
#[cfg(not(target_arch = "wasm32"))]
pub use clock::SystemClock;
pub use clock::{Clock, ManualClock};
pub use config::{ConfigError, WidgetConfig, DEFAULT_CACHE_TTL};
pub use creative::{extract_assignment, Assignment, Creative, CreativeId};
pub use identity::{random_user_key, AnonId, ANON_ID_KEY};
pub use instance::{InstallError, InstanceSlot};
pub use reconciler::{AssignRequest, Begin, Phase, Reconciler, Rendered};
pub use scheduler::{ManualScheduler, Scheduler, Task, TaskHandle};
pub use storage::{KeyValueStore, MemoryStore, StorageError};
pub use telemetry::{ClickReporter, ImpressionSender};
pub use tracker::{
    ElementObserver, ImpressionSink, Intersection, VisibilityTracker, DWELL_TIME,
    IMPRESSION_THRESHOLD,
};
pub use transport::{creative_payload, encode_uri_component, Endpoints, Transport, TransportError};
pub use view::{
    CreativeView, ElementId, RenderSurface, Status, Thumbnail, DEFAULT_CTA, DEFAULT_SUBTITLE,
    PLACEHOLDER_GRADIENT,
};
pub use widget::{Platform, Services, WeakWidget, Widget, TOAST_DURATION, TOAST_MESSAGE};
