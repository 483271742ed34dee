//! Assignment reconciliation.
//!
//! One cycle per widget: [`Reconciler::begin`] shows the fresh cached
//! creative (or the loading status) and returns the request to issue, and
//! [`Reconciler::resolve`] folds the network result into what is on screen
//! and in the cache. The network result always has the final word.

use crate::cache::{CacheKey, CreativeCache, StalePolicy};
use crate::clock::Clock;
use crate::config::WidgetConfig;
use crate::creative::{extract_assignment, Assignment, Creative, CreativeId};
use crate::identity::{random_user_key, AnonId};
use crate::storage::KeyValueStore;
use crate::transport::{Endpoints, TransportError};
use crate::view::{CreativeView, ElementId, RenderSurface, Status};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Where the assignment cycle stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not started
    Idle,
    /// Fresh cached creative on screen, request in flight
    ShowingCached,
    /// Loading status on screen, request in flight
    Assigning,
    /// Network agreed with the cache; timestamp refreshed
    ReconciledNoChange,
    /// Network creative rendered and cached
    ReconciledChanged,
    /// The service assigned nothing
    NoCreative,
    /// Request failed and nothing could be shown
    FailedNoFallback,
    /// Request failed; an earlier creative stays on screen
    FailedWithStaleFallback,
}

impl Phase {
    /// Whether a request is in flight.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::ShowingCached | Self::Assigning)
    }
}

/// A creative that was put on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Element showing it
    pub element: ElementId,
    /// Canonical identifier
    pub creative_id: CreativeId,
}

/// The assignment request to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignRequest {
    /// Path relative to the API base
    pub path: String,
    /// User key sent with the request
    pub user_key: String,
}

/// Outcome of [`Reconciler::begin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Begin {
    /// Request to issue
    pub request: AssignRequest,
    /// Cached creative rendered optimistically, if any
    pub rendered: Option<Rendered>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UserKey {
    /// New random key per request
    Random,
    /// Configured user key or the anonymous id
    Fixed(String),
}

/// Cache-first assignment state machine.
#[derive(Debug)]
pub struct Reconciler<S, C> {
    cache: CreativeCache<S, C>,
    cache_key: Option<CacheKey>,
    endpoints: Endpoints,
    user_key: UserKey,
    phase: Phase,
    /// Creative currently on screen
    current: Option<Creative>,
    has_cached_render: bool,
}

impl<S: KeyValueStore, C: Clock> Reconciler<S, C> {
    /// Create the reconciler for one widget.
    pub fn new(config: &WidgetConfig, anon_id: &AnonId, store: S, clock: C) -> Self {
        let stable_key = config.user_key().unwrap_or_else(|| anon_id.as_str());
        let cache_key = CreativeCache::<S, C>::should_use_cache(config)
            .then(|| CacheKey::derive(config.experiment_id(), stable_key));
        let user_key = if config.random_assignment() {
            UserKey::Random
        } else {
            UserKey::Fixed(stable_key.to_string())
        };

        Self {
            cache: CreativeCache::new(store, clock, config.cache_ttl()),
            cache_key,
            endpoints: Endpoints::new(config.experiment_id()),
            user_key,
            phase: Phase::Idle,
            current: None,
            has_cached_render: false,
        }
    }

    /// Start the cycle.
    ///
    /// Renders the fresh cached creative when there is one, the loading
    /// status otherwise. Returns `None` if the cycle already started.
    pub fn begin<R: RenderSurface + ?Sized>(&mut self, surface: &mut R) -> Option<Begin> {
        if self.phase != Phase::Idle {
            return None;
        }

        let cached = self
            .cache_key
            .as_ref()
            .and_then(|key| self.cache.load(key, StalePolicy::Evict));

        let rendered = if let Some(creative) = cached {
            debug!(creative_id = %creative.id, "rendering cached creative");
            let rendered = self.render(creative, surface);
            self.has_cached_render = true;
            self.phase = Phase::ShowingCached;
            Some(rendered)
        } else {
            surface.show_status(&Status::Assigning);
            self.phase = Phase::Assigning;
            None
        };

        let user_key = match &self.user_key {
            UserKey::Random => random_user_key(self.cache.clock().now_ms()),
            UserKey::Fixed(key) => key.clone(),
        };
        let request = AssignRequest {
            path: self.endpoints.assign(&user_key),
            user_key,
        };
        Some(Begin { request, rendered })
    }

    /// Fold the assignment response into the screen and the cache.
    ///
    /// Returns the creative rendered by this call, if any. Calls outside a
    /// pending cycle are ignored.
    pub fn resolve<R: RenderSurface + ?Sized>(
        &mut self,
        response: Result<Value, TransportError>,
        surface: &mut R,
    ) -> Option<Rendered> {
        if !self.phase.is_pending() {
            warn!(phase = ?self.phase, "assignment result outside a pending cycle");
            return None;
        }

        match response {
            Ok(body) => self.apply(extract_assignment(&body), surface),
            Err(err) => self.fall_back(&err, surface),
        }
    }

    fn apply<R: RenderSurface + ?Sized>(
        &mut self,
        assignment: Assignment,
        surface: &mut R,
    ) -> Option<Rendered> {
        let creative = match assignment {
            Assignment::Creative(creative) => creative,
            Assignment::Empty { message } => {
                info!(message = ?message, "no creative assigned");
                surface.show_status(&Status::NoCreative(message));
                self.current = None;
                self.has_cached_render = false;
                self.phase = Phase::NoCreative;
                return None;
            }
        };

        if self.current.as_ref().is_some_and(|shown| shown.same_as(&creative)) {
            debug!(creative_id = %creative.id, "assignment matches cached creative");
            if let Some(key) = &self.cache_key {
                self.cache.touch(key);
            }
            self.phase = Phase::ReconciledNoChange;
            return None;
        }

        info!(creative_id = %creative.id, "rendering assigned creative");
        if let Some(key) = &self.cache_key {
            self.cache.save(key, &creative);
        }
        self.has_cached_render = false;
        self.phase = Phase::ReconciledChanged;
        Some(self.render(creative, surface))
    }

    fn fall_back<R: RenderSurface + ?Sized>(
        &mut self,
        err: &TransportError,
        surface: &mut R,
    ) -> Option<Rendered> {
        if self.current.is_some() {
            warn!(error = %err, "assignment failed, keeping cached creative");
            self.has_cached_render = true;
            self.phase = Phase::FailedWithStaleFallback;
            return None;
        }

        let stale = self
            .cache_key
            .as_ref()
            .and_then(|key| self.cache.load(key, StalePolicy::Allow));

        if let Some(creative) = stale {
            warn!(error = %err, creative_id = %creative.id, "assignment failed, showing stale creative");
            let rendered = self.render(creative, surface);
            self.has_cached_render = true;
            self.phase = Phase::FailedWithStaleFallback;
            Some(rendered)
        } else {
            warn!(error = %err, "assignment failed");
            surface.show_status(&Status::Error(err.to_string()));
            self.phase = Phase::FailedNoFallback;
            None
        }
    }

    fn render<R: RenderSurface + ?Sized>(&mut self, creative: Creative, surface: &mut R) -> Rendered {
        let cached_image = match (&self.cache_key, &creative.image_url) {
            (Some(key), Some(url)) => self.cache.load_image(key, url, StalePolicy::Allow),
            _ => None,
        };
        let view = CreativeView::from_creative(&creative, cached_image);
        let element = surface.render_creative(&view);
        let creative_id = creative.id.clone();
        self.current = Some(creative);
        Rendered {
            element,
            creative_id,
        }
    }

    /// Image of the reconciled creative that should be fetched into the
    /// image cache: caching applies, the creative has an image and no fresh
    /// copy is stored.
    #[must_use]
    pub fn image_to_prefetch(&self) -> Option<(CacheKey, String)> {
        if !matches!(
            self.phase,
            Phase::ReconciledChanged | Phase::ReconciledNoChange
        ) {
            return None;
        }
        let key = self.cache_key.as_ref()?;
        let url = self
            .current
            .as_ref()?
            .image_url
            .as_ref()
            .filter(|u| !u.trim().is_empty())?;
        if self.cache.load_image(key, url, StalePolicy::Evict).is_some() {
            return None;
        }
        Some((key.clone(), url.clone()))
    }

    /// Store a fetched image.
    pub fn store_image(&self, key: &CacheKey, url: &str, data_url: &str) {
        self.cache.save_image(key, url, data_url);
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Creative currently on screen.
    #[must_use]
    pub const fn current_creative(&self) -> Option<&Creative> {
        self.current.as_ref()
    }

    /// Whether the creative on screen came from the cache rather than the
    /// network.
    #[must_use]
    pub const fn has_cached_render(&self) -> bool {
        self.has_cached_render
    }

    /// Cache key, `None` when caching does not apply.
    #[must_use]
    pub const fn cache_key(&self) -> Option<&CacheKey> {
        self.cache_key.as_ref()
    }

    /// The cache manager.
    #[must_use]
    pub const fn cache(&self) -> &CreativeCache<S, C> {
        &self.cache
    }
}
