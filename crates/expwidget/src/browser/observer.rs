//! `IntersectionObserver` binding.

use expwidget_core::{ElementId, ElementObserver, Intersection};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Element, IntersectionObserver, IntersectionObserverEntry, IntersectionObserverInit};

/// Maps the surface's element ids to DOM elements. Clones share the map.
#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    elements: Rc<RefCell<HashMap<ElementId, Element>>>,
}

impl ElementRegistry {
    /// Make `element` addressable as `id`.
    pub fn register(&self, id: ElementId, element: Element) {
        self.elements.borrow_mut().insert(id, element);
    }

    /// Forget `id`.
    pub fn unregister(&self, id: ElementId) {
        self.elements.borrow_mut().remove(&id);
    }

    /// Element registered as `id`.
    #[must_use]
    pub fn get(&self, id: ElementId) -> Option<Element> {
        self.elements.borrow().get(&id).cloned()
    }

    /// Id of a registered element.
    #[must_use]
    pub fn id_of(&self, element: &Element) -> Option<ElementId> {
        self.elements
            .borrow()
            .iter()
            .find(|(_, candidate)| candidate.is_same_node(Some(element)))
            .map(|(id, _)| *id)
    }
}

type EntriesCallback = Closure<dyn FnMut(js_sys::Array, IntersectionObserver)>;

/// [`ElementObserver`] backed by one `IntersectionObserver`.
pub struct ViewportObserver {
    registry: ElementRegistry,
    observer: Option<IntersectionObserver>,
    callback: Option<EntriesCallback>,
}

impl ViewportObserver {
    /// Observer resolving element ids through `registry`.
    #[must_use]
    pub fn new(registry: ElementRegistry) -> Self {
        Self {
            registry,
            observer: None,
            callback: None,
        }
    }

    fn to_intersection(registry: &ElementRegistry, entry: &JsValue) -> Option<Intersection> {
        let entry = entry.dyn_ref::<IntersectionObserverEntry>()?;
        let element = registry.id_of(&entry.target())?;
        Some(Intersection {
            element,
            is_intersecting: entry.is_intersecting(),
            ratio: entry.intersection_ratio(),
        })
    }
}

impl ElementObserver for ViewportObserver {
    fn connect(&mut self, threshold: f64, callback: Box<dyn Fn(Intersection)>) {
        self.disconnect();

        let registry = self.registry.clone();
        let closure: EntriesCallback = Closure::new(move |entries: js_sys::Array, _| {
            for entry in entries.iter() {
                if let Some(intersection) = Self::to_intersection(&registry, &entry) {
                    callback(intersection);
                }
            }
        });

        let options = IntersectionObserverInit::new();
        options.set_threshold(&JsValue::from_f64(threshold));
        match IntersectionObserver::new_with_options(closure.as_ref().unchecked_ref(), &options) {
            Ok(observer) => {
                self.observer = Some(observer);
                self.callback = Some(closure);
                debug!(threshold, "intersection observer connected");
            }
            Err(err) => warn!(error = ?err, "IntersectionObserver unavailable"),
        }
    }

    fn observe(&mut self, element: ElementId) {
        let (Some(observer), Some(target)) = (&self.observer, self.registry.get(element)) else {
            return;
        };
        observer.observe(&target);
    }

    fn unobserve(&mut self, element: ElementId) {
        let (Some(observer), Some(target)) = (&self.observer, self.registry.get(element)) else {
            return;
        };
        observer.unobserve(&target);
    }

    fn disconnect(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.disconnect();
        }
        self.callback = None;
    }
}

impl Drop for ViewportObserver {
    fn drop(&mut self) {
        self.disconnect();
    }
}
