//! WASM entry point: boots the widget from its script tag.

use super::{
    BootError, BrowserPlatform, DateClock, ElementRegistry, FetchTransport, LocalStorage,
    ShadowSurface, TimeoutScheduler, UiAction, ViewportObserver, WasmSpawner,
};
use expwidget_core::config::ATTRIBUTES;
use expwidget_core::{InstallError, InstanceSlot, Services, WeakWidget, Widget, WidgetConfig};
use std::cell::OnceCell;
use std::rc::Rc;
use tracing::{error, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element};

thread_local! {
    static ACTIVE: InstanceSlot<Widget<BrowserPlatform>> = const { InstanceSlot::new() };
}

/// Module start: install panic and log hooks, then boot.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    let _ = tracing_wasm::try_set_as_global_default();

    if let Err(err) = boot() {
        error!(error = %err, "experiment widget not started");
    }
}

/// Tear down the active widget, if any.
#[wasm_bindgen]
pub fn destroy() {
    if let Some(widget) = ACTIVE.with(InstanceSlot::take) {
        widget.destroy();
    }
}

/// Whether a widget is mounted on this page.
#[wasm_bindgen(js_name = isActive)]
#[must_use]
pub fn is_active() -> bool {
    ACTIVE.with(InstanceSlot::is_active)
}

fn document() -> Result<Document, BootError> {
    web_sys::window()
        .ok_or(BootError::NoWindow)?
        .document()
        .ok_or(BootError::NoDocument)
}

/// The configuring tag. Module scripts have no `currentScript`.
fn script_tag(document: &Document) -> Result<Element, BootError> {
    if let Some(script) = document.current_script() {
        return Ok(script.into());
    }
    document
        .query_selector("script[data-experiment-id]")?
        .ok_or(BootError::NoScriptTag)
}

fn read_config(script: &Element) -> Result<WidgetConfig, BootError> {
    let attributes: Vec<(&str, String)> = ATTRIBUTES
        .iter()
        .filter_map(|name| script.get_attribute(name).map(|value| (*name, value)))
        .collect();
    let config =
        WidgetConfig::from_attributes(attributes.iter().map(|(name, value)| (*name, value.as_str())))?;
    Ok(config)
}

/// `document.readyState` before `DOMContentLoaded`.
fn is_loading(ready_state: &str) -> bool {
    ready_state == "loading"
}

fn boot() -> Result<(), BootError> {
    let document = document()?;
    let config = read_config(&script_tag(&document)?)?;

    if is_loading(&document.ready_state()) {
        let on_ready = Closure::once_into_js(move || mount(config));
        document.add_event_listener_with_callback("DOMContentLoaded", on_ready.unchecked_ref())?;
    } else {
        mount(config);
    }
    Ok(())
}

fn mount(config: WidgetConfig) {
    let experiment_id = config.experiment_id().to_string();
    let result = ACTIVE.with(|slot| {
        slot.install_with(|| create(config))
            .map(|()| slot.with(Widget::start))
    });
    match result {
        Ok(_) => info!(experiment_id, "experiment widget mounted"),
        Err(InstallError::AlreadyActive) => {
            warn!(experiment_id, "experiment widget already active, skipping");
        }
        Err(InstallError::Failed(err)) => error!(experiment_id, error = %err, "mount failed"),
    }
}

fn create(config: WidgetConfig) -> Result<Widget<BrowserPlatform>, BootError> {
    let document = document()?;
    let registry = ElementRegistry::default();

    let target: Rc<OnceCell<WeakWidget<BrowserPlatform>>> = Rc::default();
    let dispatch = Rc::clone(&target);
    let surface = ShadowSurface::mount(
        &document,
        registry.clone(),
        Rc::new(move |action| {
            let Some(widget) = dispatch.get().and_then(WeakWidget::upgrade) else {
                return;
            };
            match action {
                UiAction::Badge => {
                    widget.toggle_panel(Some(true));
                }
                UiAction::Toggle => {
                    widget.toggle_panel(None);
                }
                UiAction::Card => {
                    widget.handle_card_click();
                }
            }
        }),
    )?;

    let transport = FetchTransport::new(config.api_base());
    let widget = Widget::new(
        config,
        Services {
            store: LocalStorage::new(),
            clock: DateClock,
            transport,
            scheduler: TimeoutScheduler::new(),
            observer: ViewportObserver::new(registry),
            surface,
            spawner: WasmSpawner,
        },
    );
    let _ = target.set(widget.downgrade());
    Ok(widget)
}

#[cfg(test)]
mod wasm_tests {
    use super::*;
    use crate::browser::surface::HOST_ID;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    fn script(attributes: &[(&str, &str)]) -> Element {
        let script = document().unwrap().create_element("script").unwrap();
        for (name, value) in attributes {
            script.set_attribute(name, value).unwrap();
        }
        script
    }

    #[wasm_bindgen_test]
    fn test_read_config_from_tag() {
        let tag = script(&[
            ("data-api-base", "https://api.example.com"),
            ("data-experiment-id", "exp_1"),
            ("data-random-assignment", "true"),
            ("data-cache-ttl", "1000"),
            ("data-unrelated", "x"),
        ]);
        let config = read_config(&tag).unwrap();
        assert_eq!(config.experiment_id(), "exp_1");
        assert!(config.random_assignment());
        assert_eq!(config.cache_ttl().as_millis(), 1000);
    }

    #[wasm_bindgen_test]
    fn test_ready_state_checks() {
        assert!(is_loading("loading"));
        assert!(!is_loading("interactive"));
        assert!(!is_loading("complete"));
        // the test page has finished parsing
        assert!(!is_loading(&document().unwrap().ready_state()));
    }

    #[wasm_bindgen_test]
    fn test_read_config_missing_experiment() {
        let tag = script(&[("data-api-base", "https://api.example.com")]);
        assert!(matches!(read_config(&tag), Err(BootError::Config(_))));
    }

    #[wasm_bindgen_test]
    fn test_mount_once_then_destroy() {
        let config = WidgetConfig::new("http://127.0.0.1:1", "exp_app_test").unwrap();
        mount(config.clone());
        assert!(is_active());
        let host = document().unwrap().get_element_by_id(HOST_ID);
        assert!(host.is_some());

        mount(config);
        destroy();
        assert!(!is_active());
        assert!(document()
            .unwrap()
            .get_element_by_id(HOST_ID)
            .is_none());
    }
}
