//! Shadow-DOM render surface.
//!
//! The widget lives in a `#experiment-widget-root` host element with an open
//! shadow root, so host page styles never leak in. The layout is a floating
//! badge that opens a panel holding the status line or the creative card,
//! plus a toast for click feedback.

use expwidget_core::{CreativeView, Thumbnail, PLACEHOLDER_GRADIENT};

/// Id of the host element appended to `<body>`.
pub const HOST_ID: &str = "experiment-widget-root";

/// User interaction forwarded to the widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiAction {
    /// Badge clicked: open the panel
    Badge,
    /// Header toggle clicked: flip the panel
    Toggle,
    /// Creative card clicked
    Card,
}

/// Panel toggle button label.
#[must_use]
pub const fn toggle_label(open: bool) -> &'static str {
    if open {
        "Hide"
    } else {
        "Show"
    }
}

/// CSS `url(...)` value for an image source, quoted and escaped.
#[must_use]
pub fn css_url(src: &str) -> String {
    let mut out = String::with_capacity(src.len() + 7);
    out.push_str("url(\"");
    for ch in src.chars() {
        match ch {
            '"' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' | '\r' => {}
            other => out.push(other),
        }
    }
    out.push_str("\")");
    out
}

/// `background-image` and `background-size` for a thumbnail.
#[must_use]
pub fn thumbnail_style(thumbnail: &Thumbnail) -> (String, &'static str) {
    match thumbnail {
        Thumbnail::Image(src) => (css_url(src), "cover"),
        Thumbnail::Gradient => (PLACEHOLDER_GRADIENT.to_string(), "auto"),
    }
}

/// Text slots of the card, in `(title, meta, cta)` order.
#[must_use]
pub fn card_text(view: &CreativeView) -> (&str, &str, &str) {
    (view.title.as_str(), view.subtitle.as_str(), view.cta.as_str())
}

pub(crate) const MARKUP: &str = r#"
<div class="exp-widget-badge" data-role="badge" aria-label="A/B experiment ads">
  <span class="exp-widget-badge-icon">A/B</span>
  <span class="exp-widget-badge-label">Ads</span>
</div>
<div class="exp-widget-panel" data-role="panel">
  <div class="exp-widget-header">
    <div class="exp-widget-header-title">
      <span>Sponsored</span>
      <span class="exp-widget-chip">A/B Ads</span>
    </div>
    <button class="exp-widget-toggle" data-role="toggle">Hide</button>
  </div>
  <div class="exp-widget-body">
    <div class="exp-widget-status" data-role="status">Assigning...</div>
    <div class="exp-widget-card" data-role="card">
      <div class="exp-widget-thumbnail" data-role="thumbnail"></div>
      <div class="exp-widget-info">
        <div class="exp-widget-eyebrow">A/B Experiment</div>
        <div class="exp-widget-title" data-role="title"></div>
        <div class="exp-widget-meta" data-role="meta"></div>
        <div class="exp-widget-desc" data-role="desc"></div>
      </div>
    </div>
  </div>
</div>
<div class="exp-widget-toast" data-role="toast"></div>
"#;

pub(crate) const STYLES: &str = r"
* { box-sizing: border-box; margin: 0; padding: 0; }
.exp-widget-container {
  position: fixed; bottom: 20px; left: 20px; z-index: 999999;
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
  font-size: 14px; line-height: 1.5;
}
.exp-widget-badge {
  width: 60px; height: 60px; border-radius: 16px; padding: 8px; gap: 2px;
  background: linear-gradient(135deg, #0f172a 0%, #3b82f6 60%, #22d3ee 100%);
  box-shadow: 0 4px 12px rgba(0, 0, 0, 0.15);
  display: flex; flex-direction: column; align-items: center; justify-content: center;
  color: white; font-size: 13px; cursor: pointer;
  transition: transform 0.2s, box-shadow 0.2s;
}
.exp-widget-badge:hover { transform: scale(1.05); box-shadow: 0 6px 16px rgba(0, 0, 0, 0.2); }
.exp-widget-badge.hidden { display: none; }
.exp-widget-badge-icon { font-weight: 700; letter-spacing: 0.5px; }
.exp-widget-badge-label { font-size: 11px; opacity: 0.85; text-transform: uppercase; letter-spacing: 0.5px; }
.exp-widget-panel {
  width: 320px; background: white; border-radius: 16px; overflow: hidden;
  box-shadow: 0 8px 24px rgba(0, 0, 0, 0.15);
  display: none; flex-direction: column;
}
.exp-widget-panel.visible { display: flex; }
.exp-widget-header {
  display: flex; align-items: center; justify-content: space-between;
  padding: 12px 16px; background: #f8fafc; border-bottom: 1px solid #e2e8f0;
}
.exp-widget-header-title { display: flex; align-items: center; gap: 8px; font-size: 12px; color: #64748b; font-weight: 500; }
.exp-widget-chip {
  font-size: 11px; font-weight: 600; color: #0f172a; background: #e0f2fe;
  border: 1px solid #bae6fd; border-radius: 999px; padding: 3px 8px;
}
.exp-widget-toggle {
  background: #e2e8f0; border: none; border-radius: 12px; padding: 6px 12px;
  font-size: 11px; font-weight: 500; color: #475569; cursor: pointer; transition: background 0.2s;
}
.exp-widget-toggle:hover { background: #cbd5e1; }
.exp-widget-body { padding: 16px; }
.exp-widget-status { text-align: center; padding: 24px; color: #64748b; }
.exp-widget-card { display: none; flex-direction: row; gap: 12px; cursor: pointer; transition: transform 0.2s; }
.exp-widget-card.visible { display: flex; }
.exp-widget-card:hover { transform: translateY(-2px); }
.exp-widget-thumbnail {
  width: 80px; height: 80px; border-radius: 12px; flex-shrink: 0;
  background: linear-gradient(135deg, #38bdf8, #a78bfa);
  background-size: cover; background-position: center;
}
.exp-widget-info { flex: 1; display: flex; flex-direction: column; gap: 4px; min-width: 0; }
.exp-widget-eyebrow { font-size: 10px; color: #94a3b8; font-weight: 500; text-transform: uppercase; letter-spacing: 0.5px; }
.exp-widget-title {
  font-size: 14px; font-weight: 600; color: #0f172a; overflow: hidden; text-overflow: ellipsis;
  display: -webkit-box; -webkit-line-clamp: 2; -webkit-box-orient: vertical;
}
.exp-widget-meta { font-size: 12px; color: #64748b; overflow: hidden; text-overflow: ellipsis; white-space: nowrap; }
.exp-widget-desc { font-size: 12px; color: #3b82f6; font-weight: 500; margin-top: 4px; }
.exp-widget-toast {
  position: fixed; bottom: 80px; left: 20px; max-width: 280px;
  background: #0f172a; color: white; padding: 12px 16px; border-radius: 8px; font-size: 13px;
  box-shadow: 0 4px 12px rgba(0, 0, 0, 0.2);
  display: none; opacity: 0; transition: opacity 0.25s;
}
.exp-widget-toast.visible { display: block; opacity: 1; }
";

#[cfg(target_arch = "wasm32")]
pub use dom::{ActionHandler, ShadowSurface};

#[cfg(target_arch = "wasm32")]
mod dom {
    use super::{card_text, thumbnail_style, toggle_label, UiAction, HOST_ID, MARKUP, STYLES};
    use crate::browser::error::BootError;
    use crate::browser::observer::ElementRegistry;
    use expwidget_core::{CreativeView, ElementId, RenderSurface, Status};
    use std::rc::Rc;
    use tracing::warn;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;
    use web_sys::{Document, Element, Event, HtmlElement, ShadowRootInit, ShadowRootMode};

    /// Element id of the creative card; the card is reused across renders.
    const CARD: ElementId = ElementId(1);

    /// Handlers of user actions.
    pub type ActionHandler = Rc<dyn Fn(UiAction)>;

    /// The widget UI inside a shadow root.
    pub struct ShadowSurface {
        host: Element,
        badge: Element,
        panel: Element,
        toggle: Element,
        status: HtmlElement,
        card: Element,
        thumbnail: HtmlElement,
        title: Element,
        meta: Element,
        desc: Element,
        toast: Element,
        registry: ElementRegistry,
        listeners: Vec<(Element, &'static str, Closure<dyn FnMut(Event)>)>,
    }

    impl ShadowSurface {
        /// Build the UI, append it to `<body>` and wire clicks to `on_action`.
        ///
        /// The card is registered in `registry` so the viewport observer can
        /// find it.
        pub fn mount(
            document: &Document,
            registry: ElementRegistry,
            on_action: ActionHandler,
        ) -> Result<Self, BootError> {
            let host = document.create_element("div")?;
            host.set_id(HOST_ID);
            let shadow = host.attach_shadow(&ShadowRootInit::new(ShadowRootMode::Open))?;

            let style = document.create_element("style")?;
            style.set_text_content(Some(STYLES));
            shadow.append_child(&style)?;

            let wrapper = document.create_element("div")?;
            wrapper.set_class_name("exp-widget-container");
            wrapper.set_inner_html(MARKUP);
            shadow.append_child(&wrapper)?;

            let find = |role: &str| -> Result<Element, BootError> {
                wrapper
                    .query_selector(&format!("[data-role=\"{role}\"]"))?
                    .ok_or_else(|| BootError::Dom(format!("missing {role} element")))
            };
            let as_html = |element: Element| -> Result<HtmlElement, BootError> {
                element
                    .dyn_into::<HtmlElement>()
                    .map_err(|_| BootError::Dom("not an HTML element".into()))
            };

            let mut surface = Self {
                badge: find("badge")?,
                panel: find("panel")?,
                toggle: find("toggle")?,
                status: as_html(find("status")?)?,
                card: find("card")?,
                thumbnail: as_html(find("thumbnail")?)?,
                title: find("title")?,
                meta: find("meta")?,
                desc: find("desc")?,
                toast: find("toast")?,
                host,
                registry,
                listeners: Vec::new(),
            };

            surface.listen(surface.badge.clone(), UiAction::Badge, &on_action)?;
            surface.listen(surface.toggle.clone(), UiAction::Toggle, &on_action)?;
            surface.listen(surface.card.clone(), UiAction::Card, &on_action)?;
            surface.registry.register(CARD, surface.card.clone());

            document
                .body()
                .ok_or_else(|| BootError::Dom("document has no body".into()))?
                .append_child(&surface.host)?;
            Ok(surface)
        }

        fn listen(
            &mut self,
            element: Element,
            action: UiAction,
            on_action: &ActionHandler,
        ) -> Result<(), BootError> {
            let handler = Rc::clone(on_action);
            let callback = Closure::<dyn FnMut(Event)>::new(move |_event: Event| handler(action));
            element.add_event_listener_with_callback("click", callback.as_ref().unchecked_ref())?;
            self.listeners.push((element, "click", callback));
            Ok(())
        }

        /// The host element appended to `<body>`.
        pub fn host(&self) -> &Element {
            &self.host
        }

        fn set_class(element: &Element, class: &str, on: bool) {
            let classes = element.class_list();
            let result = if on {
                classes.add_1(class)
            } else {
                classes.remove_1(class)
            };
            if let Err(err) = result {
                warn!(error = ?err, class, "failed to update class list");
            }
        }

        fn set_style(element: &HtmlElement, property: &str, value: &str) {
            if let Err(err) = element.style().set_property(property, value) {
                warn!(error = ?err, property, "failed to set style");
            }
        }
    }

    impl RenderSurface for ShadowSurface {
        fn show_status(&mut self, status: &Status) {
            Self::set_style(&self.status, "display", "block");
            self.status.set_text_content(Some(&status.text()));
            Self::set_class(&self.card, "visible", false);
        }

        fn render_creative(&mut self, view: &CreativeView) -> ElementId {
            Self::set_style(&self.status, "display", "none");

            let (title, meta, cta) = card_text(view);
            self.title.set_text_content(Some(title));
            self.meta.set_text_content(Some(meta));
            self.desc.set_text_content(Some(cta));

            let (image, size) = thumbnail_style(&view.thumbnail);
            Self::set_style(&self.thumbnail, "background-image", &image);
            Self::set_style(&self.thumbnail, "background-size", size);

            Self::set_class(&self.card, "visible", true);
            CARD
        }

        fn set_panel_open(&mut self, open: bool) {
            Self::set_class(&self.badge, "hidden", open);
            Self::set_class(&self.panel, "visible", open);
            self.toggle.set_text_content(Some(toggle_label(open)));
        }

        fn show_toast(&mut self, message: &str) {
            self.toast.set_text_content(Some(message));
            Self::set_class(&self.toast, "visible", true);
        }

        fn hide_toast(&mut self) {
            Self::set_class(&self.toast, "visible", false);
        }

        fn unmount(&mut self) {
            for (element, event, callback) in self.listeners.drain(..) {
                let _ = element
                    .remove_event_listener_with_callback(event, callback.as_ref().unchecked_ref());
            }
            self.registry.unregister(CARD);
            self.host.remove();
        }
    }

}

#[cfg(test)]
#[cfg(not(target_arch = "wasm32"))]
mod tests {
    use super::*;
    use expwidget_core::Creative;
    use proptest::prelude::*;

    #[test]
    fn test_toggle_label() {
        assert_eq!(toggle_label(true), "Hide");
        assert_eq!(toggle_label(false), "Show");
    }

    #[test]
    fn test_css_url_escapes() {
        assert_eq!(css_url("https://cdn/a.png"), r#"url("https://cdn/a.png")"#);
        assert_eq!(css_url(r#"a"b\c"#), r#"url("a\"b\\c")"#);
        assert_eq!(css_url("a\nb"), r#"url("ab")"#);
    }

    #[test]
    fn test_thumbnail_style() {
        let view = CreativeView::from_creative(&Creative::new(1i64), None);
        assert_eq!(
            thumbnail_style(&view.thumbnail),
            (PLACEHOLDER_GRADIENT.to_string(), "auto")
        );
        let image = Thumbnail::Image("data:image/png;base64,AA".into());
        assert_eq!(
            thumbnail_style(&image),
            (r#"url("data:image/png;base64,AA")"#.to_string(), "cover")
        );
    }

    #[test]
    fn test_markup_has_every_role() {
        for role in [
            "badge", "panel", "toggle", "status", "card", "thumbnail", "title", "meta", "desc",
            "toast",
        ] {
            assert!(MARKUP.contains(&format!("data-role=\"{role}\"")), "{role}");
        }
        assert!(STYLES.contains(".exp-widget-toast.visible"));
    }

    proptest! {
        #[test]
        fn prop_css_url_stays_quoted(src in ".{0,40}") {
            let value = css_url(&src);
            let inner = &value[5..value.len() - 2];
            let mut escaped = false;
            for ch in inner.chars() {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else {
                    prop_assert_ne!(ch, '"');
                }
            }
            prop_assert!(!escaped);
        }
    }
}
