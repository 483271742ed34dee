//! Start-up errors. None of them reach the host page; they are logged.

use expwidget_core::ConfigError;
use thiserror::Error;

/// Why the widget could not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootError {
    /// No global `window`
    #[error("no window object")]
    NoWindow,
    /// No `document` on the window
    #[error("no document object")]
    NoDocument,
    /// The configuring script tag could not be found
    #[error("cannot find the widget script tag")]
    NoScriptTag,
    /// Script tag attributes are missing or invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A DOM call failed
    #[error("DOM error: {0}")]
    Dom(String),
}

#[cfg(target_arch = "wasm32")]
impl From<wasm_bindgen::JsValue> for BootError {
    fn from(value: wasm_bindgen::JsValue) -> Self {
        Self::Dom(
            value
                .as_string()
                .unwrap_or_else(|| format!("{value:?}")),
        )
    }
}
