//! Embeddable A/B experiment widget.
//!
//! Drop the compiled module on any page with a script tag carrying the
//! widget configuration:
//!
//! ```html
//! <script type="module"
//!         src="./expwidget.js"
//!         data-api-base="https://api.example.com"
//!         data-experiment-id="exp_42"
//!         data-cache-ttl="3600000"></script>
//! ```
//!
//! The widget renders inside a shadow root, assigns the visitor through the
//! experiment service, and reports impressions and clicks. All logic lives
//! in [`expwidget_core`]; the [`browser`] module supplies the web-sys
//! implementations of its collaborators.

pub use expwidget_core::*;

pub mod browser;

#[cfg(target_arch = "wasm32")]
pub use browser::{BrowserPlatform, FetchTransport, ShadowSurface, TimeoutScheduler, ViewportObserver};
pub use browser::{BootError, LocalStorage, UiAction};
