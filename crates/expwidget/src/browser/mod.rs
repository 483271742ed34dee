//! Browser runtime for the experiment widget.
//!
//! Implements the core collaborator traits on top of `localStorage`,
//! `fetch`, `setTimeout`, `IntersectionObserver` and a shadow-DOM surface,
//! and boots the widget from its script tag.

// WASM-only modules
#[cfg(target_arch = "wasm32")]
pub mod app;
#[cfg(target_arch = "wasm32")]
pub mod observer;
#[cfg(target_arch = "wasm32")]
pub mod platform;
#[cfg(target_arch = "wasm32")]
pub mod scheduler;
#[cfg(target_arch = "wasm32")]
pub mod transport;

// Cross-platform modules
pub mod error;
pub mod storage;
pub mod surface;

#[cfg(target_arch = "wasm32")]
pub use observer::{ElementRegistry, ViewportObserver};
#[cfg(target_arch = "wasm32")]
pub use platform::{BrowserPlatform, DateClock, WasmSpawner};
#[cfg(target_arch = "wasm32")]
pub use scheduler::TimeoutScheduler;
#[cfg(target_arch = "wasm32")]
pub use surface::ShadowSurface;
#[cfg(target_arch = "wasm32")]
pub use transport::FetchTransport;

pub use error::BootError;
pub use storage::LocalStorage;
pub use surface::UiAction;
