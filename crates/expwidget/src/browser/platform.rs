//! Browser implementations of the remaining [`Platform`] collaborators.

use super::{FetchTransport, LocalStorage, ShadowSurface, TimeoutScheduler, ViewportObserver};
use expwidget_core::{Clock, Platform};
use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};

/// `Date.now()` clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateClock;

impl Clock for DateClock {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn now_ms(&self) -> u64 {
        js_sys::Date::now().max(0.0) as u64
    }
}

/// Spawns onto the browser microtask queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasmSpawner;

impl LocalSpawn for WasmSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        wasm_bindgen_futures::spawn_local(future);
        Ok(())
    }
}

/// The page the widget is embedded in.
pub enum BrowserPlatform {}

impl Platform for BrowserPlatform {
    type Store = LocalStorage;
    type Clock = DateClock;
    type Transport = FetchTransport;
    type Scheduler = TimeoutScheduler;
    type Observer = ViewportObserver;
    type Surface = ShadowSurface;
    type Spawner = WasmSpawner;
}
