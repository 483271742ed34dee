//! `localStorage` binding.
//!
//! In WASM this talks to `window.localStorage`; natively it falls back to an
//! in-memory [`MemoryStore`] so the rest of the crate stays testable.

use expwidget_core::{KeyValueStore, StorageError};
#[cfg(not(target_arch = "wasm32"))]
use expwidget_core::MemoryStore;

/// The page's `localStorage`.
///
/// Lookups go through `window.localStorage` on every call, so a storage
/// that becomes unavailable (privacy mode, blocked third-party storage)
/// degrades to cache misses instead of failing the widget.
#[derive(Debug, Clone, Default)]
pub struct LocalStorage {
    /// In-memory fallback for non-WASM environments
    #[cfg(not(target_arch = "wasm32"))]
    memory: MemoryStore,
}

impl LocalStorage {
    /// Create a handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `localStorage` can be reached at all.
    #[must_use]
    pub fn is_available(&self) -> bool {
        #[cfg(target_arch = "wasm32")]
        {
            Self::storage().is_some()
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            true
        }
    }

    #[cfg(target_arch = "wasm32")]
    fn storage() -> Option<web_sys::Storage> {
        web_sys::window()?.local_storage().ok()?
    }
}

impl KeyValueStore for LocalStorage {
    fn get(&self, key: &str) -> Option<String> {
        #[cfg(target_arch = "wasm32")]
        {
            Self::storage()?.get_item(key).ok()?
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            self.memory.get(key)
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        #[cfg(target_arch = "wasm32")]
        {
            Self::storage()
                .ok_or(StorageError::NotAvailable)?
                .set_item(key, value)
                .map_err(|_| StorageError::QuotaExceeded)
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            self.memory.set(key, value)
        }
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        #[cfg(target_arch = "wasm32")]
        {
            Self::storage()
                .ok_or(StorageError::NotAvailable)?
                .remove_item(key)
                .map_err(|_| StorageError::AccessDenied)
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            self.memory.remove(key)
        }
    }
}

#[cfg(test)]
#[cfg(not(target_arch = "wasm32"))]
mod tests {
    use super::*;
    use expwidget_core::{AnonId, ManualClock, ANON_ID_KEY};

    #[test]
    fn test_fallback_roundtrip() {
        let storage = LocalStorage::new();
        assert!(storage.is_available());
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").as_deref(), Some("v"));
        storage.remove("k").unwrap();
        assert!(storage.get("k").is_none());
    }

    #[test]
    fn test_clones_share_fallback() {
        let storage = LocalStorage::new();
        let id = AnonId::load_or_create(&storage.clone(), &ManualClock::new(1));
        assert_eq!(storage.get(ANON_ID_KEY).as_deref(), Some(id.as_str()));
    }
}

#[cfg(test)]
#[cfg(target_arch = "wasm32")]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_local_storage_roundtrip() {
        let storage = LocalStorage::new();
        assert!(storage.is_available());
        storage.set("expwidget_test_key", "value").unwrap();
        assert_eq!(storage.get("expwidget_test_key").as_deref(), Some("value"));
        storage.remove("expwidget_test_key").unwrap();
        assert!(storage.get("expwidget_test_key").is_none());
    }
}
