//! Creative cache manager.
//!
//! Entries are JSON documents `{"data": ..., "ts": <ms>}` kept in a
//! [`KeyValueStore`]. An entry is fresh while `now - ts <= ttl`. Creative
//! entries and image entries share the same layout and freshness rule.

use crate::clock::Clock;
use crate::config::WidgetConfig;
use crate::creative::Creative;
use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix of every creative cache key.
pub const CACHE_PREFIX: &str = "exp_widget_cache_";

/// Storage key of one experiment/user pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `(experiment_id, user_key)`.
    ///
    /// `_` and `%` are percent-escaped in the experiment id, so the first `_`
    /// after the prefix always separates the two parts and distinct pairs
    /// never share a key.
    #[must_use]
    pub fn derive(experiment_id: &str, user_key: &str) -> Self {
        let mut key = String::with_capacity(CACHE_PREFIX.len() + experiment_id.len() + user_key.len() + 1);
        key.push_str(CACHE_PREFIX);
        for ch in experiment_id.chars() {
            match ch {
                '%' => key.push_str("%25"),
                '_' => key.push_str("%5F"),
                other => key.push(other),
            }
        }
        key.push('_');
        key.push_str(user_key);
        Self(key)
    }

    /// Key of the cached image for `url` under this creative key.
    #[must_use]
    pub fn image_key(&self, url: &str) -> String {
        format!("{}_img_{}", self.0, hex::encode(url))
    }

    /// The raw storage key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Age classification of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within the TTL
    Fresh,
    /// Older than the TTL
    Stale,
}

/// What a read does with a stale entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Treat it as absent and delete it
    Evict,
    /// Return it anyway (network-failure fallback)
    Allow,
}

/// On-disk entry layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry<T> {
    /// Payload
    pub data: T,
    /// Write time, milliseconds since the epoch
    pub ts: u64,
}

/// Lenient read side: other writers may have stored `ts` as a float.
#[derive(Deserialize)]
struct RawEntry {
    data: Value,
    ts: f64,
}

impl RawEntry {
    fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str::<Self>(raw)
            .ok()
            .filter(|entry| entry.ts.is_finite() && entry.ts >= 0.0)
    }

    fn stored_at(&self) -> u64 {
        self.ts as u64
    }
}

/// Cache of assigned creatives and their images.
#[derive(Debug, Clone)]
pub struct CreativeCache<S, C> {
    store: S,
    clock: C,
    ttl: Duration,
}

impl<S: KeyValueStore, C: Clock> CreativeCache<S, C> {
    /// Create a cache over `store` with the given TTL.
    pub fn new(store: S, clock: C, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Whether the cache applies to this configuration at all.
    #[must_use]
    pub fn should_use_cache(config: &WidgetConfig) -> bool {
        config.caching_enabled()
    }

    /// Classify an entry written at `stored_at`.
    #[must_use]
    pub fn freshness(&self, stored_at: u64) -> Freshness {
        let age = self.clock.now_ms().saturating_sub(stored_at);
        if u128::from(age) <= self.ttl.as_millis() {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    /// Read the cached creative.
    ///
    /// Missing and malformed entries read as `None`; malformed ones are left
    /// in place. Stale entries are deleted under [`StalePolicy::Evict`].
    pub fn load(&self, key: &CacheKey, policy: StalePolicy) -> Option<Creative> {
        let entry = self.read_entry(key.as_str(), policy)?;
        let creative = Creative::from_value(&entry.data);
        if creative.is_none() {
            debug!(key = %key, "ignoring cache entry without a usable creative");
        }
        creative
    }

    /// Store `creative` stamped with the current time.
    ///
    /// Failures are logged and swallowed.
    pub fn save(&self, key: &CacheKey, creative: &Creative) {
        let entry = StoredEntry {
            data: creative,
            ts: self.clock.now_ms(),
        };
        self.write_entry(key.as_str(), &entry);
    }

    /// Refresh the timestamp of an existing entry without rewriting its
    /// payload. Returns whether an entry was updated.
    pub fn touch(&self, key: &CacheKey) -> bool {
        let Some(raw) = self.store.get(key.as_str()) else {
            return false;
        };
        let Ok(mut value) = serde_json::from_str::<Value>(&raw) else {
            return false;
        };
        let Some(object) = value.as_object_mut().filter(|o| o.contains_key("data")) else {
            return false;
        };
        object.insert("ts".to_string(), Value::from(self.clock.now_ms()));

        match self.store.set(key.as_str(), &value.to_string()) {
            Ok(()) => true,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to refresh cache timestamp");
                false
            }
        }
    }

    /// Delete the cached creative.
    pub fn evict(&self, key: &CacheKey) {
        if let Err(err) = self.store.remove(key.as_str()) {
            warn!(key = %key, error = %err, "failed to evict cache entry");
        }
    }

    /// Read the cached `data:` URL of an image.
    pub fn load_image(&self, key: &CacheKey, url: &str, policy: StalePolicy) -> Option<String> {
        let entry = self.read_entry(&key.image_key(url), policy)?;
        match entry.data {
            Value::String(data) if !data.is_empty() => Some(data),
            _ => None,
        }
    }

    /// Store the `data:` URL of an image. Failures are logged and swallowed.
    pub fn save_image(&self, key: &CacheKey, url: &str, data_url: &str) {
        let entry = StoredEntry {
            data: data_url,
            ts: self.clock.now_ms(),
        };
        self.write_entry(&key.image_key(url), &entry);
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The clock stamping entries.
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    fn read_entry(&self, storage_key: &str, policy: StalePolicy) -> Option<RawEntry> {
        let raw = self.store.get(storage_key)?;
        let Some(entry) = RawEntry::parse(&raw) else {
            debug!(key = storage_key, "ignoring malformed cache entry");
            return None;
        };

        match (self.freshness(entry.stored_at()), policy) {
            (Freshness::Fresh, _) | (Freshness::Stale, StalePolicy::Allow) => Some(entry),
            (Freshness::Stale, StalePolicy::Evict) => {
                debug!(key = storage_key, "evicting stale cache entry");
                if let Err(err) = self.store.remove(storage_key) {
                    warn!(key = storage_key, error = %err, "failed to evict stale cache entry");
                }
                None
            }
        }
    }

    fn write_entry<T: Serialize>(&self, storage_key: &str, entry: &StoredEntry<T>) {
        let serialized = match serde_json::to_string(entry) {
            Ok(s) => s,
            Err(err) => {
                warn!(key = storage_key, error = %err, "failed to serialize cache entry");
                return;
            }
        };
        if let Err(err) = self.store.set(storage_key, &serialized) {
            warn!(key = storage_key, error = %err, "failed to write cache entry");
        }
    }
}
