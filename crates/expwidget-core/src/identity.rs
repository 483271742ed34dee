//! Anonymous browser identity and random assignment keys.

use crate::clock::Clock;
use crate::storage::KeyValueStore;
use rand::Rng;
use std::fmt;
use tracing::{debug, warn};

/// Storage key holding the anonymous id.
pub const ANON_ID_KEY: &str = "experiment_widget_anon_id";

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 9;

/// Per-browser stable identifier.
///
/// Created lazily on first use and persisted; never rotated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonId(String);

impl AnonId {
    /// Read the persisted id, creating and persisting one if absent.
    ///
    /// A failed write still yields a usable id for this page load.
    pub fn load_or_create<S: KeyValueStore, C: Clock>(store: &S, clock: &C) -> Self {
        if let Some(existing) = store.get(ANON_ID_KEY).filter(|id| !id.trim().is_empty()) {
            return Self(existing);
        }

        let id = token("anon", clock.now_ms());
        match store.set(ANON_ID_KEY, &id) {
            Ok(()) => debug!(anon_id = %id, "created anonymous id"),
            Err(err) => warn!(error = %err, "could not persist anonymous id"),
        }
        Self(id)
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fresh user key for a single random-assignment request.
#[must_use]
pub fn random_user_key(now_ms: u64) -> String {
    token("random", now_ms)
}

fn token(prefix: &str, now_ms: u64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
        .collect();
    format!("{prefix}_{now_ms}_{suffix}")
}
