//! Per-tab session identity.
//!
//! The identifier is generated once and written to a tab-scoped store so that
//! every chunk of the same browsing session carries the same `sessionId`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, warn};

/// Storage key under which the session identifier is persisted
pub const SESSION_ID_KEY: &str = "replay_session_id";

/// Tab-scoped key/value store (the host's session storage)
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// Process-local store, lives as long as the pipeline
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }
}

/// Session Identity Provider
pub struct SessionIdentity {
    store: Arc<dyn SessionStore>,
    cached: OnceCell<String>,
}

impl SessionIdentity {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            cached: OnceCell::new(),
        }
    }

    /// Return the tab's session identifier, creating and persisting it on first use.
    pub fn get_session_id(&self) -> &str {
        self.cached.get_or_init(|| {
            if let Some(existing) = self.store.get(SESSION_ID_KEY) {
                if !existing.is_empty() {
                    debug!("[SessionIdentity] Reusing stored session id");
                    return existing;
                }
            }
            let id = generate_session_id();
            self.store.set(SESSION_ID_KEY, &id);
            debug!("[SessionIdentity] Generated session id {}", id);
            id
        })
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new(Arc::new(InMemorySessionStore::new()))
    }
}

/// Random v4 UUID from the OS source, or a timestamp+random fallback.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .to_string(),
        Err(err) => {
            warn!(
                "[SessionIdentity] OS randomness unavailable ({}), using fallback id",
                err
            );
            fallback_session_id()
        }
    }
}

fn fallback_session_id() -> String {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seed = (elapsed.as_nanos() as u64) ^ (u64::from(std::process::id()) << 32);
    let mut rng = StdRng::seed_from_u64(seed);
    format!(
        "{:x}-{:012x}",
        elapsed.as_millis(),
        rng.gen::<u64>() & 0xffff_ffff_ffff
    )
}
