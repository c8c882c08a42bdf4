//! State store: CSRF `state` generation, TTL, and one-shot verification.

use crate::crypto::random_state;
use crate::error::Error;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const MIN_TTL: Duration = Duration::from_secs(60);
const MAX_TTL: Duration = Duration::from_secs(600);
const DEFAULT_TTL: Duration = Duration::from_secs(300);
const DEFAULT_CAPACITY: usize = 1000;

/// A single CSRF state entry.
#[derive(Debug, Clone)]
pub struct StateEntry {
    pub state: String,
    pub data: Option<Value>,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub session_id: Option<String>,
}

struct Inner {
    entries: HashMap<String, StateEntry>,
    capacity: usize,
}

/// In-memory, thread-safe CSRF state store.
pub struct StateStore {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

impl StateStore {
    /// `ttl` is clamped to `[1 min, 10 min]`.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let ttl = ttl.clamp(MIN_TTL, MAX_TTL);
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                capacity,
            }),
            ttl,
        }
    }

    /// Create a new state, optionally carrying caller data and a session binding.
    ///
    /// When the store is at capacity, expired entries are evicted first; if it is still full,
    /// `DosGuardTripped` is returned rather than admitting an unbounded number of entries.
    pub fn create(
        &self,
        data: Option<Value>,
        session_id: Option<String>,
    ) -> Result<String, Error> {
        let state = random_state(256);
        let now = Instant::now();
        let entry = StateEntry {
            state: state.clone(),
            data,
            created_at: now,
            expires_at: now + self.ttl,
            session_id,
        };

        let mut inner = self.inner.lock();
        if inner.entries.len() >= inner.capacity {
            inner.entries.retain(|_, e| e.expires_at > now);
        }
        if inner.entries.len() >= inner.capacity {
            return Err(Error::DosGuardTripped);
        }
        inner.entries.insert(state.clone(), entry);
        Ok(state)
    }

    /// Atomic check-and-delete (one-shot). Returns `None` if the state is malformed, unknown,
    /// expired, or already consumed, or if `session_id` doesn't match the binding recorded at
    /// creation time.
    pub fn verify(&self, state: &str, session_id: Option<&str>) -> Option<StateEntry> {
        if !is_well_formed(state) {
            return None;
        }

        let mut inner = self.inner.lock();
        let entry = inner.entries.remove(state)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        if entry.session_id.as_deref() != session_id && entry.session_id.is_some() {
            // Put it back: a wrong session shouldn't burn a legitimate holder's one shot.
            inner.entries.insert(state.to_string(), entry);
            return None;
        }
        Some(entry)
    }

    /// Evict expired entries. Intended to be driven by a periodic background sweep.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.inner.lock().entries.retain(|_, e| e.expires_at > now);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Test-only hook: the state values currently pending verification. Lets a test drive the
    /// exact state a flow generated through the loopback callback without having to intercept
    /// the authorization URL.
    #[cfg(test)]
    #[must_use]
    pub fn pending_states(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }
}

fn is_well_formed(state: &str) -> bool {
    !state.is_empty() && state.len() % 2 == 0 && state.chars().all(|c| c.is_ascii_hexdigit())
}

/// Spawn a background task that periodically sweeps expired entries from `store`, returning a
/// handle that stops the sweep when dropped.
pub fn spawn_sweeper(
    store: std::sync::Arc<StateStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            store.sweep();
        }
    })
}
