//! In-flight request registry.
//!
//! Maps caller-supplied request ids to cancellation tokens. An entry lives
//! exactly as long as the `RegistrationGuard` returned by `register`; the
//! guard removes it on drop, so finished, failed and dropped requests never
//! leave stale entries behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Entry {
    token: CancellationToken,
    generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
}

/// Shared map of keyed in-flight requests.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<Inner>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `request_id`, returning the token the request must watch.
    ///
    /// When `parent` is given the token is its child, so cancelling either
    /// aborts the request. Registering an id that is already in flight makes
    /// the newest request the cancellation target.
    pub fn register(&self, request_id: &str, parent: Option<&CancellationToken>) -> RegistrationGuard {
        let token = match parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let previous = self.entries().insert(
            request_id.to_string(),
            Entry {
                token: token.clone(),
                generation,
            },
        );
        if previous.is_some() {
            tracing::debug!(request_id, "Request id re-registered, newest request takes over");
        }

        RegistrationGuard {
            registry: self.clone(),
            request_id: request_id.to_string(),
            generation,
            token,
        }
    }

    /// Cancel the request registered under `request_id`.
    ///
    /// Unknown or already-finished ids are ignored. Returns whether a live
    /// request was signalled.
    pub fn cancel(&self, request_id: &str) -> bool {
        let entry = self.entries().remove(request_id);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                tracing::debug!(request_id, "Cancelled in-flight request");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop all bookkeeping without cancelling anything. Test isolation only.
    pub fn reset(&self) {
        self.entries().clear();
    }

    fn remove_if_current(&self, request_id: &str, generation: u64) {
        let mut entries = self.entries();
        if entries.get(request_id).is_some_and(|e| e.generation == generation) {
            entries.remove(request_id);
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps a registry entry alive for the duration of one request.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: InFlightRegistry,
    request_id: String,
    generation: u64,
    token: CancellationToken,
}

impl RegistrationGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove_if_current(&self.request_id, self.generation);
    }
}
