//! Reference-counted sharing of trackers by set ID.
//!
//! Consumers that want the same generation set share one tracker through
//! [`SubscriptionRegistry::acquire`]. Each caller holds a [`Lease`]; when the
//! last lease for an ID is dropped the entry is removed and the shared value
//! is dropped with it, which for a [`TrackerHandle`] stops polling and closes
//! the push transport.
//!
//! The registry is an ordinary value: create one where the application wires
//! its services and clone it where needed.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::tracker::{GenerationTracker, TrackerHandle};

/// Registry of trackers keyed by set ID.
pub type TrackerRegistry = SubscriptionRegistry<TrackerHandle>;

struct Entry<T> {
    value: Arc<T>,
    refs: usize,
}

type Entries<T> = Arc<Mutex<HashMap<String, Entry<T>>>>;

/// Shared values keyed by ID with reference-counted teardown.
pub struct SubscriptionRegistry<T> {
    entries: Entries<T>,
}

impl<T> SubscriptionRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Take a lease on the value for `key`, creating it with `factory` if no
    /// lease is currently held.
    pub fn acquire(&self, key: &str, factory: impl FnOnce() -> T) -> Lease<T> {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key.to_string()).or_insert_with(|| {
            tracing::debug!(key, "Creating shared subscription");
            Entry {
                value: Arc::new(factory()),
                refs: 0,
            }
        });
        entry.refs += 1;

        Lease {
            key: key.to_string(),
            value: Arc::clone(&entry.value),
            entries: Arc::clone(&self.entries),
        }
    }

    /// Number of live leases for `key`.
    pub fn ref_count(&self, key: &str) -> usize {
        lock(&self.entries).get(key).map_or(0, |entry| entry.refs)
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    /// Number of distinct keys with at least one lease.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SubscriptionRegistry<TrackerHandle> {
    /// Share one tracker per set ID.
    pub fn track(&self, tracker: &GenerationTracker, set_id: &str) -> Lease<TrackerHandle> {
        self.acquire(set_id, || tracker.track(set_id))
    }
}

impl<T> Default for SubscriptionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SubscriptionRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> fmt::Debug for SubscriptionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("keys", &self.len())
            .finish()
    }
}

/// A counted reference to a registry entry.
pub struct Lease<T> {
    key: String,
    value: Arc<T>,
    entries: Entries<T>,
}

impl<T> Lease<T> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Clone for Lease<T> {
    fn clone(&self) -> Self {
        if let Some(entry) = lock(&self.entries).get_mut(&self.key) {
            entry.refs += 1;
        }
        Self {
            key: self.key.clone(),
            value: Arc::clone(&self.value),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        let removed = {
            let mut entries = lock(&self.entries);
            let last = match entries.get_mut(&self.key) {
                Some(entry) => {
                    entry.refs = entry.refs.saturating_sub(1);
                    entry.refs == 0
                }
                None => false,
            };
            if last {
                entries.remove(&self.key)
            } else {
                None
            }
        };
        // Dropped outside the lock; the value's own Drop may do work.
        if removed.is_some() {
            tracing::debug!(key = %self.key, "Last lease released, removing subscription");
        }
        drop(removed);
    }
}

fn lock<T>(entries: &Mutex<HashMap<String, Entry<T>>>) -> MutexGuard<'_, HashMap<String, Entry<T>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}
