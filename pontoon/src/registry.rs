//! Process-local id-to-object tables.
//!
//! The two sides of a bridge can never share pointers, so every cross-side
//! reference is a small integer id resolved independently on each side
//! against its own registry. A lookup miss is not an error: it means the
//! target is no longer valid, and call sites turn that into a silent no-op
//! rather than a failure.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::sync::lock;

/// Thread-safe table mapping integer ids to local values.
///
/// Ids are unique per table at any instant and sequential ids are never
/// reused within a session, so a removed id stays dead even while new
/// entries are added concurrently.
pub struct Registry<T: Clone> {
    entries: Mutex<HashMap<i64, T>>,
    next_id: AtomicI64,
    registrations: AtomicI64,
    deregistrations: AtomicI64,
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Registry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            registrations: AtomicI64::new(0),
            deregistrations: AtomicI64::new(0),
        }
    }

    /// Insert a value under a freshly assigned id and return the id.
    pub fn insert(&self, value: T) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).insert(id, value);
        self.registrations.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Insert a value under an explicit id (e.g. a message id used as a
    /// correlation key), replacing any previous entry.
    pub fn insert_with_id(&self, id: i64, value: T) {
        lock(&self.entries).insert(id, value);
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Look up an id. `None` means the target is no longer valid.
    pub fn get(&self, id: i64) -> Option<T> {
        lock(&self.entries).get(&id).cloned()
    }

    /// Remove an entry; subsequent lookups yield `None` immediately.
    pub fn remove(&self, id: i64) -> Option<T> {
        let removed = lock(&self.entries).remove(&id);
        if removed.is_some() {
            self.deregistrations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove and return every entry. Used by crash unwinding to complete
    /// all pending-call slots in one sweep.
    pub fn drain(&self) -> Vec<(i64, T)> {
        let drained: Vec<(i64, T)> = lock(&self.entries).drain().collect();
        self.deregistrations
            .fetch_add(drained.len() as i64, Ordering::Relaxed);
        drained
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether the registry has no live entries.
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Total registrations since creation.
    pub fn registration_count(&self) -> i64 {
        self.registrations.load(Ordering::Relaxed)
    }

    /// Total deregistrations since creation.
    pub fn deregistration_count(&self) -> i64 {
        self.deregistrations.load(Ordering::Relaxed)
    }
}
