//! Small lock helpers shared across the crate.

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate is a plain enqueue/dequeue or
/// add/remove, so state behind a poisoned lock is still consistent and
/// propagating the poison would only turn one panic into many.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
