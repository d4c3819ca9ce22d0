use std::collections::HashMap;
use std::sync::Arc;

use ersatzlite_error::{ErsatzError, Result};
use parking_lot::Mutex;

/// A registry mapping opaque 64-bit handles to owned resources.
///
/// Handles stand in for the native pointers of the emulated binding: they
/// are issued from a strictly increasing counter starting at 1 and are never
/// reused for the life of the table, so dereferencing a stale or foreign
/// handle reliably fails instead of aliasing an unrelated resource.
///
/// The mutex guards only the map. Resource-internal execution must never run
/// under it; callers clone the `Arc` out and drop the lock first.
pub struct HandleTable<T> {
    registry: &'static str,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    next: i64,
    entries: HashMap<i64, Arc<T>>,
}

impl<T> HandleTable<T> {
    /// Create an empty table. `registry` names it in handle-miss errors.
    pub fn new(registry: &'static str) -> Self {
        Self {
            registry,
            inner: Mutex::new(Inner {
                next: 1,
                entries: HashMap::new(),
            }),
        }
    }

    /// Register a resource and issue its handle.
    pub fn insert(&self, resource: T) -> i64 {
        let mut inner = self.inner.lock();
        let handle = inner.next;
        inner.next += 1;
        inner.entries.insert(handle, Arc::new(resource));
        handle
    }

    /// Resolve a handle, failing with the set of live handles if absent.
    pub fn get(&self, handle: i64) -> Result<Arc<T>> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(&handle)
            .cloned()
            .ok_or_else(|| self.not_found(handle, &inner))
    }

    /// Detach a handle, failing the same way as [`Self::get`] if absent.
    pub fn remove(&self, handle: i64) -> Result<Arc<T>> {
        let mut inner = self.inner.lock();
        match inner.entries.remove(&handle) {
            Some(resource) => Ok(resource),
            None => Err(self.not_found(handle, &inner)),
        }
    }

    /// Atomically swap in an empty map and return every live entry.
    ///
    /// The counter is not reset, so handles issued after a drain are still
    /// distinct from every handle issued before it.
    pub fn drain(&self) -> Vec<(i64, Arc<T>)> {
        let mut inner = self.inner.lock();
        std::mem::take(&mut inner.entries).into_iter().collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the table has no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn not_found(&self, handle: i64, inner: &Inner<T>) -> ErsatzError {
        let mut live: Vec<i64> = inner.entries.keys().copied().collect();
        live.sort_unstable();
        ErsatzError::HandleNotFound {
            registry: self.registry,
            handle,
            live,
        }
    }
}
