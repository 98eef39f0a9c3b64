//! Database Handle Registry
//!
//! The connection remembers which [`Database`] handle is currently active for
//! each name, without keeping any of them alive: entries are `Weak`.
//!
//! Entries whose handle has already been dropped may linger. They are pruned
//! opportunistically whenever a handle removes itself, not proactively.
//!
//! ## Locking
//!
//! No `Arc<Database>` is ever dropped while the registry lock is held. A
//! dropped handle removes itself from this registry from its `Drop`, so
//! releasing the last strong reference under the lock would re-enter it.

use crate::database::Database;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::trace;

/// Errors from registry access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A thread panicked while holding the registry lock
    #[error("database registry lock poisoned")]
    Poisoned,
}

/// Mapping from database name to the weakly-held active handle.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Weak<Database>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Weak<Database>>>, RegistryError> {
        self.entries.lock().map_err(|_| RegistryError::Poisoned)
    }

    /// Returns the live handle registered under `name`, if any.
    pub fn lookup(&self, name: &str) -> Result<Option<Arc<Database>>, RegistryError> {
        Ok(self.lock()?.get(name).and_then(Weak::upgrade))
    }

    /// Returns the live handle for `name`, or registers the one built by
    /// `create` in place of whatever entry was there.
    pub fn get_or_insert_with<F>(&self, name: &str, create: F) -> Result<Arc<Database>, crate::Error>
    where
        F: FnOnce() -> Result<Arc<Database>, crate::Error>,
    {
        let mut entries = self.lock()?;
        if let Some(existing) = entries.get(name).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let created = create()?;
        entries.insert(name.to_string(), Arc::downgrade(&created));
        Ok(created)
    }

    /// Makes `handle` the active handle for its name.
    pub fn insert(&self, handle: &Arc<Database>) -> Result<(), RegistryError> {
        self.insert_weak(handle.name(), Arc::downgrade(handle))
    }

    pub(crate) fn insert_weak(&self, name: &str, handle: Weak<Database>) -> Result<(), RegistryError> {
        self.lock()?.insert(name.to_string(), handle);
        Ok(())
    }

    /// Removes every entry pointing at `handle`, compared by identity, and
    /// every entry whose handle is already gone.
    ///
    /// Returns the number of entries removed.
    pub fn remove_handle(&self, handle: *const Database) -> Result<usize, RegistryError> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|name, entry| {
            let is_handle = std::ptr::eq(entry.as_ptr(), handle);
            let is_dead = entry.strong_count() == 0;
            if is_handle || is_dead {
                trace!(db = %name, is_handle, "Pruning registry entry");
            }
            !(is_handle || is_dead)
        });
        Ok(before - entries.len())
    }

    /// Number of entries, including dead ones awaiting pruning.
    pub fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len()? == 0)
    }

    /// Registered names, live or not, sorted.
    pub fn names(&self) -> Result<Vec<String>, RegistryError> {
        let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Poisons the lock by panicking while holding it.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.entries.lock();
            panic!("poisoning registry for test");
        }));
    }
}
