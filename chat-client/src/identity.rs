//! Session-scoped key/value storage for the active username.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Storage that lives exactly as long as the embedding session.
pub trait IdentityStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str);

    /// Write a value only if the key is free, as one atomic step.
    ///
    /// Returns the current holder when the key is taken.
    fn claim(&self, key: &str, value: &str) -> Result<(), String>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str);
}

/// In-memory [`IdentityStore`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryIdentityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
    }

    fn claim(&self, key: &str, value: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.entry(key.to_string()) {
            Entry::Occupied(held) => Err(held.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(value.to_string());
                Ok(())
            }
        }
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}
