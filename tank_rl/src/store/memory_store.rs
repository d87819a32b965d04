//! In-process model store.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{ModelState, ModelStore};
use crate::error::StoreError;

/// `HashMap` behind a read-write lock. Readers never block each other.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    entries: RwLock<HashMap<String, ModelState>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove `key`, returning what was stored.
    pub fn remove(&self, key: &str) -> Option<ModelState> {
        self.entries.write().remove(key)
    }
}

impl ModelStore for MemoryModelStore {
    fn get(&self, key: &str) -> Result<Option<ModelState>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, state: ModelState) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), state);
        Ok(())
    }

    fn version(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.entries.read().get(key).map(|s| s.version))
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
