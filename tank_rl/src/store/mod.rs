//! Model persistence.
//!
//! The store is the single source of truth for published networks. Only the
//! learner writes to it; actors poll [`ModelStore::version`] and download
//! when a newer version appears.
//!
//! | Key | Contents |
//! |-----|----------|
//! | `"policy"` | policy weights, optimizer state, KL controller state |
//! | `"value"` | value weights and optimizer state |
//! | `"policy@<v>"` | archived policy snapshot at version `v` |
//!
//! Writes are atomic per key. There are no cross-key transactions, so the
//! learner writes `"value"` before `"policy"`: an actor that observes a new
//! policy version always finds a value network at least as new.

pub mod codec;
pub mod file_store;
pub mod memory_store;

pub use codec::{decode_module, decode_optimizer, encode_module, encode_optimizer};
pub use file_store::FileModelStore;
pub use memory_store::MemoryModelStore;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::learner::kl_controller::ControllerState;

pub const POLICY_KEY: &str = "policy";
pub const VALUE_KEY: &str = "value";

/// Key of the archived policy at `version`.
pub fn snapshot_key(version: u64) -> String {
    format!("{POLICY_KEY}@{version}")
}

/// Version encoded in a snapshot key, if `key` is one.
pub fn parse_snapshot_key(key: &str) -> Option<u64> {
    key.strip_prefix(POLICY_KEY)?.strip_prefix('@')?.parse().ok()
}

/// One persisted network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    /// Module record bytes
    pub weights: Vec<u8>,
    /// Optimizer record bytes
    pub optimizer_state: Option<Vec<u8>>,
    pub version: u64,
    /// KL controller state, stored with the policy only
    pub controller: Option<ControllerState>,
}

impl ModelState {
    pub fn new(weights: Vec<u8>, version: u64) -> Self {
        Self {
            weights,
            optimizer_state: None,
            version,
            controller: None,
        }
    }

    pub fn with_optimizer_state(mut self, state: Vec<u8>) -> Self {
        self.optimizer_state = Some(state);
        self
    }

    pub fn with_controller(mut self, controller: ControllerState) -> Self {
        self.controller = Some(controller);
        self
    }
}

/// Keyed, versioned model storage.
pub trait ModelStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<ModelState>, StoreError>;

    /// Replace the entry under `key` atomically.
    fn set(&self, key: &str, state: ModelState) -> Result<(), StoreError>;

    /// Version stored under `key` without fetching the weights.
    fn version(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Every stored key, sorted.
    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Like [`ModelStore::get`] but a missing key is an error.
    fn require(&self, key: &str) -> Result<ModelState, StoreError> {
        self.get(key)?.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// Versions of every archived policy snapshot, ascending.
    fn snapshot_versions(&self) -> Result<Vec<u64>, StoreError> {
        let mut versions: Vec<u64> = self
            .keys()?
            .iter()
            .filter_map(|key| parse_snapshot_key(key))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }
}

/// Shared store handle.
pub type SharedStore = Arc<dyn ModelStore>;
