//! Published policy version.
//!
//! The learner owns the only writer. Actors, runners and tests read the
//! current value to measure how far behind a batch or cached model is.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Mirror of the newest version the learner has published.
#[derive(Debug, Default)]
pub struct VersionCounter {
    published: AtomicU64,
}

impl VersionCounter {
    /// Counter at version 0 (the bootstrap publish).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Raise the version to at least `version`. Never moves backwards, so a
    /// late writer cannot hide a newer publish.
    ///
    /// Returns the value after the update.
    pub fn advance_to(&self, version: u64) -> u64 {
        self.published.fetch_max(version, Ordering::AcqRel).max(version)
    }
}

pub type SharedVersionCounter = Arc<VersionCounter>;

pub fn version_counter() -> SharedVersionCounter {
    Arc::new(VersionCounter::new())
}
