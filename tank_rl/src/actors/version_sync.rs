//! Actor-side model version synchronization.
//!
//! Before each episode an actor asks the store for the published policy
//! version:
//!
//! | store vs local | reuse budget | result |
//! |----------------|--------------|--------|
//! | newer | any | download, `Updated`, budget refilled |
//! | same / none | left | `Reused`, budget spent |
//! | same / none | exhausted | backoff until newer, else `SyncTimeout` |
//!
//! An actor that has never synced has nothing to reuse and waits directly.

use std::time::Duration;

use crate::config::TrainingConfig;
use crate::error::PipelineError;
use crate::store::{ModelState, ModelStore, POLICY_KEY, VALUE_KEY};

/// Exponential delay sequence, capped at `max`, yielding `retries` items.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    multiplier: f64,
    max: Duration,
    remaining: u32,
}

impl Backoff {
    pub fn new(initial: Duration, multiplier: f64, max: Duration, retries: u32) -> Self {
        Self {
            next: initial.min(max),
            multiplier: multiplier.max(1.0),
            max,
            remaining: retries,
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(
            config.sync_initial_backoff(),
            config.sync_backoff_multiplier,
            config.sync_max_backoff(),
            config.sync_max_retries,
        )
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.next;
        self.next = self.next.mul_f64(self.multiplier).min(self.max);
        Some(delay)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

/// Policy and value states fetched together.
#[derive(Debug, Clone)]
pub struct SyncedModels {
    pub policy: ModelState,
    pub value: ModelState,
}

impl SyncedModels {
    pub fn version(&self) -> u64 {
        self.policy.version
    }
}

/// Result of [`VersionSync::sync`].
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// A newer model was downloaded.
    Updated(SyncedModels),
    /// The cached model is used again; `reuse_count` is the new count.
    Reused { version: u64, reuse_count: u32 },
}

/// Per-actor sync state.
#[derive(Debug, Clone)]
pub struct VersionSync {
    local_version: Option<u64>,
    reuse_count: u32,
    reuse_limit: u32,
    backoff: Backoff,
}

impl VersionSync {
    pub fn new(reuse_limit: u32, backoff: Backoff) -> Self {
        Self {
            local_version: None,
            reuse_count: 0,
            reuse_limit,
            backoff,
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(config.reuse_limit, Backoff::from_config(config))
    }

    pub fn local_version(&self) -> Option<u64> {
        self.local_version
    }

    pub fn reuse_count(&self) -> u32 {
        self.reuse_count
    }

    pub fn reuse_limit(&self) -> u32 {
        self.reuse_limit
    }

    /// Download both networks if the store holds a newer policy.
    ///
    /// Never waits and never touches the reuse budget.
    pub fn poll(&mut self, store: &dyn ModelStore) -> Result<Option<SyncedModels>, PipelineError> {
        let published = match store.version(POLICY_KEY)? {
            Some(version) => version,
            None => return Ok(None),
        };
        if self.local_version.is_some_and(|local| published <= local) {
            return Ok(None);
        }

        let policy = store.require(POLICY_KEY)?;
        let value = store.require(VALUE_KEY)?;
        self.local_version = Some(policy.version);
        self.reuse_count = 0;
        Ok(Some(SyncedModels { policy, value }))
    }

    /// Sync before an episode, blocking with backoff once the reuse budget
    /// is spent.
    pub fn sync(&mut self, store: &dyn ModelStore) -> Result<SyncOutcome, PipelineError> {
        if let Some(models) = self.poll(store)? {
            return Ok(SyncOutcome::Updated(models));
        }

        if let Some(version) = self.local_version {
            if self.reuse_count < self.reuse_limit {
                self.reuse_count += 1;
                return Ok(SyncOutcome::Reused {
                    version,
                    reuse_count: self.reuse_count,
                });
            }
        }

        let mut attempts = 0;
        for delay in self.backoff.clone() {
            std::thread::sleep(delay);
            attempts += 1;
            if let Some(models) = self.poll(store)? {
                log::debug!(
                    "sync resolved after backoff: version={} attempts={attempts}",
                    models.version()
                );
                return Ok(SyncOutcome::Updated(models));
            }
        }

        Err(PipelineError::SyncTimeout {
            local_version: self.local_version,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryModelStore;

    fn quick_backoff(retries: u32) -> Backoff {
        Backoff::new(Duration::from_millis(1), 2.0, Duration::from_millis(2), retries)
    }

    fn publish(store: &MemoryModelStore, version: u64) {
        store
            .set(VALUE_KEY, ModelState::new(vec![version as u8], version))
            .unwrap();
        store
            .set(POLICY_KEY, ModelState::new(vec![version as u8], version))
            .unwrap();
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let delays: Vec<u64> = Backoff::new(
            Duration::from_millis(50),
            2.0,
            Duration::from_millis(300),
            6,
        )
        .map(|d| d.as_millis() as u64)
        .collect();
        assert_eq!(delays, vec![50, 100, 200, 300, 300, 300]);
    }

    #[test]
    fn test_backoff_zero_retries_is_empty() {
        assert_eq!(quick_backoff(0).count(), 0);
        assert_eq!(quick_backoff(3).size_hint(), (3, Some(3)));
    }

    #[test]
    fn test_first_sync_downloads() {
        let store = MemoryModelStore::new();
        publish(&store, 0);
        let mut sync = VersionSync::new(2, quick_backoff(1));

        match sync.sync(&store).unwrap() {
            SyncOutcome::Updated(models) => {
                assert_eq!(models.version(), 0);
                assert_eq!(models.value.weights, vec![0]);
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert_eq!(sync.local_version(), Some(0));
    }

    #[test]
    fn test_reuse_bound() {
        let store = MemoryModelStore::new();
        publish(&store, 3);
        let mut sync = VersionSync::new(2, quick_backoff(3));
        assert!(matches!(sync.sync(&store).unwrap(), SyncOutcome::Updated(_)));

        for expected in 1..=2 {
            match sync.sync(&store).unwrap() {
                SyncOutcome::Reused {
                    version,
                    reuse_count,
                } => {
                    assert_eq!(version, 3);
                    assert_eq!(reuse_count, expected);
                }
                other => panic!("expected reuse, got {other:?}"),
            }
        }

        // Budget spent, nothing newer arrives.
        let err = sync.sync(&store).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SyncTimeout {
                local_version: Some(3),
                attempts: 3
            }
        ));

        // A timeout does not refill the budget.
        assert_eq!(sync.reuse_count(), 2);
        assert!(sync.sync(&store).is_err());

        publish(&store, 4);
        assert!(matches!(sync.sync(&store).unwrap(), SyncOutcome::Updated(_)));
        assert_eq!(sync.reuse_count(), 0);
    }

    #[test]
    fn test_never_synced_waits_for_first_model() {
        let store = MemoryModelStore::new();
        let mut sync = VersionSync::new(5, quick_backoff(2));
        let err = sync.sync(&store).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SyncTimeout {
                local_version: None,
                ..
            }
        ));
    }

    #[test]
    fn test_backoff_picks_up_late_publish() {
        let store = std::sync::Arc::new(MemoryModelStore::new());
        publish(&store, 1);
        let mut sync = VersionSync::new(0, Backoff::new(
            Duration::from_millis(20),
            1.0,
            Duration::from_millis(20),
            50,
        ));
        assert!(matches!(sync.sync(store.as_ref()).unwrap(), SyncOutcome::Updated(_)));

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(60));
                publish(&store, 2);
            })
        };
        match sync.sync(store.as_ref()).unwrap() {
            SyncOutcome::Updated(models) => assert_eq!(models.version(), 2),
            other => panic!("expected update, got {other:?}"),
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_poll_ignores_same_version() {
        let store = MemoryModelStore::new();
        publish(&store, 2);
        let mut sync = VersionSync::new(0, quick_backoff(0));
        assert!(sync.poll(&store).unwrap().is_some());
        assert!(sync.poll(&store).unwrap().is_none());
        assert_eq!(sync.reuse_count(), 0);
    }
}
