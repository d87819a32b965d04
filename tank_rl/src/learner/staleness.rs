//! Staleness correction for incoming batches.
//!
//! A batch generated at policy version `v` reaching a learner at version
//! `current` trails it by `lag = current - v`:
//!
//! | lag | action |
//! |-----|--------|
//! | `> max_lag` | dropped, one `StaleBatchDropped` record |
//! | otherwise | advantages scaled by `trust = max(0, 1 - trust_coeff · lag)` |
//!
//! Admitted batches are returned freshest first.

use crate::config::TrainingConfig;
use crate::core::batch::VersionedBatch;
use crate::error::PipelineError;

/// A batch admitted for training.
#[derive(Debug, Clone)]
pub struct AdmittedBatch {
    /// Batch with advantages already multiplied by `trust`
    pub batch: VersionedBatch,
    pub lag: u64,
    pub trust: f32,
}

/// Result of correcting one accumulation round.
#[derive(Debug, Default)]
pub struct Correction {
    /// Ordered by ascending lag
    pub admitted: Vec<AdmittedBatch>,
    /// One `StaleBatchDropped` per discarded batch
    pub dropped: Vec<PipelineError>,
}

impl Correction {
    pub fn admitted_rows(&self) -> usize {
        self.admitted.iter().map(|a| a.batch.len()).sum()
    }

    pub fn lags(&self) -> Vec<u64> {
        self.admitted.iter().map(|a| a.lag).collect()
    }
}

/// Lag-based discounting and dropping.
#[derive(Debug, Clone, Copy)]
pub struct StalenessCorrector {
    trust_coeff: f32,
    max_lag: u64,
}

impl StalenessCorrector {
    pub fn new(trust_coeff: f32, max_lag: u64) -> Self {
        Self {
            trust_coeff,
            max_lag,
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(config.trust_coeff, config.max_lag)
    }

    pub fn max_lag(&self) -> u64 {
        self.max_lag
    }

    /// Advantage multiplier for a batch `lag` versions behind.
    pub fn trust(&self, lag: u64) -> f32 {
        (1.0 - self.trust_coeff * lag as f32).max(0.0)
    }

    /// Admit or drop a single batch.
    pub fn admit(&self, batch: VersionedBatch, current: u64) -> Result<AdmittedBatch, PipelineError> {
        let lag = batch.lag(current);
        if lag > self.max_lag {
            log::warn!(
                "stale batch dropped: actor_id={} version={} current={current} lag={lag} max_lag={}",
                batch.actor_id,
                batch.version,
                self.max_lag
            );
            return Err(PipelineError::StaleBatchDropped {
                actor_id: batch.actor_id,
                version: batch.version,
                lag,
                max_lag: self.max_lag,
            });
        }

        let trust = self.trust(lag);
        let VersionedBatch {
            version,
            actor_id,
            batch,
        } = batch;
        Ok(AdmittedBatch {
            batch: VersionedBatch::new(version, actor_id, batch.scale_advantages(trust)),
            lag,
            trust,
        })
    }

    /// Correct a whole accumulation round against `current`.
    pub fn correct(&self, batches: Vec<VersionedBatch>, current: u64) -> Correction {
        let mut correction = Correction::default();
        for batch in batches {
            match self.admit(batch, current) {
                Ok(admitted) => correction.admitted.push(admitted),
                Err(dropped) => correction.dropped.push(dropped),
            }
        }
        correction.admitted.sort_by_key(|a| a.lag);
        correction
    }
}
