//! Flattened training batches.
//!
//! ```text
//! Actor                 Transport                 Learner
//! ┌──────────────┐      ┌─────────────────┐      ┌──────────────────────┐
//! │ Trajectory   │ ───► │ VersionedBatch  │ ───► │ staleness scaling     │
//! │ Memory       │      │ {version, batch}│      │ concat → minibatches │
//! └──────────────┘      └─────────────────┘      └──────────────────────┘
//! ```
//!
//! Feature arrays (`states`, `actions`, `means`, `log_stds`) are row-major
//! `[size, dim]`. Every per-step array has length `size` and the final step
//! is always terminal. A `Batch` cannot be mutated in place; transformations
//! consume it and return a new one.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Raw, unvalidated batch contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchParts {
    pub obs_dim: usize,
    pub action_dim: usize,
    pub states: Vec<f32>,
    pub actions: Vec<f32>,
    pub means: Vec<f32>,
    pub log_stds: Vec<f32>,
    pub log_probs: Vec<f32>,
    pub values: Vec<f32>,
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
}

/// Immutable, shape-checked batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BatchParts", into = "BatchParts")]
pub struct Batch {
    size: usize,
    parts: BatchParts,
}

impl TryFrom<BatchParts> for Batch {
    type Error = PipelineError;

    fn try_from(parts: BatchParts) -> Result<Self, Self::Error> {
        Batch::new(parts)
    }
}

impl From<Batch> for BatchParts {
    fn from(batch: Batch) -> Self {
        batch.parts
    }
}

impl Batch {
    /// Validate and wrap batch contents.
    pub fn new(parts: BatchParts) -> Result<Self, PipelineError> {
        let size = parts.rewards.len();
        if size == 0 {
            return Err(PipelineError::InvalidBatch("batch has no steps".into()));
        }
        if parts.obs_dim == 0 || parts.action_dim == 0 {
            return Err(PipelineError::InvalidBatch(format!(
                "zero feature dimension (obs_dim={}, action_dim={})",
                parts.obs_dim, parts.action_dim
            )));
        }

        let per_step = [
            ("log_probs", parts.log_probs.len()),
            ("values", parts.values.len()),
            ("advantages", parts.advantages.len()),
            ("returns", parts.returns.len()),
            ("dones", parts.dones.len()),
        ];
        for (name, len) in per_step {
            if len != size {
                return Err(PipelineError::InvalidBatch(format!(
                    "{name} has length {len}, expected {size}"
                )));
            }
        }

        let features = [
            ("states", parts.states.len(), parts.obs_dim),
            ("actions", parts.actions.len(), parts.action_dim),
            ("means", parts.means.len(), parts.action_dim),
            ("log_stds", parts.log_stds.len(), parts.action_dim),
        ];
        for (name, len, dim) in features {
            if len != size * dim {
                return Err(PipelineError::InvalidBatch(format!(
                    "{name} has length {len}, expected {size} x {dim}"
                )));
            }
        }

        if !parts.dones[size - 1] {
            return Err(PipelineError::InvalidBatch(
                "final step must be terminal".into(),
            ));
        }

        Ok(Self { size, parts })
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn obs_dim(&self) -> usize {
        self.parts.obs_dim
    }

    pub fn action_dim(&self) -> usize {
        self.parts.action_dim
    }

    pub fn states(&self) -> &[f32] {
        &self.parts.states
    }

    pub fn actions(&self) -> &[f32] {
        &self.parts.actions
    }

    pub fn means(&self) -> &[f32] {
        &self.parts.means
    }

    pub fn log_stds(&self) -> &[f32] {
        &self.parts.log_stds
    }

    pub fn log_probs(&self) -> &[f32] {
        &self.parts.log_probs
    }

    pub fn values(&self) -> &[f32] {
        &self.parts.values
    }

    pub fn advantages(&self) -> &[f32] {
        &self.parts.advantages
    }

    pub fn returns(&self) -> &[f32] {
        &self.parts.returns
    }

    pub fn rewards(&self) -> &[f32] {
        &self.parts.rewards
    }

    pub fn dones(&self) -> &[bool] {
        &self.parts.dones
    }

    pub fn into_parts(self) -> BatchParts {
        self.parts
    }

    /// Replace advantages and returns, e.g. after learner-side re-estimation.
    pub fn with_estimates(
        self,
        advantages: Vec<f32>,
        returns: Vec<f32>,
    ) -> Result<Self, PipelineError> {
        let mut parts = self.parts;
        parts.advantages = advantages;
        parts.returns = returns;
        Batch::new(parts)
    }

    /// Multiply every advantage by `trust`.
    pub fn scale_advantages(mut self, trust: f32) -> Self {
        for adv in &mut self.parts.advantages {
            *adv *= trust;
        }
        self
    }

    /// Concatenate batches in order.
    ///
    /// All batches must share feature dimensions. The result is terminal at
    /// its last step because every input is.
    pub fn concat(batches: Vec<Batch>) -> Result<Self, PipelineError> {
        let mut iter = batches.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| PipelineError::InvalidBatch("nothing to concatenate".into()))?;
        let mut parts = first.parts;

        for batch in iter {
            if batch.obs_dim() != parts.obs_dim || batch.action_dim() != parts.action_dim {
                return Err(PipelineError::InvalidBatch(format!(
                    "dimension mismatch: ({}, {}) vs ({}, {})",
                    parts.obs_dim,
                    parts.action_dim,
                    batch.obs_dim(),
                    batch.action_dim()
                )));
            }
            let other = batch.parts;
            parts.states.extend(other.states);
            parts.actions.extend(other.actions);
            parts.means.extend(other.means);
            parts.log_stds.extend(other.log_stds);
            parts.log_probs.extend(other.log_probs);
            parts.values.extend(other.values);
            parts.advantages.extend(other.advantages);
            parts.returns.extend(other.returns);
            parts.rewards.extend(other.rewards);
            parts.dones.extend(other.dones);
        }

        Batch::new(parts)
    }

    /// Gather rows into a minibatch. Indices must be `< len()`.
    pub fn gather(&self, indices: &[usize]) -> Minibatch {
        let obs_dim = self.obs_dim();
        let action_dim = self.action_dim();
        let n = indices.len();

        let mut mb = Minibatch {
            len: n,
            obs_dim,
            action_dim,
            states: Vec::with_capacity(n * obs_dim),
            actions: Vec::with_capacity(n * action_dim),
            means: Vec::with_capacity(n * action_dim),
            log_stds: Vec::with_capacity(n * action_dim),
            log_probs: Vec::with_capacity(n),
            values: Vec::with_capacity(n),
            advantages: Vec::with_capacity(n),
            returns: Vec::with_capacity(n),
        };

        let p = &self.parts;
        for &i in indices {
            mb.states.extend_from_slice(&p.states[i * obs_dim..(i + 1) * obs_dim]);
            mb.actions.extend_from_slice(&p.actions[i * action_dim..(i + 1) * action_dim]);
            mb.means.extend_from_slice(&p.means[i * action_dim..(i + 1) * action_dim]);
            mb.log_stds.extend_from_slice(&p.log_stds[i * action_dim..(i + 1) * action_dim]);
            mb.log_probs.push(p.log_probs[i]);
            mb.values.push(p.values[i]);
            mb.advantages.push(p.advantages[i]);
            mb.returns.push(p.returns[i]);
        }

        mb
    }
}

/// Rows selected for one optimizer step. Not subject to batch invariants.
#[derive(Debug, Clone, PartialEq)]
pub struct Minibatch {
    pub len: usize,
    pub obs_dim: usize,
    pub action_dim: usize,
    pub states: Vec<f32>,
    pub actions: Vec<f32>,
    pub means: Vec<f32>,
    pub log_stds: Vec<f32>,
    pub log_probs: Vec<f32>,
    pub values: Vec<f32>,
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
}

/// A batch stamped with the policy version that generated it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedBatch {
    pub version: u64,
    pub actor_id: usize,
    pub batch: Batch,
}

impl VersionedBatch {
    pub fn new(version: u64, actor_id: usize, batch: Batch) -> Self {
        Self {
            version,
            actor_id,
            batch,
        }
    }

    /// Versions this batch trails `current` by.
    pub fn lag(&self, current: u64) -> u64 {
        current.saturating_sub(self.version)
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}
