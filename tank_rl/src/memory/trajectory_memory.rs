//! Trajectory memory for one rollout producer.
//!
//! Each decision step arrives in two halves:
//!
//! ```text
//! observe ─► add_first_part(state, action, mean, log_std, log_prob, value)
//! env.act ─► update_second_part(reward, done)
//! ```
//!
//! Once a `done` outcome is recorded the trajectory is closed and further
//! calls are ignored until [`TrajectoryMemory::dispose`]. The two halves can
//! drift apart under partial failures, so batching always truncates to the
//! shortest array first.

use crate::algorithms::advantage::{AdvantageEstimator, EstimatorInput};
use crate::core::batch::{Batch, BatchParts};
use crate::core::transition::Transition;
use crate::error::PipelineError;

/// Struct-of-arrays storage for one trajectory segment.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryMemory {
    obs_dim: Option<usize>,
    action_dim: Option<usize>,

    // Decision half
    states: Vec<f32>,
    actions: Vec<f32>,
    means: Vec<f32>,
    log_stds: Vec<f32>,
    log_probs: Vec<f32>,
    values: Vec<f32>,

    // Outcome half
    rewards: Vec<f32>,
    dones: Vec<bool>,

    closed: bool,
    warmup: usize,
}

impl TrajectoryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the first `steps` aligned steps whenever a batch is built.
    pub fn with_warmup(mut self, steps: usize) -> Self {
        self.warmup = steps;
        self
    }

    /// Record the decision half of a step.
    ///
    /// Returns `false` without recording when the trajectory is closed or the
    /// feature widths disagree with earlier steps.
    pub fn add_first_part(
        &mut self,
        state: &[f32],
        action: &[f32],
        mean: &[f32],
        log_std: &[f32],
        log_prob: f32,
        value: f32,
    ) -> bool {
        if self.closed {
            log::debug!("add_first_part ignored: trajectory already closed");
            return false;
        }
        if mean.len() != action.len() || log_std.len() != action.len() {
            log::warn!(
                "add_first_part ignored: action/mean/log_std widths {}/{}/{}",
                action.len(),
                mean.len(),
                log_std.len()
            );
            return false;
        }
        let obs_dim = *self.obs_dim.get_or_insert(state.len());
        let action_dim = *self.action_dim.get_or_insert(action.len());
        if state.len() != obs_dim || action.len() != action_dim {
            log::warn!(
                "add_first_part ignored: expected widths ({obs_dim}, {action_dim}), got ({}, {})",
                state.len(),
                action.len()
            );
            return false;
        }

        self.states.extend_from_slice(state);
        self.actions.extend_from_slice(action);
        self.means.extend_from_slice(mean);
        self.log_stds.extend_from_slice(log_std);
        self.log_probs.push(log_prob);
        self.values.push(value);
        true
    }

    /// Record the outcome half of a step. A `done` outcome closes the trajectory.
    pub fn update_second_part(&mut self, reward: f32, done: bool) -> bool {
        if self.closed {
            log::debug!("update_second_part ignored: trajectory already closed");
            return false;
        }
        self.rewards.push(reward);
        self.dones.push(done);
        if done {
            self.closed = true;
        }
        true
    }

    /// Record both halves at once.
    pub fn push(&mut self, transition: &Transition) -> bool {
        self.add_first_part(
            &transition.state,
            &transition.action,
            &transition.action_mean,
            &transition.action_log_std,
            transition.log_prob,
            transition.value,
        ) && self.update_second_part(transition.reward, transition.done)
    }

    /// Close the trajectory without a terminal outcome (episode truncated).
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of steps with both halves recorded.
    pub fn len(&self) -> usize {
        self.log_probs.len().min(self.rewards.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a GAE batch from the recorded steps.
    pub fn get_batch(&self, gamma: f32, lambda: f32) -> Result<Batch, PipelineError> {
        self.get_batch_with(&AdvantageEstimator::Gae { gamma, lambda })
    }

    /// Build a batch with an explicit estimator.
    ///
    /// Truncates to the common length, drops warm-up steps, forces the final
    /// step terminal and runs the estimator with a zero bootstrap.
    pub fn get_batch_with(&self, estimator: &AdvantageEstimator) -> Result<Batch, PipelineError> {
        let n = self.len();
        if n <= self.warmup {
            return Err(PipelineError::EmptyMemory);
        }
        let (obs_dim, action_dim) = match (self.obs_dim, self.action_dim) {
            (Some(o), Some(a)) => (o, a),
            _ => return Err(PipelineError::EmptyMemory),
        };

        let range = self.warmup..n;
        let rewards = self.rewards[range.clone()].to_vec();
        let values = self.values[range.clone()].to_vec();
        let mut dones = self.dones[range.clone()].to_vec();
        if let Some(last) = dones.last_mut() {
            *last = true;
        }

        let estimates = estimator.estimate(&EstimatorInput::new(&rewards, &values, &dones));

        let features = |data: &[f32], dim: usize| data[range.start * dim..range.end * dim].to_vec();
        Batch::new(BatchParts {
            obs_dim,
            action_dim,
            states: features(&self.states, obs_dim),
            actions: features(&self.actions, action_dim),
            means: features(&self.means, action_dim),
            log_stds: features(&self.log_stds, action_dim),
            log_probs: self.log_probs[range].to_vec(),
            values,
            advantages: estimates.advantages,
            returns: estimates.returns,
            rewards,
            dones,
        })
    }

    /// Clear everything and reopen for the next episode.
    pub fn dispose(&mut self) {
        let warmup = self.warmup;
        *self = Self::default();
        self.warmup = warmup;
    }
}
