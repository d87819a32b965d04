//! Numerical health checks for the learner.
//!
//! - loss scalars must be finite, otherwise the minibatch is skipped
//! - a fixed canary observation must produce finite outputs, otherwise the
//!   networks are reloaded from the store

use burn::prelude::*;

use crate::error::PipelineError;
use crate::nn::{rows_tensor, to_vec, GaussianPolicy, ValueFunction};

/// Deterministic canary observation, `x_i = sin(0.37 (i + 1))`.
pub fn canary_input(obs_size: usize) -> Vec<f32> {
    (0..obs_size).map(|i| (0.37 * (i + 1) as f32).sin()).collect()
}

/// Finite-loss and canary checks.
#[derive(Debug, Clone)]
pub struct HealthGuard {
    canary: Vec<f32>,
}

impl HealthGuard {
    pub fn new(obs_size: usize) -> Self {
        Self {
            canary: canary_input(obs_size),
        }
    }

    pub fn canary(&self) -> &[f32] {
        &self.canary
    }

    /// Fail on the first non-finite loss.
    pub fn check_losses(&self, losses: &[(&'static str, f32)]) -> Result<(), PipelineError> {
        match losses.iter().find(|(_, value)| !value.is_finite()) {
            Some(&(name, value)) => Err(PipelineError::NonFiniteLoss { name, value }),
            None => Ok(()),
        }
    }

    /// Run both networks on the canary observation.
    pub fn check_canary<B, P, V>(
        &self,
        policy: &P,
        value: &V,
        device: &B::Device,
    ) -> Result<(), PipelineError>
    where
        B: Backend,
        P: GaussianPolicy<B>,
        V: ValueFunction<B>,
    {
        let obs_size = self.canary.len();
        let obs = || rows_tensor::<B>(&self.canary, 1, obs_size, device);

        let out = policy.forward(obs());
        let checks = [
            ("mean", to_vec(out.mean)),
            ("log_std", to_vec(out.log_std)),
            ("value", to_vec(value.forward(obs()))),
        ];
        for (name, values) in checks {
            if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
                return Err(PipelineError::ModelCorrupted(format!(
                    "canary {name} is {bad}"
                )));
            }
        }
        Ok(())
    }
}
