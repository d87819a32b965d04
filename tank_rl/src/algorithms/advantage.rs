//! Advantage estimation strategy selected by configuration.
//!
//! One pipeline serves both the on-policy and the staleness-tolerant path;
//! only the estimator changes.
//!
//! | Variant | Where it runs | Uses ratios |
//! |---------|---------------|-------------|
//! | `Gae` | actor, when the episode closes | no |
//! | `VTrace` | learner, against the current policy | yes |

use crate::config::{AdvantageMode, TrainingConfig};

use super::gae::compute_gae;
use super::vtrace::compute_vtrace;

/// Advantages and value targets for one trajectory segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimates {
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
}

/// Per-step inputs to an estimator.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorInput<'a> {
    pub rewards: &'a [f32],
    pub values: &'a [f32],
    pub dones: &'a [bool],
    /// π_new / π_old per step. `None` means on-policy (all ones).
    pub ratios: Option<&'a [f32]>,
    /// V(s_T) past the final step
    pub bootstrap_value: f32,
}

impl<'a> EstimatorInput<'a> {
    /// On-policy input with no bootstrap.
    pub fn new(rewards: &'a [f32], values: &'a [f32], dones: &'a [bool]) -> Self {
        Self {
            rewards,
            values,
            dones,
            ratios: None,
            bootstrap_value: 0.0,
        }
    }

    pub fn with_ratios(mut self, ratios: &'a [f32]) -> Self {
        self.ratios = Some(ratios);
        self
    }

    pub fn with_bootstrap(mut self, value: f32) -> Self {
        self.bootstrap_value = value;
        self
    }
}

/// Advantage estimator strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdvantageEstimator {
    Gae { gamma: f32, lambda: f32 },
    VTrace { gamma: f32, clip_rho: f32, clip_c: f32 },
}

impl AdvantageEstimator {
    pub fn from_config(config: &TrainingConfig) -> Self {
        match config.advantage {
            AdvantageMode::Gae => AdvantageEstimator::Gae {
                gamma: config.gamma,
                lambda: config.gae_lambda,
            },
            AdvantageMode::VTrace { clip_rho, clip_c } => AdvantageEstimator::VTrace {
                gamma: config.gamma,
                clip_rho,
                clip_c,
            },
        }
    }

    /// Whether batches must be re-estimated by the learner at consumption.
    pub fn is_off_policy(&self) -> bool {
        matches!(self, AdvantageEstimator::VTrace { .. })
    }

    pub fn gamma(&self) -> f32 {
        match *self {
            AdvantageEstimator::Gae { gamma, .. } | AdvantageEstimator::VTrace { gamma, .. } => {
                gamma
            }
        }
    }

    pub fn estimate(&self, input: &EstimatorInput<'_>) -> Estimates {
        match *self {
            AdvantageEstimator::Gae { gamma, lambda } => compute_gae(
                input.rewards,
                input.values,
                input.dones,
                input.bootstrap_value,
                gamma,
                lambda,
            ),
            AdvantageEstimator::VTrace {
                gamma,
                clip_rho,
                clip_c,
            } => {
                let ones;
                let ratios = match input.ratios {
                    Some(r) => r,
                    None => {
                        ones = vec![1.0f32; input.rewards.len()];
                        &ones
                    }
                };
                let result = compute_vtrace(
                    ratios,
                    input.rewards,
                    input.values,
                    input.dones,
                    input.bootstrap_value,
                    gamma,
                    clip_rho,
                    clip_c,
                );
                Estimates {
                    advantages: result.advantages,
                    returns: result.vs,
                }
            }
        }
    }
}
