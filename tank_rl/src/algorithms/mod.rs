//! Advantage estimation and PPO loss components.
//!
//! - `gae`: Generalized Advantage Estimation (on-policy path)
//! - `vtrace`: V-trace correction (staleness-tolerant path)
//! - `advantage`: config-selected estimator strategy over both
//! - `gaussian`: diagonal Gaussian log-prob, entropy, KL and sampling
//! - `policy_loss`: PPO clipped surrogate and clipped value loss

pub mod advantage;
pub mod gae;
pub mod gaussian;
pub mod policy_loss;
pub mod vtrace;

#[cfg(test)]
mod tests;

pub use advantage::{AdvantageEstimator, EstimatorInput, Estimates};
pub use gae::{compute_gae, normalize_advantages};
pub use gaussian::{approx_kl, entropy, kl_divergence, log_prob, sample};
pub use policy_loss::{clipped_value_loss, ppo_clip_loss};
pub use vtrace::{compute_vtrace, compute_vtrace_from_log_probs, importance_ratios, VTraceResult};
