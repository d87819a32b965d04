//! Diagonal Gaussian policy utilities.
//!
//! Actions are unsquashed samples `a = μ + σ ε`. The tensor forms are
//! differentiable and operate on `[rows, action_dim]` batches.
//!
//! ```text
//! log N(a; μ, σ)      = Σ_d  -½((a-μ)/σ)² - log σ - ½ log 2π
//! H(N(μ, σ))          = Σ_d  log σ + ½ log(2πe)
//! KL(old ‖ new)       = Σ_d  log σ_n - log σ_o + (σ_o² + (μ_o-μ_n)²) / 2σ_n² - ½
//! ```

use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

/// Lower bound models apply to their log standard deviation.
pub const LOG_STD_MIN: f32 = -20.0;
/// Upper bound models apply to their log standard deviation.
pub const LOG_STD_MAX: f32 = 2.0;

pub(crate) const HALF_LN_2PI: f32 = 0.918_938_5;
/// ½ log(2πe), the per-dimension entropy of a unit Gaussian.
pub const HALF_LN_2PI_E: f32 = 1.418_938_5;

/// Sample actions and their log probabilities.
///
/// Returns `(actions [batch, dim], log_probs [batch])`.
pub fn sample<B: Backend>(mean: Tensor<B, 2>, log_std: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>) {
    let device = mean.device();
    let noise: Tensor<B, 2> = Tensor::random(mean.dims(), Distribution::Normal(0.0, 1.0), &device);
    let actions = mean.clone() + log_std.clone().exp() * noise;
    let log_probs = log_prob(actions.clone(), mean, log_std);
    (actions, log_probs)
}

/// Log density of `actions` summed over action dimensions: `[batch]`.
pub fn log_prob<B: Backend>(
    actions: Tensor<B, 2>,
    mean: Tensor<B, 2>,
    log_std: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let z = (actions - mean) / log_std.clone().exp();
    let per_dim = z.powf_scalar(2.0).mul_scalar(-0.5) - log_std;
    per_dim.sub_scalar(HALF_LN_2PI).sum_dim(1).flatten(0, 1)
}

/// Per-sample entropy: `[batch]`.
pub fn entropy<B: Backend>(log_std: Tensor<B, 2>) -> Tensor<B, 1> {
    log_std.add_scalar(HALF_LN_2PI_E).sum_dim(1).flatten(0, 1)
}

/// Closed-form KL(old ‖ new) per sample: `[batch]`.
pub fn kl_divergence<B: Backend>(
    old_mean: Tensor<B, 2>,
    old_log_std: Tensor<B, 2>,
    new_mean: Tensor<B, 2>,
    new_log_std: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let var_old = old_log_std.clone().mul_scalar(2.0).exp();
    let var_new = new_log_std.clone().mul_scalar(2.0).exp();
    let mean_gap = (old_mean - new_mean).powf_scalar(2.0);

    let per_dim = (new_log_std - old_log_std) + (var_old + mean_gap) / var_new.mul_scalar(2.0);
    per_dim.sub_scalar(0.5).sum_dim(1).flatten(0, 1)
}

/// Sample-based KL estimate `mean(old_log_prob - new_log_prob)`.
pub fn approx_kl(old_log_probs: &[f32], new_log_probs: &[f32]) -> f32 {
    debug_assert_eq!(old_log_probs.len(), new_log_probs.len());
    if old_log_probs.is_empty() {
        return 0.0;
    }
    let total: f32 = old_log_probs
        .iter()
        .zip(new_log_probs)
        .map(|(old, new)| old - new)
        .sum();
    total / old_log_probs.len() as f32
}
