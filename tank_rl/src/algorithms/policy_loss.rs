//! PPO surrogate and clipped value losses.
//!
//! Log ratios are clamped to [-20, 20] before `exp` so a wildly stale
//! minibatch cannot overflow.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::vtrace::MAX_LOG_RATIO;

/// PPO clipped surrogate loss.
///
/// ```text
/// ratio  = exp(log π_θ - log π_old)
/// L      = -mean(min(ratio A, clip(ratio, 1-ε, 1+ε) A))
/// ```
///
/// Returns a single-element tensor.
pub fn ppo_clip_loss<B: Backend>(
    log_probs: Tensor<B, 1>,
    old_log_probs: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
    clip_ratio: f32,
) -> Tensor<B, 1> {
    let ratio = (log_probs - old_log_probs)
        .clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO)
        .exp();
    let clipped = ratio.clone().clamp(1.0 - clip_ratio, 1.0 + clip_ratio);

    let surr1 = ratio * advantages.clone();
    let surr2 = clipped * advantages;

    -surr1.min_pair(surr2).mean()
}

/// PPO2-style clipped value loss.
///
/// ```text
/// v_clip = v_old + clip(v - v_old, -ε_v, ε_v)
/// L      = ½ mean(max((R - v)², (R - v_clip)²))
/// ```
pub fn clipped_value_loss<B: Backend>(
    values: Tensor<B, 1>,
    old_values: Tensor<B, 1>,
    returns: Tensor<B, 1>,
    clip_value: f32,
) -> Tensor<B, 1> {
    let clipped = old_values.clone() + (values.clone() - old_values).clamp(-clip_value, clip_value);

    let unclipped_err = (returns.clone() - values).powf_scalar(2.0);
    let clipped_err = (returns - clipped).powf_scalar(2.0);

    unclipped_err.max_pair(clipped_err).mean().mul_scalar(0.5)
}
