//! PPO surrogate and clipped value loss.

use burn::backend::NdArray;
use burn::tensor::{ElementConversion, Tensor};

use crate::algorithms::policy_loss::{clipped_value_loss, ppo_clip_loss};
use crate::algorithms::vtrace::MAX_LOG_RATIO;

type TestBackend = NdArray<f32>;

/// Per-row reference for [`ppo_clip_loss`].
fn ppo_clip_loss_scalar(
    log_probs: &[f32],
    old_log_probs: &[f32],
    advantages: &[f32],
    clip_ratio: f32,
) -> f32 {
    let n = log_probs.len();
    assert_eq!(old_log_probs.len(), n);
    assert_eq!(advantages.len(), n);
    if n == 0 {
        return 0.0;
    }

    let objective: f32 = (0..n)
        .map(|i| {
            let log_ratio = log_probs[i] - old_log_probs[i];
            let ratio = if log_ratio.is_finite() {
                log_ratio.clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO).exp()
            } else {
                1.0
            };
            let clipped = ratio.clamp(1.0 - clip_ratio, 1.0 + clip_ratio);
            (ratio * advantages[i]).min(clipped * advantages[i])
        })
        .sum();

    -objective / n as f32
}

/// Per-row reference for [`clipped_value_loss`].
fn clipped_value_loss_scalar(
    values: &[f32],
    old_values: &[f32],
    returns: &[f32],
    clip_value: f32,
) -> f32 {
    let n = values.len();
    assert_eq!(old_values.len(), n);
    assert_eq!(returns.len(), n);
    if n == 0 {
        return 0.0;
    }

    let total: f32 = (0..n)
        .map(|i| {
            let clipped = old_values[i] + (values[i] - old_values[i]).clamp(-clip_value, clip_value);
            let a = (returns[i] - values[i]).powi(2);
            let b = (returns[i] - clipped).powi(2);
            a.max(b)
        })
        .sum();

    0.5 * total / n as f32
}

fn tensor1(data: &[f32]) -> Tensor<TestBackend, 1> {
    Tensor::from_floats(data, &Default::default())
}

fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
    t.into_scalar().elem::<f32>()
}

// ============================================================================
// Policy loss
// ============================================================================

/// Identical policies give ratio 1 and loss -mean(A).
#[test]
fn test_on_policy_loss_is_negative_mean_advantage() {
    let lp = [-1.0, -0.5, -2.0];
    let adv = [1.0, -2.0, 4.0];
    let loss = ppo_clip_loss_scalar(&lp, &lp, &adv, 0.2);
    assert!((loss - (-1.0)).abs() < 1e-6);
}

/// Positive advantage: the ratio gain is capped at 1 + ε.
#[test]
fn test_positive_advantage_ratio_capped() {
    let loss = ppo_clip_loss_scalar(&[0.0], &[-1.0], &[2.0], 0.2);
    assert!((loss - (-1.2 * 2.0)).abs() < 1e-5);
}

/// Negative advantage: the pessimistic bound keeps the unclipped large ratio.
#[test]
fn test_negative_advantage_takes_pessimistic_term() {
    let ratio = 1.0f32.exp();
    let loss = ppo_clip_loss_scalar(&[0.0], &[-1.0], &[-1.0], 0.2);
    assert!((loss - ratio).abs() < 1e-4);
}

#[test]
fn test_tensor_policy_loss_matches_scalar() {
    let lp = [-0.9, -1.4, -0.2, -3.0];
    let old = [-1.0, -1.0, -1.0, -1.0];
    let adv = [0.5, -1.5, 2.0, -0.3];

    let expected = ppo_clip_loss_scalar(&lp, &old, &adv, 0.2);
    let actual = scalar(ppo_clip_loss(tensor1(&lp), tensor1(&old), tensor1(&adv), 0.2));
    assert!((expected - actual).abs() < 1e-5);
}

#[test]
fn test_extreme_log_ratio_stays_finite() {
    let loss = ppo_clip_loss_scalar(&[0.0], &[-500.0], &[-1.0], 0.2);
    assert!(loss.is_finite());
}

// ============================================================================
// Value loss
// ============================================================================

/// Within the clip window the loss is ½ MSE.
#[test]
fn test_value_loss_inside_clip_is_half_mse() {
    let loss = clipped_value_loss_scalar(&[1.1], &[1.0], &[2.0], 0.2);
    assert!((loss - 0.5 * 0.81).abs() < 1e-5);
}

/// A prediction moving far past the window is penalised at the larger error.
#[test]
fn test_value_loss_takes_max_of_clipped_and_unclipped() {
    // v jumps from 0 to 3 towards a return of 1: clipped v is 0.2.
    let loss = clipped_value_loss_scalar(&[3.0], &[0.0], &[1.0], 0.2);
    let unclipped = (1.0f32 - 3.0).powi(2);
    let clipped = (1.0f32 - 0.2).powi(2);
    assert!((loss - 0.5 * unclipped.max(clipped)).abs() < 1e-5);

    // Moving towards the return but overshooting the window keeps the clipped error.
    let loss = clipped_value_loss_scalar(&[0.9], &[0.0], &[1.0], 0.2);
    assert!((loss - 0.5 * clipped).abs() < 1e-5);
}

#[test]
fn test_tensor_value_loss_matches_scalar() {
    let v = [0.5, 2.0, -1.0];
    let old = [0.4, 1.0, 0.0];
    let ret = [1.0, 1.5, -0.5];

    let expected = clipped_value_loss_scalar(&v, &old, &ret, 0.2);
    let actual = scalar(clipped_value_loss(tensor1(&v), tensor1(&old), tensor1(&ret), 0.2));
    assert!((expected - actual).abs() < 1e-5);
}
