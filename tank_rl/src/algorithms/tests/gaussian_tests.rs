//! Gaussian tensor forms checked against their scalar forms.

use burn::backend::NdArray;
use burn::tensor::Tensor;

use crate::algorithms::gaussian::{
    approx_kl, entropy, kl_divergence, log_prob, sample, HALF_LN_2PI, HALF_LN_2PI_E,
};

type TestBackend = NdArray<f32>;

// ============================================================================
// Per-row references
// ============================================================================

/// Log density of one action vector.
fn log_prob_scalar(action: &[f32], mean: &[f32], log_std: &[f32]) -> f32 {
    debug_assert_eq!(action.len(), mean.len());
    debug_assert_eq!(action.len(), log_std.len());
    action
        .iter()
        .zip(mean)
        .zip(log_std)
        .map(|((&a, &mu), &ls)| {
            let z = (a - mu) / ls.exp();
            -0.5 * z * z - ls - HALF_LN_2PI
        })
        .sum()
}

/// Entropy of one diagonal Gaussian.
fn entropy_scalar(log_std: &[f32]) -> f32 {
    log_std.iter().map(|&ls| ls + HALF_LN_2PI_E).sum()
}

/// Closed-form KL(old ‖ new) for one pair of diagonal Gaussians.
fn kl_scalar(old_mean: &[f32], old_log_std: &[f32], new_mean: &[f32], new_log_std: &[f32]) -> f32 {
    old_mean
        .iter()
        .zip(old_log_std)
        .zip(new_mean.iter().zip(new_log_std))
        .map(|((&mo, &lo), (&mn, &ln))| {
            let var_old = (2.0 * lo).exp();
            let var_new = (2.0 * ln).exp();
            ln - lo + (var_old + (mo - mn).powi(2)) / (2.0 * var_new) - 0.5
        })
        .sum()
}

fn tensor2(data: &[f32], rows: usize, cols: usize) -> Tensor<TestBackend, 2> {
    Tensor::<TestBackend, 1>::from_floats(data, &Default::default()).reshape([rows, cols])
}

fn to_vec<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
    t.into_data().iter::<f32>().collect()
}

#[test]
fn test_entropy_per_dimension_constant() {
    let log_std = tensor2(&[0.0, 0.0, -0.5, 0.3], 2, 2);
    let h = to_vec(entropy(log_std));

    assert!((h[0] - 2.0 * HALF_LN_2PI_E).abs() < 1e-5);
    assert!((h[1] - (-0.5 + 0.3 + 2.0 * HALF_LN_2PI_E)).abs() < 1e-5);
    assert!((h[1] - entropy_scalar(&[-0.5, 0.3])).abs() < 1e-5);
}

#[test]
fn test_log_prob_matches_scalar() {
    let actions = [0.3, -1.2, 0.0, 2.0];
    let means = [0.1, -1.0, 0.5, 1.0];
    let log_stds = [-0.2, 0.4, 0.0, -1.0];

    let lp = to_vec(log_prob(
        tensor2(&actions, 2, 2),
        tensor2(&means, 2, 2),
        tensor2(&log_stds, 2, 2),
    ));

    for row in 0..2 {
        let r = row * 2..row * 2 + 2;
        let expected = log_prob_scalar(&actions[r.clone()], &means[r.clone()], &log_stds[r]);
        assert!((lp[row] - expected).abs() < 1e-5, "row {row}: {} vs {expected}", lp[row]);
    }
}

#[test]
fn test_unit_gaussian_log_prob_at_mean() {
    let expected = -0.5 * (2.0 * std::f32::consts::PI).ln();
    assert!((log_prob_scalar(&[0.0], &[0.0], &[0.0]) - expected).abs() < 1e-6);
}

#[test]
fn test_kl_zero_for_identical_distributions() {
    let mean = tensor2(&[0.2, -0.4], 1, 2);
    let log_std = tensor2(&[0.1, -0.3], 1, 2);
    let kl = to_vec(kl_divergence(mean.clone(), log_std.clone(), mean, log_std));
    assert!(kl[0].abs() < 1e-6);
}

#[test]
fn test_kl_matches_scalar_and_is_positive() {
    let (om, ol, nm, nl) = ([0.0, 1.0], [0.0, -0.5], [0.3, 0.6], [0.2, -0.4]);
    let kl = to_vec(kl_divergence(
        tensor2(&om, 1, 2),
        tensor2(&ol, 1, 2),
        tensor2(&nm, 1, 2),
        tensor2(&nl, 1, 2),
    ));
    let expected = kl_scalar(&om, &ol, &nm, &nl);
    assert!(expected > 0.0);
    assert!((kl[0] - expected).abs() < 1e-5);
}

/// KL of a pure mean shift with unit variance is Δ²/2.
#[test]
fn test_kl_mean_shift() {
    let kl = kl_scalar(&[0.0], &[0.0], &[1.0], &[0.0]);
    assert!((kl - 0.5).abs() < 1e-6);
}

#[test]
fn test_sample_shapes_and_consistency() {
    let mean = tensor2(&[0.0; 16], 8, 2);
    let log_std = tensor2(&[-1.0; 16], 8, 2);

    let (actions, log_probs) = sample(mean.clone(), log_std.clone());
    assert_eq!(actions.dims(), [8, 2]);
    assert_eq!(log_probs.dims(), [8]);

    let recomputed = to_vec(log_prob(actions, mean, log_std));
    for (a, b) in to_vec(log_probs).iter().zip(&recomputed) {
        assert!(a.is_finite());
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn test_approx_kl() {
    assert_eq!(approx_kl(&[], &[]), 0.0);
    assert!((approx_kl(&[-1.0, -2.0], &[-1.5, -2.5]) - 0.5).abs() < 1e-6);
}
