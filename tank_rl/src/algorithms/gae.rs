//! Generalized Advantage Estimation.
//!
//! Backward pass over one trajectory segment:
//!
//! ```text
//! δ_t = r_t + γ V(s_{t+1}) (1 - d_t) - V(s_t)
//! A_t = δ_t + γ λ (1 - d_t) A_{t+1}        A_{T} = 0
//! R_t = A_t + V(s_t)
//! ```
//!
//! λ = 0 gives one-step TD, λ = 1 gives Monte Carlo returns minus the baseline.

use super::advantage::Estimates;

/// Compute GAE advantages and returns for a single trajectory.
///
/// `last_value` bootstraps V(s_T) past the final step; it is ignored when the
/// final step is terminal.
///
/// # Panics
///
/// Panics if `values` or `dones` differ in length from `rewards`.
pub fn compute_gae(
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    last_value: f32,
    gamma: f32,
    gae_lambda: f32,
) -> Estimates {
    let n = rewards.len();
    assert_eq!(values.len(), n, "values/rewards length mismatch");
    assert_eq!(dones.len(), n, "dones/rewards length mismatch");

    let mut advantages = vec![0.0f32; n];
    let mut returns = vec![0.0f32; n];
    let mut running = 0.0f32;
    let mut next_value = last_value;

    for t in (0..n).rev() {
        let live = if dones[t] { 0.0 } else { 1.0 };
        let delta = rewards[t] + gamma * next_value * live - values[t];
        running = delta + gamma * gae_lambda * live * running;

        advantages[t] = running;
        returns[t] = running + values[t];
        next_value = values[t];
    }

    Estimates {
        advantages,
        returns,
    }
}

/// Normalize advantages to zero mean and unit variance in place.
///
/// Empty input is a no-op; a single element is zero-centred.
pub fn normalize_advantages(advantages: &mut [f32]) {
    match advantages.len() {
        0 => {}
        1 => advantages[0] = 0.0,
        len => {
            let n = len as f32;
            let mean = advantages.iter().sum::<f32>() / n;
            let variance = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / n;
            let std = (variance + 1e-8).sqrt();
            for a in advantages.iter_mut() {
                *a = (*a - mean) / std;
            }
        }
    }
}
