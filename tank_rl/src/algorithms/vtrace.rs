//! V-trace off-policy correction.
//!
//! Batches reach the learner generated by a policy that may trail the one
//! being trained. V-trace corrects the value targets with truncated
//! importance weights of the current (target) policy π against the acting
//! (behavior) policy μ.
//!
//! ## Key Equations
//!
//! ```text
//! ρ_t = clamp(π(a_t|s_t) / μ(a_t|s_t), 0, ρ̄)
//! c_t = min(ρ_t, c̄)
//!
//! v_t = V_t + ρ_t (r_t + γ V_{t+1} - V_t) + γ c_t (v_{t+1} - V_{t+1})
//! A_t = r_t + γ v_{t+1} - V_t
//! ```
//!
//! with `v_{T} = V_{T} = bootstrap`. When `c̄ >= ρ̄` the trace coefficient
//! equals ρ and the recursion collapses to
//! `v_t = V_t + ρ_t (r_t + γ v_{t+1} - V_t)`.
//!
//! A terminal step keeps its own reward but bootstraps nothing:
//! `v_t = V_t + ρ_t (r_t - V_t)`. With ρ = γ = 1 the target is therefore the
//! reward sum up to and including the next terminal step.
//! `c̄ = 0` cuts every trace and yields one-step TD targets.
//!
//! ## References
//!
//! - Espeholt et al., "IMPALA: Scalable Distributed Deep-RL with
//!   Importance Weighted Actor-Learner Architectures" (2018)

/// Log ratios are clamped to this magnitude before `exp`.
pub const MAX_LOG_RATIO: f32 = 20.0;

/// V-trace computation result.
#[derive(Debug, Clone, PartialEq)]
pub struct VTraceResult {
    /// V-trace value targets
    pub vs: Vec<f32>,
    /// Policy-gradient advantages `r + γ v_{t+1} - V` (no ρ factor)
    pub advantages: Vec<f32>,
    /// Clipped importance weights ρ
    pub rhos: Vec<f32>,
    /// Trace coefficients c
    pub cs: Vec<f32>,
}

/// Importance ratios `exp(target - behavior)` with overflow protection.
///
/// A non-finite log ratio falls back to 1.0 (treated as on-policy).
pub fn importance_ratios(behavior_log_probs: &[f32], target_log_probs: &[f32]) -> Vec<f32> {
    assert_eq!(behavior_log_probs.len(), target_log_probs.len());
    behavior_log_probs
        .iter()
        .zip(target_log_probs)
        .map(|(&behavior, &target)| {
            let log_ratio = target - behavior;
            if log_ratio.is_finite() {
                log_ratio.clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO).exp()
            } else {
                1.0
            }
        })
        .collect()
}

/// Compute V-trace targets and advantages for one trajectory segment.
///
/// # Arguments
///
/// * `ratios` - raw importance ratios π/μ per step (clipped here)
/// * `rewards` - rewards received
/// * `values` - V(s) under the current value function
/// * `dones` - episode termination flags
/// * `bootstrap_value` - V(s_T) past the final step
/// * `gamma` - discount factor
/// * `clip_rho` - ρ̄, truncation of the importance weight
/// * `clip_c` - c̄, truncation of the trace coefficient
#[allow(clippy::too_many_arguments)]
pub fn compute_vtrace(
    ratios: &[f32],
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    bootstrap_value: f32,
    gamma: f32,
    clip_rho: f32,
    clip_c: f32,
) -> VTraceResult {
    let n = rewards.len();
    assert_eq!(ratios.len(), n, "ratios/rewards length mismatch");
    assert_eq!(values.len(), n, "values/rewards length mismatch");
    assert_eq!(dones.len(), n, "dones/rewards length mismatch");

    let rhos: Vec<f32> = ratios
        .iter()
        .map(|&r| if r.is_finite() { r.clamp(0.0, clip_rho) } else { 1.0f32.min(clip_rho) })
        .collect();
    let cs: Vec<f32> = rhos.iter().map(|&rho| rho.min(clip_c)).collect();

    let mut vs = vec![0.0f32; n];
    let mut advantages = vec![0.0f32; n];
    let mut next_vs = bootstrap_value;
    let mut next_value = bootstrap_value;

    for t in (0..n).rev() {
        let discount = if dones[t] { 0.0 } else { gamma };
        let delta = rhos[t] * (rewards[t] + discount * next_value - values[t]);
        vs[t] = values[t] + delta + discount * cs[t] * (next_vs - next_value);
        advantages[t] = rewards[t] + discount * next_vs - values[t];

        next_vs = vs[t];
        next_value = values[t];
    }

    VTraceResult {
        vs,
        advantages,
        rhos,
        cs,
    }
}

/// V-trace from behavior and target log probabilities.
#[allow(clippy::too_many_arguments)]
pub fn compute_vtrace_from_log_probs(
    behavior_log_probs: &[f32],
    target_log_probs: &[f32],
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    bootstrap_value: f32,
    gamma: f32,
    clip_rho: f32,
    clip_c: f32,
) -> VTraceResult {
    let ratios = importance_ratios(behavior_log_probs, target_log_probs);
    compute_vtrace(
        &ratios,
        rewards,
        values,
        dones,
        bootstrap_value,
        gamma,
        clip_rho,
        clip_c,
    )
}
