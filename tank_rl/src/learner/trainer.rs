//! Minibatch PPO over one consolidated training set.
//!
//! ```text
//! rows ──shuffle──► [ holdout | train ]
//!                              │
//!            ┌─────────────────┴──────────────── epochs ─┐
//!            │ shuffle train rows → minibatches           │
//!            │   policy: clip surrogate − c·entropy       │
//!            │   value:  clipped value loss               │
//!            │   finite check → clip grads → Adam step    │
//!            │   canary check                             │
//!            │ KL(old ‖ new) on holdout → controller      │
//!            └────────────────────────────────────────────┘
//! ```
//!
//! The policy and value networks have separate optimizers and separate
//! global-norm clipping. Both step with the controller's learning rate.

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::health::HealthGuard;
use super::kl_controller::KlLrController;
use crate::algorithms::gaussian::{approx_kl, entropy, kl_divergence, log_prob};
use crate::algorithms::policy_loss::{clipped_value_loss, ppo_clip_loss};
use crate::config::TrainingConfig;
use crate::core::batch::{Batch, Minibatch};
use crate::error::PipelineError;
use crate::nn::{clip_global_norm, rows_tensor, to_vec, GaussianPolicy, ValueFunction};
use crate::store::{decode_module, decode_optimizer, encode_module, encode_optimizer, ModelState};

/// Aggregate statistics of one training pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    pub rows: usize,
    pub holdout_rows: usize,
    pub epochs_completed: usize,
    pub minibatches: usize,
    pub skipped_minibatches: usize,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    /// KL of the last accepted epoch
    pub kl: f64,
    /// Learning rate after the last controller update
    pub lr: f64,
    pub policy_grad_norm: f32,
    pub value_grad_norm: f32,
}

/// Result of [`PpoTrainer::train`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrainOutcome {
    Completed(TrainReport),
    /// The controller stopped the pass; remaining epochs were abandoned.
    Diverged { kl: f64, report: TrainReport },
}

struct StepStats {
    policy_loss: f32,
    value_loss: f32,
    entropy: f32,
    policy_grad_norm: f32,
    value_grad_norm: f32,
}

/// PPO trainer owning the working copies of both networks.
pub struct PpoTrainer<B, P, V>
where
    B: AutodiffBackend,
    P: GaussianPolicy<B> + AutodiffModule<B>,
    V: ValueFunction<B> + AutodiffModule<B>,
{
    policy: P,
    value: V,
    policy_optim: OptimizerAdaptor<Adam, P, B>,
    value_optim: OptimizerAdaptor<Adam, V, B>,
    controller: KlLrController,
    health: HealthGuard,
    config: TrainingConfig,
    device: B::Device,
    rng: StdRng,
}

impl<B, P, V> PpoTrainer<B, P, V>
where
    B: AutodiffBackend,
    P: GaussianPolicy<B> + AutodiffModule<B>,
    V: ValueFunction<B> + AutodiffModule<B>,
{
    pub fn new(policy: P, value: V, config: &TrainingConfig, device: B::Device) -> Self {
        let health = HealthGuard::new(policy.obs_size());
        Self {
            policy,
            value,
            policy_optim: adam(config).init(),
            value_optim: adam(config).init(),
            controller: KlLrController::from_config(config),
            health,
            config: config.clone(),
            device,
            rng: StdRng::from_entropy(),
        }
    }

    /// Fix the shuffling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn controller(&self) -> &KlLrController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut KlLrController {
        &mut self.controller
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Canary check on the current working networks.
    pub fn check_health(&self) -> Result<(), PipelineError> {
        self.health.check_canary(&self.policy, &self.value, &self.device)
    }

    /// Log probabilities of the recorded actions and state values under
    /// the current networks.
    pub fn evaluate(&self, batch: &Batch) -> (Vec<f32>, Vec<f32>) {
        let n = batch.len();
        let states = rows_tensor::<B>(batch.states(), n, batch.obs_dim(), &self.device);
        let actions = rows_tensor::<B>(batch.actions(), n, batch.action_dim(), &self.device);

        let out = self.policy.forward(states.clone());
        let log_probs = to_vec(log_prob(actions, out.mean, out.log_std));
        let values = to_vec(self.value.forward(states));
        (log_probs, values)
    }

    /// Run every epoch over `batch`.
    ///
    /// Minibatches with a non-finite loss are skipped and counted. A failed
    /// canary aborts with `ModelCorrupted`; the networks must then be
    /// reloaded before training again.
    pub fn train(&mut self, batch: &Batch) -> Result<TrainOutcome, PipelineError> {
        self.check_health()?;

        let n = batch.len();
        let mut rows: Vec<usize> = (0..n).collect();
        rows.shuffle(&mut self.rng);

        let mut holdout_len = (n as f32 * self.config.kl_holdout_fraction).round() as usize;
        if holdout_len >= n {
            holdout_len = 0;
        }
        let (holdout, train) = rows.split_at(holdout_len);
        let holdout = if holdout.is_empty() { train.to_vec() } else { holdout.to_vec() };
        let mut train = train.to_vec();

        let mut report = TrainReport {
            rows: n,
            holdout_rows: holdout_len,
            lr: self.controller.lr(),
            ..Default::default()
        };
        let mut sums = [0.0f32; 3];
        let mut accepted = 0usize;

        for epoch in 0..self.config.epochs {
            train.shuffle(&mut self.rng);
            let lr = self.controller.lr();

            for chunk in train.chunks(self.config.minibatch_size) {
                report.minibatches += 1;
                let mb = batch.gather(chunk);
                match self.train_minibatch(&mb, lr) {
                    Ok(stats) => {
                        accepted += 1;
                        sums[0] += stats.policy_loss;
                        sums[1] += stats.value_loss;
                        sums[2] += stats.entropy;
                        report.policy_grad_norm = stats.policy_grad_norm;
                        report.value_grad_norm = stats.value_grad_norm;
                    }
                    Err(err @ PipelineError::NonFiniteLoss { .. }) => {
                        report.skipped_minibatches += 1;
                        log::warn!("minibatch skipped: epoch={epoch} rows={} error={err}", mb.len);
                    }
                    Err(err) => return Err(err),
                }
            }

            let kl = self.measure_kl(batch, &holdout);
            report.epochs_completed = epoch + 1;
            finish_averages(&mut report, &sums, accepted);

            if let Err(PipelineError::DivergenceDetected { kl, .. }) = self.controller.observe(kl) {
                report.kl = kl;
                report.lr = self.controller.lr();
                return Ok(TrainOutcome::Diverged { kl, report });
            }
            report.kl = kl;
            report.lr = self.controller.lr();
            log::debug!(
                "epoch done: epoch={epoch} kl={kl:.6} lr={:.3e} policy_loss={:.5} value_loss={:.5}",
                report.lr,
                report.policy_loss,
                report.value_loss
            );
        }

        Ok(TrainOutcome::Completed(report))
    }

    fn train_minibatch(&mut self, mb: &Minibatch, lr: f64) -> Result<StepStats, PipelineError> {
        let device = &self.device;
        let states = rows_tensor::<B>(&mb.states, mb.len, mb.obs_dim, device);
        let actions = rows_tensor::<B>(&mb.actions, mb.len, mb.action_dim, device);
        let old_log_probs = Tensor::<B, 1>::from_floats(mb.log_probs.as_slice(), device);
        let old_values = Tensor::<B, 1>::from_floats(mb.values.as_slice(), device);
        let advantages = Tensor::<B, 1>::from_floats(mb.advantages.as_slice(), device);
        let returns = Tensor::<B, 1>::from_floats(mb.returns.as_slice(), device);

        let out = self.policy.forward(states.clone());
        let new_log_probs = log_prob(actions, out.mean, out.log_std.clone());
        let entropy_mean = entropy(out.log_std).mean();
        let surrogate =
            ppo_clip_loss(new_log_probs, old_log_probs, advantages, self.config.clip_policy);
        let policy_loss =
            surrogate.clone() - entropy_mean.clone().mul_scalar(self.config.entropy_coeff);

        let values = self.value.forward(states).flatten::<1>(0, 1);
        let value_loss = clipped_value_loss(values, old_values, returns, self.config.clip_value);

        let stats_policy = scalar(surrogate);
        let stats_value = scalar(value_loss.clone());
        let stats_entropy = scalar(entropy_mean);
        self.health.check_losses(&[
            ("policy", stats_policy),
            ("value", stats_value),
            ("entropy", stats_entropy),
        ])?;

        let grads = GradientsParams::from_grads(policy_loss.backward(), &self.policy);
        let (grads, policy_grad_norm) =
            clip_global_norm::<B, P>(&self.policy, grads, self.config.clip_norm);
        self.policy = self.policy_optim.step(lr, self.policy.clone(), grads);

        let grads = GradientsParams::from_grads(value_loss.backward(), &self.value);
        let (grads, value_grad_norm) =
            clip_global_norm::<B, V>(&self.value, grads, self.config.clip_norm);
        self.value = self.value_optim.step(lr, self.value.clone(), grads);

        self.check_health()?;

        Ok(StepStats {
            policy_loss: stats_policy,
            value_loss: stats_value,
            entropy: stats_entropy,
            policy_grad_norm,
            value_grad_norm,
        })
    }

    /// KL(old ‖ new) over `rows`. Falls back to the sample estimate when the
    /// recorded distribution parameters are not finite.
    fn measure_kl(&self, batch: &Batch, rows: &[usize]) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        let mb = batch.gather(rows);
        let device = &self.device;
        let states = rows_tensor::<B>(&mb.states, mb.len, mb.obs_dim, device);
        let out = self.policy.forward(states);

        let recorded_finite = mb
            .means
            .iter()
            .chain(&mb.log_stds)
            .all(|v| v.is_finite());

        if recorded_finite {
            let old_mean = rows_tensor::<B>(&mb.means, mb.len, mb.action_dim, device);
            let old_log_std = rows_tensor::<B>(&mb.log_stds, mb.len, mb.action_dim, device);
            scalar(kl_divergence(old_mean, old_log_std, out.mean, out.log_std).mean()) as f64
        } else {
            let actions = rows_tensor::<B>(&mb.actions, mb.len, mb.action_dim, device);
            let new_log_probs = to_vec(log_prob(actions, out.mean, out.log_std));
            approx_kl(&mb.log_probs, &new_log_probs) as f64
        }
    }

    /// Encode both networks for publishing at `version`.
    ///
    /// The controller state travels with the policy.
    pub fn snapshot(&self, version: u64) -> Result<(ModelState, ModelState), PipelineError> {
        let policy = ModelState::new(encode_module::<B, P>(&self.policy)?, version)
            .with_optimizer_state(encode_optimizer::<B, P, _>(&self.policy_optim)?)
            .with_controller(self.controller.state());
        let value = ModelState::new(encode_module::<B, V>(&self.value)?, version)
            .with_optimizer_state(encode_optimizer::<B, V, _>(&self.value_optim)?);
        Ok((policy, value))
    }

    /// Replace the working networks, optimizers and controller state.
    pub fn restore(&mut self, policy: &ModelState, value: &ModelState) -> Result<(), PipelineError> {
        self.policy = decode_module::<B, P>(self.policy.clone(), &policy.weights, &self.device)?;
        self.value = decode_module::<B, V>(self.value.clone(), &value.weights, &self.device)?;

        self.policy_optim = match &policy.optimizer_state {
            Some(bytes) => {
                decode_optimizer::<B, P, _>(adam(&self.config).init(), bytes, &self.device)?
            }
            None => adam(&self.config).init(),
        };
        self.value_optim = match &value.optimizer_state {
            Some(bytes) => {
                decode_optimizer::<B, V, _>(adam(&self.config).init(), bytes, &self.device)?
            }
            None => adam(&self.config).init(),
        };

        if let Some(state) = &policy.controller {
            self.controller.restore(state.clone());
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn replace_policy(&mut self, policy: P) {
        self.policy = policy;
    }
}

fn adam(config: &TrainingConfig) -> AdamConfig {
    AdamConfig::new().with_epsilon(config.adam_epsilon)
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
    tensor.into_scalar().elem::<f32>()
}

fn finish_averages(report: &mut TrainReport, sums: &[f32; 3], accepted: usize) {
    if accepted == 0 {
        return;
    }
    let n = accepted as f32;
    report.policy_loss = sums[0] / n;
    report.value_loss = sums[1] / n;
    report.entropy = sums[2] / n;
}
