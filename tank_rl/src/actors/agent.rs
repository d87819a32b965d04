//! Tank-controlling agents.
//!
//! Every agent exposes the same capability set. Capabilities a variant does
//! not have are no-ops:
//!
//! | | `sync` | `act` | `observe_outcome` | `finish_episode` |
//! |---|---|---|---|---|
//! | [`LearningActor`] | bounded reuse + backoff | sampled | recorded | batch |
//! | [`CurrentActor`] | newest, never waits | mean | no-op | `None` |
//! | [`RandomHistoricalActor`] | random snapshot | sampled | no-op | `None` |

use burn::prelude::*;
use burn::tensor::ElementConversion;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::version_sync::{SyncOutcome, VersionSync};
use crate::algorithms::advantage::AdvantageEstimator;
use crate::algorithms::gaussian::{log_prob, sample};
use crate::config::TrainingConfig;
use crate::core::batch::VersionedBatch;
use crate::core::transition::Decision;
use crate::error::PipelineError;
use crate::memory::TrajectoryMemory;
use crate::nn::{rows_tensor, to_vec, GaussianPolicy, ValueFunction};
use crate::store::{decode_module, snapshot_key, ModelState, ModelStore, POLICY_KEY};

/// Which variant an agent is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Learning,
    Current,
    RandomHistorical,
}

impl AgentKind {
    pub fn name(self) -> &'static str {
        match self {
            AgentKind::Learning => "learning",
            AgentKind::Current => "current",
            AgentKind::RandomHistorical => "random_historical",
        }
    }

    /// Whether the agent produces training batches.
    pub fn is_learning(self) -> bool {
        self == AgentKind::Learning
    }
}

/// Model in use after a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// New weights were loaded.
    Updated(u64),
    /// The cached weights are kept.
    Reused(u64),
}

impl SyncStatus {
    pub fn version(self) -> u64 {
        match self {
            SyncStatus::Updated(v) | SyncStatus::Reused(v) => v,
        }
    }
}

/// Capability interface shared by every agent variant.
pub trait TankAgent: Send {
    fn kind(&self) -> AgentKind;

    fn actor_id(&self) -> usize;

    /// Version of the weights in use, `None` before the first sync.
    fn model_version(&self) -> Option<u64>;

    fn obs_size(&self) -> usize;

    fn action_dim(&self) -> usize;

    /// Bring the weights up to date before an episode.
    fn sync(&mut self, store: &dyn ModelStore) -> Result<SyncStatus, PipelineError>;

    /// Choose an action for `observation`.
    fn act(&mut self, observation: &[f32]) -> Result<Vec<f32>, PipelineError>;

    /// Record the environment's response to the last action.
    fn observe_outcome(&mut self, _reward: f32, _done: bool) {}

    /// Close the episode, yielding a training batch if the agent learns.
    fn finish_episode(&mut self) -> Result<Option<VersionedBatch>, PipelineError> {
        Ok(None)
    }
}

/// How [`PolicyRunner::infer`] picks the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMode {
    /// Sample from the Gaussian.
    Stochastic,
    /// Take the mean.
    Deterministic,
}

/// Single-observation burn inference shared by every agent.
pub struct PolicyRunner<B, P, V>
where
    B: Backend,
    P: GaussianPolicy<B>,
    V: ValueFunction<B>,
{
    policy: P,
    value: V,
    device: B::Device,
    version: Option<u64>,
}

impl<B, P, V> PolicyRunner<B, P, V>
where
    B: Backend,
    P: GaussianPolicy<B>,
    V: ValueFunction<B>,
{
    /// `policy` and `value` fix the architecture; their weights are replaced
    /// on load.
    pub fn new(policy: P, value: V, device: B::Device) -> Self {
        Self {
            policy,
            value,
            device,
            version: None,
        }
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn obs_size(&self) -> usize {
        self.policy.obs_size()
    }

    pub fn action_dim(&self) -> usize {
        self.policy.action_dim()
    }

    pub fn load_policy(&mut self, state: &ModelState) -> Result<(), PipelineError> {
        self.policy = decode_module::<B, P>(self.policy.clone(), &state.weights, &self.device)?;
        self.version = Some(state.version);
        Ok(())
    }

    pub fn load_value(&mut self, state: &ModelState) -> Result<(), PipelineError> {
        self.value = decode_module::<B, V>(self.value.clone(), &state.weights, &self.device)?;
        Ok(())
    }

    /// Run both networks on one observation.
    pub fn infer(&self, observation: &[f32], mode: ActionMode) -> Result<Decision, PipelineError> {
        let obs_size = self.obs_size();
        if observation.len() != obs_size {
            return Err(PipelineError::ShapeMismatch {
                what: "observation",
                expected: obs_size,
                got: observation.len(),
            });
        }

        let obs = rows_tensor::<B>(observation, 1, obs_size, &self.device);
        let out = self.policy.forward(obs.clone());
        let value = self.value.forward(obs).into_scalar().elem::<f32>();

        let (action, action_log_prob) = match mode {
            ActionMode::Stochastic => sample(out.mean.clone(), out.log_std.clone()),
            ActionMode::Deterministic => {
                let lp = log_prob(out.mean.clone(), out.mean.clone(), out.log_std.clone());
                (out.mean.clone(), lp)
            }
        };

        Ok(Decision {
            state: observation.to_vec(),
            action: to_vec(action),
            action_mean: to_vec(out.mean),
            action_log_std: to_vec(out.log_std),
            log_prob: action_log_prob.into_scalar().elem::<f32>(),
            value,
        })
    }

    fn require_loaded(&self) -> Result<(), PipelineError> {
        match self.version {
            Some(_) => Ok(()),
            None => Err(PipelineError::SyncTimeout {
                local_version: None,
                attempts: 0,
            }),
        }
    }
}

// ============================================================================
// LearningActor
// ============================================================================

/// Explores with the current policy and records trajectories for training.
pub struct LearningActor<B, P, V>
where
    B: Backend,
    P: GaussianPolicy<B>,
    V: ValueFunction<B>,
{
    actor_id: usize,
    runner: PolicyRunner<B, P, V>,
    sync: VersionSync,
    memory: TrajectoryMemory,
    estimator: AdvantageEstimator,
}

impl<B, P, V> LearningActor<B, P, V>
where
    B: Backend,
    P: GaussianPolicy<B>,
    V: ValueFunction<B>,
{
    pub fn new(actor_id: usize, runner: PolicyRunner<B, P, V>, config: &TrainingConfig) -> Self {
        Self {
            actor_id,
            runner,
            sync: VersionSync::from_config(config),
            memory: TrajectoryMemory::new().with_warmup(config.warmup_steps),
            estimator: AdvantageEstimator::from_config(config),
        }
    }

    pub fn version_sync(&self) -> &VersionSync {
        &self.sync
    }

    pub fn memory(&self) -> &TrajectoryMemory {
        &self.memory
    }
}

impl<B, P, V> TankAgent for LearningActor<B, P, V>
where
    B: Backend,
    P: GaussianPolicy<B>,
    V: ValueFunction<B>,
{
    fn kind(&self) -> AgentKind {
        AgentKind::Learning
    }

    fn actor_id(&self) -> usize {
        self.actor_id
    }

    fn model_version(&self) -> Option<u64> {
        self.runner.version()
    }

    fn obs_size(&self) -> usize {
        self.runner.obs_size()
    }

    fn action_dim(&self) -> usize {
        self.runner.action_dim()
    }

    fn sync(&mut self, store: &dyn ModelStore) -> Result<SyncStatus, PipelineError> {
        match self.sync.sync(store)? {
            SyncOutcome::Updated(models) => {
                self.runner.load_value(&models.value)?;
                self.runner.load_policy(&models.policy)?;
                Ok(SyncStatus::Updated(models.version()))
            }
            SyncOutcome::Reused { version, .. } => Ok(SyncStatus::Reused(version)),
        }
    }

    fn act(&mut self, observation: &[f32]) -> Result<Vec<f32>, PipelineError> {
        self.runner.require_loaded()?;
        let decision = self.runner.infer(observation, ActionMode::Stochastic)?;
        self.memory.add_first_part(
            &decision.state,
            &decision.action,
            &decision.action_mean,
            &decision.action_log_std,
            decision.log_prob,
            decision.value,
        );
        Ok(decision.action)
    }

    fn observe_outcome(&mut self, reward: f32, done: bool) {
        self.memory.update_second_part(reward, done);
    }

    fn finish_episode(&mut self) -> Result<Option<VersionedBatch>, PipelineError> {
        self.memory.close();
        let batch = self.memory.get_batch_with(&self.estimator);
        self.memory.dispose();

        let version = self.runner.version().unwrap_or_default();
        Ok(Some(VersionedBatch::new(version, self.actor_id, batch?)))
    }
}

// ============================================================================
// CurrentActor
// ============================================================================

/// Plays the newest published policy greedily. Never records.
pub struct CurrentActor<B, P, V>
where
    B: Backend,
    P: GaussianPolicy<B>,
    V: ValueFunction<B>,
{
    actor_id: usize,
    runner: PolicyRunner<B, P, V>,
    sync: VersionSync,
}

impl<B, P, V> CurrentActor<B, P, V>
where
    B: Backend,
    P: GaussianPolicy<B>,
    V: ValueFunction<B>,
{
    pub fn new(actor_id: usize, runner: PolicyRunner<B, P, V>, config: &TrainingConfig) -> Self {
        Self {
            actor_id,
            runner,
            sync: VersionSync::from_config(config),
        }
    }
}

impl<B, P, V> TankAgent for CurrentActor<B, P, V>
where
    B: Backend,
    P: GaussianPolicy<B>,
    V: ValueFunction<B>,
{
    fn kind(&self) -> AgentKind {
        AgentKind::Current
    }

    fn actor_id(&self) -> usize {
        self.actor_id
    }

    fn model_version(&self) -> Option<u64> {
        self.runner.version()
    }

    fn obs_size(&self) -> usize {
        self.runner.obs_size()
    }

    fn action_dim(&self) -> usize {
        self.runner.action_dim()
    }

    fn sync(&mut self, store: &dyn ModelStore) -> Result<SyncStatus, PipelineError> {
        if let Some(models) = self.sync.poll(store)? {
            self.runner.load_value(&models.value)?;
            self.runner.load_policy(&models.policy)?;
            return Ok(SyncStatus::Updated(models.version()));
        }
        self.runner.require_loaded()?;
        Ok(SyncStatus::Reused(self.runner.version().unwrap_or_default()))
    }

    fn act(&mut self, observation: &[f32]) -> Result<Vec<f32>, PipelineError> {
        self.runner.require_loaded()?;
        Ok(self.runner.infer(observation, ActionMode::Deterministic)?.action)
    }
}

// ============================================================================
// RandomHistoricalActor
// ============================================================================

/// Plays a randomly chosen archived policy. Never records.
pub struct RandomHistoricalActor<B, P, V>
where
    B: Backend,
    P: GaussianPolicy<B>,
    V: ValueFunction<B>,
{
    actor_id: usize,
    runner: PolicyRunner<B, P, V>,
    rng: StdRng,
}

impl<B, P, V> RandomHistoricalActor<B, P, V>
where
    B: Backend,
    P: GaussianPolicy<B>,
    V: ValueFunction<B>,
{
    pub fn new(actor_id: usize, runner: PolicyRunner<B, P, V>) -> Self {
        Self {
            actor_id,
            runner,
            rng: StdRng::from_entropy(),
        }
    }

    /// Fix the snapshot selection seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl<B, P, V> TankAgent for RandomHistoricalActor<B, P, V>
where
    B: Backend,
    P: GaussianPolicy<B>,
    V: ValueFunction<B>,
{
    fn kind(&self) -> AgentKind {
        AgentKind::RandomHistorical
    }

    fn actor_id(&self) -> usize {
        self.actor_id
    }

    fn model_version(&self) -> Option<u64> {
        self.runner.version()
    }

    fn obs_size(&self) -> usize {
        self.runner.obs_size()
    }

    fn action_dim(&self) -> usize {
        self.runner.action_dim()
    }

    fn sync(&mut self, store: &dyn ModelStore) -> Result<SyncStatus, PipelineError> {
        let versions = store.snapshot_versions()?;
        let key = match versions.choose(&mut self.rng) {
            Some(&version) => snapshot_key(version),
            None => POLICY_KEY.to_string(),
        };
        let state = match store.get(&key)? {
            Some(state) => state,
            None => {
                self.runner.require_loaded()?;
                return Ok(SyncStatus::Reused(self.runner.version().unwrap_or_default()));
            }
        };

        if self.runner.version() == Some(state.version) {
            return Ok(SyncStatus::Reused(state.version));
        }
        self.runner.load_policy(&state)?;
        log::debug!(
            "historical actor loaded snapshot: actor={} key={key} version={}",
            self.actor_id,
            state.version
        );
        Ok(SyncStatus::Updated(state.version))
    }

    fn act(&mut self, observation: &[f32]) -> Result<Vec<f32>, PipelineError> {
        self.runner.require_loaded()?;
        Ok(self.runner.infer(observation, ActionMode::Stochastic)?.action)
    }
}
