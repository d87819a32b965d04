//! Learner behaviour against a real store, transport and small networks.

use super::*;
use super::learner::normalize_within;
use crate::config::{AdvantageMode, TrainingConfig};
use crate::core::batch::{Batch, BatchParts, VersionedBatch};
use crate::core::model_version::version_counter;
use crate::error::PipelineError;
use crate::metrics::{pipeline_counters, Counter, MemorySink, MetricValue, SharedCounters, SharedSink};
use crate::nn::{rows_tensor, to_vec, GaussianPolicy, MlpPolicy, MlpPolicyConfig, MlpValue, MlpValueConfig};
use crate::store::{snapshot_key, MemoryModelStore, ModelStore, SharedStore, POLICY_KEY, VALUE_KEY};
use crate::transport::{BatchTransport, ChannelTransport};
use burn::backend::{Autodiff, NdArray};
use burn::module::{Module, ModuleMapper, Param};
use burn::prelude::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

type TestBackend = Autodiff<NdArray<f32>>;
type TestLearner = Learner<TestBackend, MlpPolicy<TestBackend>, MlpValue<TestBackend>>;

const OBS: usize = 3;
const ACT: usize = 1;

// =============================================================================
// Test Helpers
// =============================================================================

struct Harness {
    store: Arc<MemoryModelStore>,
    sink: Arc<MemorySink>,
    counters: SharedCounters,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryModelStore::new()),
            sink: Arc::new(MemorySink::new()),
            counters: pipeline_counters(),
        }
    }

    fn learner(&self, config: &TrainingConfig) -> Result<TestLearner, PipelineError> {
        let device = Default::default();
        let policy = MlpPolicyConfig::new(OBS, ACT).with_hidden(vec![8]).init(&device);
        let value = MlpValueConfig::new(OBS).with_hidden(vec![8]).init(&device);
        let trainer = PpoTrainer::new(policy, value, config, device).with_seed(7);
        let store: SharedStore = self.store.clone();
        let sink: SharedSink = self.sink.clone();
        Learner::new(trainer, config, store, sink, self.counters.clone())
    }
}

fn test_config() -> TrainingConfig {
    TrainingConfig::new()
        .with_worker_count(3)
        .with_epochs(2)
        .with_minibatch_size(16)
        .with_kl_holdout_fraction(0.0)
        .with_kl_max(10.0)
        .with_max_lag(2)
}

/// One episode of `size` steps whose recorded distribution matches the
/// learner's current policy.
fn episode(learner: &TestLearner, size: usize, seed: usize) -> Batch {
    let device = learner.trainer().device();
    let states: Vec<f32> = (0..size * OBS)
        .map(|i| (((i + seed) * 31 % 17) as f32 / 17.0) - 0.5)
        .collect();
    let out = learner
        .trainer()
        .policy()
        .forward(rows_tensor::<TestBackend>(&states, size, OBS, device));
    let means = to_vec(out.mean);
    let log_stds = to_vec(out.log_std);

    let mut dones = vec![false; size];
    dones[size - 1] = true;
    let rewards: Vec<f32> = (0..size).map(|i| ((i + seed) % 3) as f32 - 1.0).collect();

    let batch = Batch::new(BatchParts {
        obs_dim: OBS,
        action_dim: ACT,
        states,
        actions: means.iter().map(|m| m + 0.1).collect(),
        means,
        log_stds,
        log_probs: vec![-1.0; size],
        values: vec![0.0; size],
        advantages: vec![0.0; size],
        returns: vec![0.0; size],
        rewards: rewards.clone(),
        dones,
    })
    .unwrap();

    let (log_probs, values) = learner.trainer().evaluate(&batch);
    let mut parts = batch.into_parts();
    parts.log_probs = log_probs;
    parts.values = values;
    parts.advantages = rewards.iter().map(|r| r * 0.5).collect();
    parts.returns = rewards;
    Batch::new(parts).unwrap()
}

struct Poison;

impl<B: Backend> ModuleMapper<B> for Poison {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let poisoned = param.val().mul_scalar(f32::NAN);
        Param::initialized(param.id.clone(), poisoned)
    }
}

// =============================================================================
// Bootstrap and resume
// =============================================================================

#[test]
fn test_bootstrap_publishes_version_zero() {
    let harness = Harness::new();
    let learner = harness.learner(&test_config()).unwrap();

    assert_eq!(learner.version(), 0);
    assert_eq!(learner.state(), LearnerState::Idle);
    assert_eq!(harness.store.version(POLICY_KEY).unwrap(), Some(0));
    assert_eq!(harness.store.version(VALUE_KEY).unwrap(), Some(0));

    let policy = harness.store.require(POLICY_KEY).unwrap();
    assert!(policy.optimizer_state.is_some());
    assert!(policy.controller.is_some());
}

#[test]
fn test_resume_restores_version_and_controller() {
    let harness = Harness::new();
    let config = test_config();
    let first = harness.learner(&config).unwrap();

    let (policy, value) = first.trainer().snapshot(5).unwrap();
    let mut policy = policy;
    let mut controller = policy.controller.clone().unwrap();
    controller.lr = 7e-4;
    policy.controller = Some(controller);
    harness.store.set(VALUE_KEY, value).unwrap();
    harness.store.set(POLICY_KEY, policy).unwrap();

    let resumed = harness.learner(&config).unwrap();
    assert_eq!(resumed.version(), 5);
    assert!((resumed.trainer().controller().lr() - 7e-4).abs() < 1e-12);
}

#[test]
fn test_invalid_config_rejected() {
    let harness = Harness::new();
    let err = harness.learner(&test_config().with_worker_count(0)).err().unwrap();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(harness.store.is_empty());
}

// =============================================================================
// Accumulation and publishing
// =============================================================================

#[test]
fn test_waits_for_worker_count() {
    let harness = Harness::new();
    let mut learner = harness.learner(&test_config()).unwrap();

    assert_eq!(learner.step().unwrap(), StepOutcome::Waiting);

    let batch = episode(&learner, 16, 0);
    learner.offer(VersionedBatch::new(0, 0, batch));
    assert_eq!(learner.state(), LearnerState::Accumulating);
    assert_eq!(learner.step().unwrap(), StepOutcome::Waiting);
    assert_eq!(learner.pending(), 1);
    assert_eq!(learner.version(), 0);
}

#[test]
fn test_publish_bumps_version() {
    let harness = Harness::new();
    let config = test_config().with_snapshot_interval(1);
    let mut learner = harness.learner(&config).unwrap();

    for actor in 0..3 {
        let batch = episode(&learner, 16, actor);
        learner.offer(VersionedBatch::new(0, actor, batch));
    }

    let report = match learner.step().unwrap() {
        StepOutcome::Published(report) => report,
        other => panic!("expected publish, got {other:?}"),
    };
    assert_eq!(report.version, 1);
    assert_eq!(report.batches, 3);
    assert_eq!(report.train.rows, 48);
    assert_eq!(report.train.epochs_completed, 2);
    assert_eq!(learner.version(), 1);
    assert_eq!(learner.state(), LearnerState::Idle);

    assert_eq!(harness.store.version(POLICY_KEY).unwrap(), Some(1));
    assert_eq!(harness.store.version(VALUE_KEY).unwrap(), Some(1));
    assert!(harness.store.get(&snapshot_key(1)).unwrap().is_some());

    assert_eq!(harness.counters.get(Counter::Publishes), 1);
    assert_eq!(harness.counters.get(Counter::BatchesReceived), 3);
    assert_eq!(harness.counters.get(Counter::BatchesTrained), 3);
    assert_eq!(harness.sink.latest("learner/version"), Some(MetricValue::Scalar(1.0)));
    assert!(harness.sink.latest("learner/kl").is_some());
}

#[test]
fn test_published_weights_round_trip() {
    let harness = Harness::new();
    let mut learner = harness.learner(&test_config()).unwrap();
    for actor in 0..3 {
        let batch = episode(&learner, 16, actor);
        learner.offer(VersionedBatch::new(0, actor, batch));
    }
    assert!(matches!(learner.step().unwrap(), StepOutcome::Published(_)));

    let held_out = episode(&learner, 4, 9);
    let (expected, _) = learner.trainer().evaluate(&held_out);

    // A fresh learner resumes from the published state.
    let resumed = harness.learner(&test_config()).unwrap();
    assert_eq!(resumed.version(), 1);
    let (actual, _) = resumed.trainer().evaluate(&held_out);
    for (a, b) in expected.iter().zip(&actual) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn test_version_counter_mirrors_publishes() {
    let harness = Harness::new();
    let published = version_counter();
    let mut learner = harness
        .learner(&test_config().with_worker_count(1))
        .unwrap()
        .with_version_counter(published.clone());

    let batch = episode(&learner, 16, 0);
    learner.offer(VersionedBatch::new(0, 0, batch));
    assert!(matches!(learner.step().unwrap(), StepOutcome::Published(_)));
    assert_eq!(published.current(), 1);
}

#[test]
fn test_vtrace_round_publishes() {
    let harness = Harness::new();
    let config = test_config().with_advantage(AdvantageMode::VTrace {
        clip_rho: 1.0,
        clip_c: 1.0,
    });
    let mut learner = harness.learner(&config).unwrap();
    for actor in 0..3 {
        let batch = episode(&learner, 16, actor);
        learner.offer(VersionedBatch::new(0, actor, batch));
    }
    match learner.step().unwrap() {
        StepOutcome::Published(report) => {
            assert_eq!(report.train.rows, 48);
            assert!(report.train.policy_loss.is_finite());
        }
        other => panic!("expected publish, got {other:?}"),
    }
}

// =============================================================================
// Staleness
// =============================================================================

#[test]
fn test_end_to_end_staleness() {
    let harness = Harness::new();
    let config = test_config();

    let first = harness.learner(&config).unwrap();
    let (policy, value) = first.trainer().snapshot(5).unwrap();
    harness.store.set(VALUE_KEY, value).unwrap();
    harness.store.set(POLICY_KEY, policy).unwrap();
    drop(first);

    let mut learner = harness.learner(&config).unwrap();
    assert_eq!(learner.version(), 5);

    for (actor, version) in [(0, 5), (1, 5), (2, 2)] {
        let batch = episode(&learner, 32, actor);
        learner.offer(VersionedBatch::new(version, actor, batch));
    }

    let report = match learner.step().unwrap() {
        StepOutcome::Published(report) => report,
        other => panic!("expected publish, got {other:?}"),
    };
    assert_eq!(report.train.rows, 64);
    assert_eq!(report.batches, 2);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.lags, vec![0, 0]);
    assert_eq!(report.version, 6);

    assert_eq!(harness.counters.get(Counter::StaleDropped), 1);
    assert_eq!(harness.counters.get(Counter::BatchesTrained), 2);
    assert_eq!(
        harness.sink.series("counter/stale_dropped"),
        vec![MetricValue::Scalar(1.0)]
    );
}

#[test]
fn test_all_stale_round_discarded() {
    let harness = Harness::new();
    let config = test_config().with_worker_count(1).with_max_lag(0);
    let mut learner = harness.learner(&config).unwrap();

    let batch = episode(&learner, 8, 0);
    learner.offer(VersionedBatch::new(0, 0, batch.clone()));
    assert!(matches!(learner.step().unwrap(), StepOutcome::Published(_)));

    // Generated at version 0, learner now at 1.
    learner.offer(VersionedBatch::new(0, 0, batch));
    assert_eq!(learner.step().unwrap(), StepOutcome::Discarded);
    assert_eq!(learner.version(), 1);
    assert_eq!(learner.state(), LearnerState::Idle);
    assert_eq!(harness.counters.get(Counter::StaleDropped), 1);
}

/// Batch of `advantages.len()` steps carrying the given advantages.
fn scored(advantages: Vec<f32>) -> Batch {
    let size = advantages.len();
    let mut dones = vec![false; size];
    dones[size - 1] = true;
    Batch::new(BatchParts {
        obs_dim: OBS,
        action_dim: ACT,
        states: vec![0.0; size * OBS],
        actions: vec![0.0; size * ACT],
        means: vec![0.0; size * ACT],
        log_stds: vec![0.0; size * ACT],
        log_probs: vec![-1.0; size],
        values: vec![0.0; size],
        returns: advantages.clone(),
        advantages,
        rewards: vec![0.0; size],
        dones,
    })
    .unwrap()
}

/// Admit `batches` at `current` and normalize them the way a round does.
fn prepared_round(
    corrector: &StalenessCorrector,
    batches: Vec<VersionedBatch>,
    current: u64,
) -> Batch {
    let correction = corrector.correct(batches, current);
    assert!(correction.dropped.is_empty());
    let prepared = correction
        .admitted
        .into_iter()
        .map(|admitted| normalize_within(admitted.batch.batch, admitted.trust).unwrap())
        .collect();
    Batch::concat(prepared).unwrap()
}

#[test]
fn test_normalized_round_keeps_trust_discount() {
    let corrector = StalenessCorrector::new(0.25, 2);
    let raw = vec![-2.0, 0.5, 1.0, 3.0, -1.0, 0.0];

    let fresh = prepared_round(&corrector, vec![VersionedBatch::new(4, 0, scored(raw.clone()))], 4);
    let lagged = prepared_round(&corrector, vec![VersionedBatch::new(3, 0, scored(raw))], 4);

    let mean: f32 = fresh.advantages().iter().sum::<f32>() / 6.0;
    assert!(mean.abs() < 1e-5);
    assert_ne!(fresh.advantages(), lagged.advantages());
    for (f, l) in fresh.advantages().iter().zip(lagged.advantages()) {
        assert!((l - 0.75 * f).abs() < 1e-5, "fresh {f} lagged {l}");
    }
}

#[test]
fn test_zero_trust_batch_contributes_nothing() {
    let corrector = StalenessCorrector::new(0.5, 2);
    let batches = vec![
        VersionedBatch::new(10, 0, scored(vec![1.0, -1.0, 2.0, 0.0])),
        VersionedBatch::new(8, 1, scored(vec![5.0, 7.0, -3.0, 1.0, 2.0, 4.0, 0.5, 9.0])),
    ];
    assert_eq!(corrector.trust(2), 0.0);

    let round = prepared_round(&corrector, batches, 10);
    assert_eq!(round.len(), 12);
    // Ascending lag: the fresh batch comes first.
    assert!(round.advantages()[..4].iter().any(|&a| a != 0.0));
    assert!(round.advantages()[4..].iter().all(|&a| a == 0.0));
}

// =============================================================================
// Recovery paths
// =============================================================================

#[test]
fn test_divergence_rolls_back() {
    let harness = Harness::new();
    let config = test_config()
        .with_worker_count(1)
        .with_kl_max(1e-9)
        .with_lr_bounds(1e-5, 0.1)
        .with_initial_lr(0.05);
    let mut learner = harness.learner(&config).unwrap();

    let held_out = episode(&learner, 4, 3);
    let (before, _) = learner.trainer().evaluate(&held_out);

    let batch = episode(&learner, 32, 0);
    learner.offer(VersionedBatch::new(0, 0, batch));
    match learner.step().unwrap() {
        StepOutcome::Diverged { kl } => assert!(kl > 1e-9),
        other => panic!("expected divergence, got {other:?}"),
    }

    assert_eq!(learner.version(), 0);
    assert_eq!(harness.store.version(POLICY_KEY).unwrap(), Some(0));
    assert_eq!(harness.counters.get(Counter::Divergences), 1);
    assert_eq!(harness.counters.get(Counter::Publishes), 0);

    // Working copy is back to the stored weights.
    let (after, _) = learner.trainer().evaluate(&held_out);
    for (a, b) in before.iter().zip(&after) {
        assert!((a - b).abs() < 1e-5);
    }
    assert!(learner.trainer().controller().history().is_empty());
}

#[test]
fn test_corrupted_model_recovered() {
    let harness = Harness::new();
    let mut learner = harness.learner(&test_config().with_worker_count(1)).unwrap();

    let batch = episode(&learner, 16, 0);
    let poisoned = learner.trainer().policy().clone().map(&mut Poison);
    learner.trainer_mut().replace_policy(poisoned);
    assert!(learner.trainer().check_health().is_err());

    learner.offer(VersionedBatch::new(0, 0, batch.clone()));
    assert_eq!(learner.step().unwrap(), StepOutcome::Recovered);
    assert_eq!(learner.version(), 0);
    assert_eq!(harness.counters.get(Counter::ModelReloads), 1);
    assert!(learner.trainer().check_health().is_ok());

    // Training proceeds normally after the reload.
    learner.offer(VersionedBatch::new(0, 0, batch));
    assert!(matches!(learner.step().unwrap(), StepOutcome::Published(_)));
}

#[test]
fn test_non_finite_minibatches_skipped() {
    let harness = Harness::new();
    let config = test_config().with_worker_count(1).with_normalize_advantages(false);
    let mut learner = harness.learner(&config).unwrap();

    let mut parts = episode(&learner, 16, 0).into_parts();
    parts.advantages = vec![f32::NAN; 16];
    let batch = Batch::new(parts).unwrap();
    learner.offer(VersionedBatch::new(0, 0, batch));

    match learner.step().unwrap() {
        StepOutcome::Published(report) => {
            assert_eq!(report.train.minibatches, 2);
            assert_eq!(report.train.skipped_minibatches, 2);
        }
        other => panic!("expected publish, got {other:?}"),
    }
    assert_eq!(harness.counters.get(Counter::MinibatchesSkipped), 2);
}

// =============================================================================
// Threaded handle
// =============================================================================

#[test]
fn test_spawned_learner_publishes_and_stops() {
    let harness = Harness::new();
    let published = version_counter();
    let learner = harness
        .learner(&test_config())
        .unwrap()
        .with_version_counter(published.clone());
    let batches: Vec<Batch> = (0..3).map(|seed| episode(&learner, 16, seed)).collect();

    let transport = Arc::new(ChannelTransport::new(8));
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = spawn_learner(learner, transport.subscribe(), shutdown).unwrap();

    for (actor, batch) in batches.into_iter().enumerate() {
        transport.publish(VersionedBatch::new(0, actor, batch)).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    while published.current() < 1 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(published.current(), 1);
    assert!(handle.is_running());

    let stats = handle.stop_and_wait().unwrap().unwrap();
    assert_eq!(stats.model_version, 1);
    assert_eq!(stats.rounds, 1);
    assert_eq!(stats.rows_trained, 48);
}

#[test]
fn test_spawned_learner_pause_and_stats() {
    let harness = Harness::new();
    let learner = harness.learner(&test_config()).unwrap();
    let transport = Arc::new(ChannelTransport::new(8));
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = spawn_learner(learner, transport.subscribe(), shutdown.clone()).unwrap();

    assert!(handle.pause());
    assert!(handle.request_stats());

    let deadline = Instant::now() + Duration::from_secs(5);
    let stats = loop {
        if let Some(stats) = handle.get_stats() {
            break stats;
        }
        assert!(Instant::now() < deadline, "no stats received");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert!(stats.paused);
    assert_eq!(stats.model_version, 0);

    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    let stats = handle.join().unwrap().unwrap();
    assert_eq!(stats.rounds, 0);
}

#[test]
fn test_spawned_learner_exits_when_transport_closes() {
    let harness = Harness::new();
    let learner = harness.learner(&test_config()).unwrap();
    let transport = Arc::new(ChannelTransport::new(4));
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = spawn_learner(learner, transport.subscribe(), shutdown).unwrap();

    transport.close();
    let result = handle.join().unwrap();
    assert!(result.is_ok());
}
