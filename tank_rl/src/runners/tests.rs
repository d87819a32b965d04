//! End-to-end pipeline runs on the target range.

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::config::TrainingConfig;
use crate::environment::TargetRange;
use crate::error::{ConfigError, PipelineError};
use crate::learner::PpoTrainer;
use crate::metrics::MemorySink;
use crate::nn::{MlpPolicy, MlpPolicyConfig, MlpValue, MlpValueConfig};
use crate::store::{MemoryModelStore, ModelStore, SharedStore, POLICY_KEY};
use burn::backend::{Autodiff, NdArray};
use burn::prelude::*;

type TestBackend = Autodiff<NdArray<f32>>;
type TestDevice = <TestBackend as Backend>::Device;
type TestPolicy = MlpPolicy<TestBackend>;
type TestValue = MlpValue<TestBackend>;

fn config() -> TrainingConfig {
    TrainingConfig::new()
        .with_worker_count(2)
        .with_epochs(1)
        .with_minibatch_size(16)
        .with_kl_holdout_fraction(0.0)
        .with_kl_max(10.0)
        .with_max_lag(4)
        .with_reuse_limit(8)
        .with_sync_backoff(5, 20, 20)
        .with_max_episode_steps(20)
}

fn networks(obs: usize) -> impl Fn(&TestDevice) -> (TestPolicy, TestValue) {
    move |device| {
        (
            MlpPolicyConfig::new(obs, 1).with_hidden(vec![8]).init(device),
            MlpValueConfig::new(obs).with_hidden(vec![8]).init(device),
        )
    }
}

fn trainer(config: &TrainingConfig) -> PpoTrainer<TestBackend, TestPolicy, TestValue> {
    let device = Default::default();
    let (policy, value) = networks(3)(&device);
    PpoTrainer::new(policy, value, config, device).with_seed(3)
}

#[test]
fn test_pipeline_reaches_target_version() {
    let config = config();
    let store = Arc::new(MemoryModelStore::new());
    let sink = Arc::new(MemorySink::new());
    let resources = PipelineResources::new(store.clone()).with_sink(sink.clone());

    let pipeline = AsyncPpoPipeline::spawn(
        &config,
        trainer(&config),
        networks(3),
        |actor_id| TargetRange::new(actor_id as u64).with_horizon(20),
        resources,
    )
    .unwrap();

    let summary = pipeline.run_until_version(2, Duration::from_secs(120)).unwrap();
    assert!(summary.final_version >= 2);
    assert_eq!(summary.learner.model_version, summary.final_version);
    assert!(summary.counters.publishes >= 2);
    assert!(summary.counters.batches_trained >= 4);
    assert!(summary.counters.env_steps > 0);
    assert_eq!(summary.actors.len(), 2);
    assert!(summary.actor_total().episodes > 0);

    assert!(store.version(POLICY_KEY).unwrap().unwrap() >= 2);
    assert!(sink.latest("learner/version").is_some());
}

#[test]
fn test_pipeline_with_evaluators_runs_for_duration() {
    let config = config().with_snapshot_interval(1);
    let store: SharedStore = Arc::new(MemoryModelStore::new());
    let resources = PipelineResources::new(store.clone()).with_evaluators(1, 1);

    let pipeline = AsyncPpoPipeline::spawn(
        &config,
        trainer(&config),
        networks(3),
        |actor_id| TargetRange::new(10 + actor_id as u64).with_horizon(20),
        resources,
    )
    .unwrap();
    assert!(pipeline.is_learner_running());

    let summary = pipeline.run_for(Duration::from_millis(500)).unwrap();
    assert_eq!(summary.actors.len(), 4);
    for stats in &summary.actors[2..] {
        assert_eq!(stats.batches_published, 0);
        assert_eq!(stats.batches_dropped, 0);
    }
    assert!(summary.elapsed >= Duration::from_millis(500));
}

#[test]
fn test_pipeline_rejects_mismatched_environment() {
    let config = config();
    let store: SharedStore = Arc::new(MemoryModelStore::new());

    // Networks expect 4-wide observations; the range produces 3.
    let device = Default::default();
    let (policy, value) = networks(4)(&device);
    let trainer = PpoTrainer::new(policy, value, &config, device);

    let result = AsyncPpoPipeline::spawn(
        &config,
        trainer,
        networks(4),
        |actor_id| TargetRange::new(actor_id as u64),
        PipelineResources::new(store),
    );
    assert!(matches!(
        result,
        Err(PipelineError::Config(ConfigError::Inconsistent(_)))
    ));
}
