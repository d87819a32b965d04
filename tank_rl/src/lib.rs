//! # tank_rl: Asynchronous Actor-Learner PPO
//!
//! Distributed training pipeline for continuous-control tank agents.
//! Rollout actors play episodes against their own environment while a
//! single learner trains a Gaussian policy and a value network with PPO.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Asynchronous PPO                              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Thread 1          Thread 2          Thread N                       │
//! │  ┌────────┐        ┌────────┐        ┌────────┐                     │
//! │  │Actor 0 │        │Actor 1 │        │Actor N │                     │
//! │  │  env   │        │  env   │        │  env   │                     │
//! │  │ memory │        │ memory │        │ memory │                     │
//! │  └───┬────┘        └───┬────┘        └───┬────┘                     │
//! │      │ VersionedBatch  │                 │        ▲ sync            │
//! │      └─────────────────┼─────────────────┘        │                 │
//! │                        ▼                          │                 │
//! │              ┌──────────────────┐      ┌──────────┴───┐             │
//! │              │ ChannelTransport │      │  ModelStore  │             │
//! │              │ (bounded, lossy) │      │ (versioned)  │             │
//! │              └────────┬─────────┘      └──────▲───────┘             │
//! │                       ▼                       │                     │
//! │              ┌──────────────────┐             │                     │
//! │              │  Learner Thread  │─────────────┘                     │
//! │              │ staleness → PPO  │  value, then policy               │
//! │              └──────────────────┘                                   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Batches carry the policy version that produced them. The learner drops
//! batches trailing by more than `max_lag` versions and discounts the
//! advantages of the rest. A KL-driven controller adapts the learning rate
//! and a hard KL limit rolls back divergent updates.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tank_rl::{AsyncPpoPipeline, PipelineResources, PpoTrainer, TargetRange, TrainingConfig};
//!
//! let config = TrainingConfig::new().with_worker_count(4).with_max_lag(2);
//! let trainer = PpoTrainer::new(policy, value, &config, device);
//! let pipeline = AsyncPpoPipeline::spawn(
//!     &config,
//!     trainer,
//!     |device| (policy_config.init(device), value_config.init(device)),
//!     |actor_id| TargetRange::new(actor_id as u64),
//!     PipelineResources::new(store),
//! )?;
//! let summary = pipeline.run_until_version(100, Duration::from_secs(600))?;
//! ```

pub mod actors;
pub mod algorithms;
pub mod config;
pub mod core;
pub mod environment;
pub mod error;
pub mod learner;
pub mod memory;
pub mod messages;
pub mod metrics;
pub mod nn;
pub mod runners;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use config::{AdvantageMode, TrainingConfig};
pub use crate::core::batch::{Batch, BatchParts, Minibatch, VersionedBatch};
pub use crate::core::model_version::{version_counter, SharedVersionCounter, VersionCounter};
pub use crate::core::transition::{Decision, Transition};
pub use error::{ConfigError, PipelineError, StoreError};

pub use algorithms::{AdvantageEstimator, EstimatorInput, Estimates};
pub use memory::TrajectoryMemory;
pub use nn::{
    GaussianOutput, GaussianPolicy, MlpPolicy, MlpPolicyConfig, MlpValue, MlpValueConfig,
    ValueFunction,
};

pub use store::{FileModelStore, MemoryModelStore, ModelState, ModelStore, SharedStore};
pub use transport::{BatchSubscription, BatchTransport, ChannelTransport, SharedTransport};

pub use metrics::{
    pipeline_counters, Counter, CounterSnapshot, MetricValue, MetricsSink, PipelineCounters,
    SharedCounters, SharedSink,
};

// Message types for thread control
pub use messages::{ActorMsg, ActorStats, LearnerMsg, LearnerStats};

pub use learner::{
    spawn_learner, KlLrController, Learner, LearnerHandle, LearnerReport, PpoTrainer,
    StalenessCorrector, StepOutcome,
};

pub use actors::{
    spawn_actor, ActorHandle, ActorPool, AgentKind, CurrentActor, LearningActor, PolicyRunner,
    RandomHistoricalActor, RolloutWorker, TankAgent, VersionSync,
};

pub use environment::{Environment, TargetRange};

pub use runners::{AsyncPpoPipeline, PipelineResources, PipelineSummary};
