//! Asynchronous actor-learner PPO pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        Main Thread                             │
//! │  • Bootstraps the learner (publishes version 0)                │
//! │  • Spawns actors and learner                                   │
//! │  • Waits for a duration or a target version                    │
//! │  • Handles shutdown                                            │
//! └────────────────────────────────────────────────────────────────┘
//!          ↓                                              ↓
//! ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │ tank-actor-0     │  │ tank-actor-1     │  │ tank-actor-N-1   │
//! │  • Own env       │  │  • Own env       │  │  • Own env       │
//! │  • Sync weights  │  │  • Sync weights  │  │  • Sync weights  │
//! │  • Play episode  │  │  • Play episode  │  │  • Play episode  │
//! └────────┬─────────┘  └────────┬─────────┘  └────────┬─────────┘
//!          └───────────────┬─────┴─────────────────────┘
//!                          ↓
//!               ┌──────────────────────┐        ┌─────────────┐
//!               │   ChannelTransport   │        │ ModelStore  │
//!               └──────────┬───────────┘        └──────▲──────┘
//!                          ↓                           │
//!               ┌──────────────────────┐               │
//!               │    tank-learner      │───────────────┘
//!               │  • Correct staleness │   value, then policy
//!               │  • Train epochs      │
//!               └──────────────────────┘
//! ```
//!
//! Evaluation actors ([`CurrentActor`], [`RandomHistoricalActor`]) can be
//! added next to the learning actors. They play but never publish batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;

use crate::actors::{
    spawn_actor, ActorHandle, ActorPool, CurrentActor, LearningActor, PolicyRunner,
    RandomHistoricalActor, RolloutWorker, TankAgent,
};
use crate::config::TrainingConfig;
use crate::core::model_version::{version_counter, SharedVersionCounter};
use crate::environment::Environment;
use crate::error::PipelineError;
use crate::learner::{spawn_learner, Learner, LearnerHandle, PpoTrainer};
use crate::messages::{ActorStats, LearnerStats};
use crate::metrics::{pipeline_counters, CounterSnapshot, NullSink, SharedCounters, SharedSink};
use crate::nn::{GaussianPolicy, ValueFunction};
use crate::store::SharedStore;
use crate::transport::{BatchTransport, ChannelTransport, SharedTransport};

/// Interval of the main thread's wait loop.
const MONITOR_POLL: Duration = Duration::from_millis(10);

/// Interval between progress logs.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared services handed to every pipeline thread.
#[derive(Clone)]
pub struct PipelineResources {
    pub store: SharedStore,
    pub sink: SharedSink,
    pub counters: SharedCounters,
    /// Greedy actors playing the newest policy
    pub current_actors: usize,
    /// Actors playing archived snapshots
    pub historical_actors: usize,
}

impl PipelineResources {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            sink: Arc::new(NullSink),
            counters: pipeline_counters(),
            current_actors: 0,
            historical_actors: 0,
        }
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_counters(mut self, counters: SharedCounters) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_evaluators(mut self, current: usize, historical: usize) -> Self {
        self.current_actors = current;
        self.historical_actors = historical;
        self
    }
}

/// Final state of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    /// Last version published by the learner
    pub final_version: u64,
    pub elapsed: Duration,
    pub counters: CounterSnapshot,
    pub learner: LearnerStats,
    /// Final stats of each actor, by actor id
    pub actors: Vec<ActorStats>,
}

impl PipelineSummary {
    pub fn actor_total(&self) -> ActorStats {
        ActorStats::aggregate(&self.actors)
    }
}

/// A running pipeline: `worker_count` learning actors, optional evaluation
/// actors and one learner.
pub struct AsyncPpoPipeline {
    learner: LearnerHandle,
    actors: ActorPool,
    shutdown: Arc<AtomicBool>,
    transport: SharedTransport,
    counters: SharedCounters,
    version: SharedVersionCounter,
    started: Instant,
}

impl AsyncPpoPipeline {
    /// Bootstrap the learner and start every thread.
    ///
    /// `networks` builds an architecture-matching `(policy, value)` pair for
    /// each actor; the weights are replaced on the first sync.
    /// `env_factory` builds the environment of the given actor id.
    pub fn spawn<B, P, V, NF, EF, E>(
        config: &TrainingConfig,
        trainer: PpoTrainer<B, P, V>,
        networks: NF,
        env_factory: EF,
        resources: PipelineResources,
    ) -> Result<Self, PipelineError>
    where
        B: AutodiffBackend,
        P: GaussianPolicy<B> + AutodiffModule<B> + 'static,
        V: ValueFunction<B> + AutodiffModule<B> + 'static,
        Learner<B, P, V>: Send + 'static,
        NF: Fn(&B::Device) -> (P, V),
        EF: Fn(usize) -> E,
        E: Environment + 'static,
    {
        let device = trainer.device().clone();
        let version = version_counter();
        let learner = Learner::new(
            trainer,
            config,
            resources.store.clone(),
            resources.sink.clone(),
            resources.counters.clone(),
        )?
        .with_version_counter(version.clone());

        let transport: SharedTransport = Arc::new(ChannelTransport::new(config.transport_capacity));
        let publish_to: Arc<dyn BatchTransport> = transport.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let runner = |device: &B::Device| {
            let (policy, value) = networks(device);
            PolicyRunner::new(policy, value, device.clone())
        };

        let total = config.worker_count + resources.current_actors + resources.historical_actors;
        let mut actors = ActorPool::with_capacity(total);
        for actor_id in 0..total {
            let env = env_factory(actor_id);
            let launched = if actor_id < config.worker_count {
                let agent = LearningActor::new(actor_id, runner(&device), config);
                launch(env, agent, config, &resources, &publish_to, &shutdown)
            } else if actor_id < config.worker_count + resources.current_actors {
                let agent = CurrentActor::new(actor_id, runner(&device), config);
                launch(env, agent, config, &resources, &publish_to, &shutdown)
            } else {
                let agent = RandomHistoricalActor::new(actor_id, runner(&device));
                launch(env, agent, config, &resources, &publish_to, &shutdown)
            };
            match launched {
                Ok(handle) => actors.add(handle),
                Err(err) => {
                    shutdown.store(true, Ordering::Relaxed);
                    actors.join_all();
                    return Err(err);
                }
            }
        }

        let learner = match spawn_learner(learner, transport.subscribe(), shutdown.clone()) {
            Ok(handle) => handle,
            Err(err) => {
                shutdown.store(true, Ordering::Relaxed);
                actors.join_all();
                return Err(err);
            }
        };
        log::info!(
            "pipeline started: learning={} current={} historical={} version={}",
            config.worker_count,
            resources.current_actors,
            resources.historical_actors,
            version.current()
        );

        Ok(Self {
            learner,
            actors,
            shutdown,
            transport,
            counters: resources.counters,
            version,
            started: Instant::now(),
        })
    }

    /// Latest published version.
    pub fn version(&self) -> u64 {
        self.version.current()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    pub fn is_learner_running(&self) -> bool {
        self.learner.is_running()
    }

    /// Run for `duration`, then shut down.
    pub fn run_for(self, duration: Duration) -> Result<PipelineSummary, PipelineError> {
        let deadline = Instant::now() + duration;
        self.wait(|_| Instant::now() >= deadline);
        self.shutdown()
    }

    /// Run until `version` is published or `timeout` elapses, then shut
    /// down. Check [`PipelineSummary::final_version`] for which came first.
    pub fn run_until_version(
        self,
        version: u64,
        timeout: Duration,
    ) -> Result<PipelineSummary, PipelineError> {
        let deadline = Instant::now() + timeout;
        self.wait(|current| current >= version || Instant::now() >= deadline);
        if self.version() < version {
            log::warn!(
                "target version not reached: target={version} version={}",
                self.version()
            );
        }
        self.shutdown()
    }

    /// Block until `done(version)` holds or the learner exits.
    fn wait(&self, mut done: impl FnMut(u64) -> bool) {
        let mut last_log = Instant::now();
        while !done(self.version()) {
            if !self.learner.is_running() {
                log::warn!("learner exited early: version={}", self.version());
                return;
            }
            if last_log.elapsed() >= PROGRESS_INTERVAL {
                let counts = self.counters.snapshot();
                log::info!(
                    "progress: version={} env_steps={} episodes={} batches={} stale={}",
                    self.version(),
                    counts.env_steps,
                    counts.episodes,
                    counts.batches_trained,
                    counts.stale_dropped
                );
                last_log = Instant::now();
            }
            std::thread::sleep(MONITOR_POLL);
        }
    }

    /// Stop every thread and collect the final stats.
    ///
    /// The first fatal error of the learner, or else of an actor, is
    /// returned after all threads are joined.
    pub fn shutdown(self) -> Result<PipelineSummary, PipelineError> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.learner.stop();
        self.actors.stop_all();
        self.transport.close();

        let mut first_error = None;
        let mut actors = Vec::with_capacity(self.actors.len());
        for (actor_id, result) in self.actors.join_all() {
            match result {
                Ok(stats) => actors.push(stats),
                Err(err) => {
                    log::error!("actor {actor_id} failed: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }

        let learner = match self.learner.join() {
            Ok(Ok(stats)) => stats,
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(PipelineError::ThreadPanicked("learner".to_string())),
        };
        if let Some(err) = first_error {
            return Err(err);
        }

        let summary = PipelineSummary {
            final_version: self.version.current(),
            elapsed: self.started.elapsed(),
            counters: self.counters.snapshot(),
            learner,
            actors,
        };
        log::info!(
            "pipeline stopped: version={} elapsed={:.1}s env_steps={} publishes={}",
            summary.final_version,
            summary.elapsed.as_secs_f64(),
            summary.counters.env_steps,
            summary.counters.publishes
        );
        Ok(summary)
    }
}

fn launch<E, A>(
    env: E,
    agent: A,
    config: &TrainingConfig,
    resources: &PipelineResources,
    transport: &Arc<dyn BatchTransport>,
    shutdown: &Arc<AtomicBool>,
) -> Result<ActorHandle, PipelineError>
where
    E: Environment + 'static,
    A: TankAgent + 'static,
{
    let worker = RolloutWorker::new(
        env,
        agent,
        config,
        resources.store.clone(),
        transport.clone(),
        resources.sink.clone(),
        resources.counters.clone(),
    )?;
    spawn_actor(worker, shutdown.clone())
}
