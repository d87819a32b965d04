//! Episode loop driving one agent against its environment.
//!
//! ```text
//! sync ─► reset ─► observe ─► act ─► env.act ─► reward / is_done ─► observe_outcome
//!                     ▲                                                   │
//!                     └────────────── until done or max_episode_steps ◄───┘
//!                                            │
//!                              finish_episode ─► transport.publish
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::agent::{SyncStatus, TankAgent};
use crate::config::TrainingConfig;
use crate::environment::Environment;
use crate::error::{ConfigError, PipelineError};
use crate::messages::ActorStats;
use crate::metrics::{Counter, SharedCounters, SharedSink};
use crate::store::SharedStore;
use crate::transport::BatchTransport;

/// What happened to the batch of a finished episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The agent does not learn.
    NoBatch,
    Published { rows: usize },
    /// The transport was full.
    Dropped,
}

/// Outcome of one episode.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub actor_id: usize,
    /// Policy version the episode was played with
    pub version: u64,
    pub sync: SyncStatus,
    pub steps: usize,
    pub total_reward: f32,
    /// Ended by `max_episode_steps` rather than the environment
    pub truncated: bool,
    pub delivery: Delivery,
}

/// Worker owning one environment and one agent.
pub struct RolloutWorker<E: Environment, A: TankAgent> {
    env: E,
    agent: A,
    store: SharedStore,
    transport: Arc<dyn BatchTransport>,
    sink: SharedSink,
    counters: SharedCounters,
    max_episode_steps: usize,
    stats: ActorStats,
}

impl<E: Environment, A: TankAgent> RolloutWorker<E, A> {
    /// Fails when the environment and agent disagree on dimensions.
    pub fn new(
        env: E,
        agent: A,
        config: &TrainingConfig,
        store: SharedStore,
        transport: Arc<dyn BatchTransport>,
        sink: SharedSink,
        counters: SharedCounters,
    ) -> Result<Self, PipelineError> {
        if env.obs_size() != agent.obs_size() || env.action_dim() != agent.action_dim() {
            return Err(ConfigError::Inconsistent(format!(
                "environment is {}x{} (obs x action) but agent {} is {}x{}",
                env.obs_size(),
                env.action_dim(),
                agent.actor_id(),
                agent.obs_size(),
                agent.action_dim()
            ))
            .into());
        }
        if config.max_episode_steps == 0 {
            return Err(ConfigError::InvalidCount {
                field: "max_episode_steps",
                value: 0,
            }
            .into());
        }

        let stats = ActorStats::new(agent.actor_id());
        Ok(Self {
            env,
            agent,
            store,
            transport,
            sink,
            counters,
            max_episode_steps: config.max_episode_steps,
            stats,
        })
    }

    pub fn actor_id(&self) -> usize {
        self.agent.actor_id()
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn stats(&self) -> &ActorStats {
        &self.stats
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.stats.paused = paused;
    }

    /// Play one episode and hand its batch to the transport.
    ///
    /// A full transport is counted and reported as [`Delivery::Dropped`].
    pub fn run_episode(&mut self) -> Result<EpisodeSummary, PipelineError> {
        let actor_id = self.agent.actor_id();
        let sync = self.agent.sync(self.store.as_ref())?;
        self.env.reset(actor_id);

        let mut steps = 0;
        let mut total_reward = 0.0f32;
        let truncated = loop {
            let observation = self.env.observe(actor_id);
            let action = self.agent.act(&observation)?;
            self.env.act(actor_id, &action);
            let reward = self.env.reward(actor_id);
            steps += 1;
            total_reward += reward;

            let terminal = self.env.is_done(actor_id);
            let truncated = !terminal && steps >= self.max_episode_steps;
            self.agent.observe_outcome(reward, terminal || truncated);
            if terminal || truncated {
                break truncated;
            }
        };

        self.counters.add(Counter::EnvSteps, steps as u64);
        self.counters.incr(Counter::Episodes);
        self.stats.add_steps(steps);
        self.stats.record_return(total_reward);
        self.stats.model_version = Some(sync.version());

        let delivery = match self.agent.finish_episode()? {
            None => Delivery::NoBatch,
            Some(batch) => {
                let rows = batch.len();
                match self.transport.publish(batch) {
                    Ok(()) => {
                        self.stats.batches_published += 1;
                        Delivery::Published { rows }
                    }
                    Err(PipelineError::TransportFull) => {
                        self.counters.record(Counter::TransportDropped, self.sink.as_ref());
                        self.stats.batches_dropped += 1;
                        log::warn!("actor {actor_id} batch dropped: rows={rows}");
                        Delivery::Dropped
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        log::debug!(
            "episode done: actor={actor_id} kind={} version={} steps={steps} reward={:.3}",
            self.agent.kind().name(),
            sync.version(),
            total_reward
        );

        Ok(EpisodeSummary {
            actor_id,
            version: sync.version(),
            sync,
            steps,
            total_reward,
            truncated,
            delivery,
        })
    }

    /// One episode with local recovery.
    ///
    /// `Ok(None)` means the episode was abandoned: the sync timed out or
    /// nothing was recorded.
    pub fn step(&mut self) -> Result<Option<EpisodeSummary>, PipelineError> {
        match self.run_episode() {
            Ok(summary) => Ok(Some(summary)),
            Err(err @ PipelineError::SyncTimeout { .. }) => {
                self.counters.record(Counter::SyncTimeouts, self.sink.as_ref());
                self.stats.sync_timeouts += 1;
                log::warn!("actor {} sync failed, retrying: {err}", self.agent.actor_id());
                Ok(None)
            }
            Err(PipelineError::EmptyMemory) => {
                log::warn!("actor {} episode recorded nothing", self.agent.actor_id());
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Play episodes until `shutdown` is set or the transport closes.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<ActorStats, PipelineError> {
        while !shutdown.load(Ordering::Relaxed) {
            match self.step() {
                Ok(_) => {}
                Err(PipelineError::TransportClosed) => {
                    log::info!("transport closed, actor {} exiting", self.agent.actor_id());
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(self.stats.clone())
    }
}
