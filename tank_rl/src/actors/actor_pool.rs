//! Pool of actor threads.
//!
//! Every actor owns its environment and agent; the pool only holds the
//! handles and fans commands out to them.

use super::actor::ActorHandle;
use crate::error::PipelineError;
use crate::messages::ActorStats;

/// Multi-actor coordinator.
#[derive(Default)]
pub struct ActorPool {
    handles: Vec<ActorHandle>,
}

impl ActorPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n_actors: usize) -> Self {
        Self {
            handles: Vec::with_capacity(n_actors),
        }
    }

    pub fn add(&mut self, handle: ActorHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Send stop command to all actors.
    pub fn stop_all(&self) {
        for handle in &self.handles {
            handle.stop();
        }
    }

    pub fn pause_all(&self) {
        for handle in &self.handles {
            handle.pause();
        }
    }

    pub fn resume_all(&self) {
        for handle in &self.handles {
            handle.resume();
        }
    }

    /// Request stats from all actors.
    pub fn request_stats(&self) {
        for handle in &self.handles {
            handle.request_stats();
        }
    }

    /// Collect buffered stats from all actors (non-blocking).
    pub fn collect_stats(&self) -> Vec<ActorStats> {
        let mut all_stats = Vec::new();
        for handle in &self.handles {
            while let Some(stats) = handle.get_stats() {
                all_stats.push(stats);
            }
        }
        all_stats
    }

    /// Aggregate of the latest buffered stats of each actor.
    pub fn aggregate_stats(&self) -> ActorStats {
        let mut latest: Vec<ActorStats> = Vec::with_capacity(self.handles.len());
        for stats in self.collect_stats() {
            match latest.iter_mut().find(|s| s.actor_id == stats.actor_id) {
                Some(slot) => *slot = stats,
                None => latest.push(stats),
            }
        }
        ActorStats::aggregate(&latest)
    }

    pub fn any_finished(&self) -> bool {
        self.handles.iter().any(|h| !h.is_running())
    }

    pub fn finished_count(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_running()).count()
    }

    /// Stop and join every actor, returning final stats by actor.
    pub fn join_all(self) -> Vec<(usize, Result<ActorStats, PipelineError>)> {
        self.stop_all();
        self.handles
            .into_iter()
            .map(|handle| {
                let actor_id = handle.actor_id;
                let result = handle.join().unwrap_or_else(|_| {
                    log::error!("actor {actor_id} panicked");
                    Err(PipelineError::ThreadPanicked(format!("actor-{actor_id}")))
                });
                (actor_id, result)
            })
            .collect()
    }
}
