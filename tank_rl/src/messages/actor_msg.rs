//! Messages for actor threads.
//!
//! Episode return means skip NaN and infinite returns; those are only
//! counted.

use serde::{Deserialize, Serialize};

/// Commands sent to a running actor. Checked between episodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorMsg {
    /// Stop after the current episode.
    Stop,

    /// Stop starting new episodes (keep thread alive).
    Pause,

    Resume,

    /// Request statistics from the actor.
    RequestStats,
}

/// Running totals of one actor, sent on request and returned on join.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorStats {
    pub actor_id: usize,

    /// Environment steps across all episodes.
    pub steps: usize,

    /// Finished episodes, whatever their return.
    pub episodes: usize,

    /// Episodes whose return was NaN or infinite.
    pub non_finite_returns: usize,

    /// Mean return over episodes with a finite return.
    pub mean_return: f32,

    /// Return of the latest episode, as reported.
    pub last_return: f32,

    /// Batches accepted by the transport.
    pub batches_published: usize,

    /// Batches lost to a full transport.
    pub batches_dropped: usize,

    pub sync_timeouts: usize,

    /// Policy version used for the latest episode.
    pub model_version: Option<u64>,

    pub paused: bool,
}

impl ActorStats {
    pub fn new(actor_id: usize) -> Self {
        Self {
            actor_id,
            ..Default::default()
        }
    }

    fn finite_episodes(&self) -> usize {
        self.episodes - self.non_finite_returns
    }

    /// Fold a finished episode's return into the running mean.
    pub fn record_return(&mut self, episode_return: f32) {
        self.episodes += 1;
        self.last_return = episode_return;
        if episode_return.is_finite() {
            let n = self.finite_episodes() as f32;
            self.mean_return += (episode_return - self.mean_return) / n;
        } else {
            self.non_finite_returns += 1;
        }
    }

    pub fn add_steps(&mut self, n: usize) {
        self.steps = self.steps.saturating_add(n);
    }

    /// Combine per-actor stats. `actor_id`, `model_version` and
    /// `last_return` come from the entry on the newest policy.
    pub fn aggregate(stats: &[ActorStats]) -> ActorStats {
        let mut total = ActorStats::default();
        let mut return_sum = 0.0f32;
        for s in stats {
            total.steps = total.steps.saturating_add(s.steps);
            total.episodes += s.episodes;
            total.non_finite_returns += s.non_finite_returns;
            total.batches_published += s.batches_published;
            total.batches_dropped += s.batches_dropped;
            total.sync_timeouts += s.sync_timeouts;
            return_sum += s.mean_return * s.finite_episodes() as f32;
            if s.model_version >= total.model_version {
                total.model_version = s.model_version;
                total.actor_id = s.actor_id;
                total.last_return = s.last_return;
            }
        }
        if total.finite_episodes() > 0 {
            total.mean_return = return_sum / total.finite_episodes() as f32;
        }
        total
    }
}
