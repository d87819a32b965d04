//! Actor side of the pipeline.
//!
//! - `agent`: the `TankAgent` capability set and its three variants
//! - `version_sync`: bounded reuse and backoff against the model store
//! - `rollout`: `RolloutWorker`, one agent playing episodes in one environment
//! - `actor` / `actor_pool`: threads running rollout workers
//!
//! Actors share nothing mutable with each other. They read the model store,
//! publish to the transport and bump atomic counters.

pub mod actor;
pub mod actor_pool;
pub mod agent;
pub mod rollout;
pub mod version_sync;

pub use actor::{spawn_actor, ActorHandle};
pub use actor_pool::ActorPool;
pub use agent::{
    ActionMode, AgentKind, CurrentActor, LearningActor, PolicyRunner, RandomHistoricalActor,
    SyncStatus, TankAgent,
};
pub use rollout::{Delivery, EpisodeSummary, RolloutWorker};
pub use version_sync::{Backoff, SyncOutcome, SyncedModels, VersionSync};

// Re-export from messages for convenience
pub use crate::messages::{ActorMsg, ActorStats};
