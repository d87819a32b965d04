//! Batch transport between rollout actors and the learner.
//!
//! ```text
//! actor 0 ─┐
//! actor 1 ─┼─► ChannelTransport (bounded) ─► BatchSubscription ─► learner
//! actor N ─┘
//! ```
//!
//! Delivery is at-most-once and unordered across actors. A full queue drops
//! the incoming batch: actors never block on a slow learner.

pub mod channel;

pub use channel::{BatchSubscription, ChannelTransport, SharedTransport};

use crate::core::batch::VersionedBatch;
use crate::error::PipelineError;

/// Publish/subscribe channel for versioned batches.
pub trait BatchTransport: Send + Sync {
    /// Hand a batch to whichever subscriber reads it first.
    ///
    /// Fails with `TransportFull` (batch dropped) or `TransportClosed`.
    fn publish(&self, batch: VersionedBatch) -> Result<(), PipelineError>;

    fn subscribe(&self) -> BatchSubscription;
}
