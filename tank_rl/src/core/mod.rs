//! Core data model shared by actors and the learner.

pub mod batch;
pub mod kl_history;
pub mod model_version;
pub mod transition;

pub use batch::{Batch, BatchParts, Minibatch, VersionedBatch};
pub use kl_history::KlHistory;
pub use model_version::{version_counter, SharedVersionCounter, VersionCounter};
pub use transition::{Decision, Transition};
