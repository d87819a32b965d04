//! Learner side of the pipeline.
//!
//! - `StalenessCorrector`: lag-based discount and drop
//! - `KlLrController`: KL-driven learning rate and divergence limit
//! - `HealthGuard`: finite-loss and canary checks
//! - `PpoTrainer`: epochs of minibatch PPO on one training set
//! - `Learner`: accumulation, training and publishing state machine

pub mod health;
pub mod kl_controller;
pub mod learner;
pub mod staleness;
pub mod trainer;

#[cfg(test)]
mod tests;

pub use health::{canary_input, HealthGuard};
pub use kl_controller::{ControllerState, KlLrController, LrAdjustment};
pub use learner::{spawn_learner, Learner, LearnerHandle, LearnerReport, LearnerState, StepOutcome};
pub use staleness::{AdmittedBatch, Correction, StalenessCorrector};
pub use trainer::{PpoTrainer, TrainOutcome, TrainReport};

// Re-export from messages for convenience
pub use crate::messages::{LearnerMsg, LearnerStats};
