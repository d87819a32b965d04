//! Messages for the learner thread.

use serde::{Deserialize, Serialize};

use crate::learner::{LearnerReport, StepOutcome};

/// Commands sent to a running learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnerMsg {
    /// Stop the learner gracefully.
    Stop,

    /// Stop consuming batches (keep thread alive).
    Pause,

    /// Resume consuming after pause.
    Resume,

    /// Request statistics.
    RequestStats,
}

/// Statistics reported by the learner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnerStats {
    /// Accumulation rounds that reached training.
    pub rounds: usize,

    /// Rounds where every batch was stale.
    pub discarded_rounds: usize,

    /// Rounds rolled back because KL exceeded the hard limit.
    pub divergences: usize,

    /// Reloads after a corrupted model.
    pub recoveries: usize,

    /// Latest published model version.
    pub model_version: u64,

    /// Rows consumed by the optimizer since start.
    pub rows_trained: usize,

    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub kl: f64,
    pub lr: f64,

    /// Published versions per second.
    pub publishes_per_second: f32,

    pub paused: bool,
}

impl LearnerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one step outcome into the totals.
    pub fn record(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Waiting => {}
            StepOutcome::Discarded => self.discarded_rounds += 1,
            StepOutcome::Diverged { kl } => {
                self.rounds += 1;
                self.divergences += 1;
                self.kl = *kl;
            }
            StepOutcome::Recovered => {
                self.rounds += 1;
                self.recoveries += 1;
            }
            StepOutcome::Published(report) => self.record_publish(report),
        }
    }

    fn record_publish(&mut self, report: &LearnerReport) {
        self.rounds += 1;
        self.model_version = report.version;
        self.rows_trained += report.train.rows;
        self.policy_loss = report.train.policy_loss;
        self.value_loss = report.train.value_loss;
        self.entropy = report.train.entropy;
        self.kl = report.train.kl;
        self.lr = report.train.lr;
    }

    /// Update the publish rate, ignoring near-zero elapsed times.
    pub fn set_elapsed(&mut self, elapsed_secs: f32, publishes: u64) {
        const MIN_ELAPSED: f32 = 1e-6;
        self.publishes_per_second = if elapsed_secs < MIN_ELAPSED {
            0.0
        } else {
            publishes as f32 / elapsed_secs
        };
    }
}
