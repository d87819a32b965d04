//! Per-step transition types.
//!
//! A step is recorded in two halves. The [`Decision`] is known when the
//! agent acts; reward and termination only arrive after the environment
//! advances. A [`Transition`] is both halves joined.

use serde::{Deserialize, Serialize};

/// Decision half of a step, recorded when the action is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub state: Vec<f32>,
    pub action: Vec<f32>,
    /// Gaussian mean the action was sampled from
    pub action_mean: Vec<f32>,
    /// Gaussian log standard deviation the action was sampled from
    pub action_log_std: Vec<f32>,
    /// log π_old(a|s), summed over action dimensions
    pub log_prob: f32,
    /// V(s) under the acting value network
    pub value: f32,
}

/// One complete decision step for one actor-controlled agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: Vec<f32>,
    pub action: Vec<f32>,
    pub action_mean: Vec<f32>,
    pub action_log_std: Vec<f32>,
    pub log_prob: f32,
    pub value: f32,
    pub reward: f32,
    pub done: bool,
}

impl Transition {
    /// Join a decision with its observed outcome.
    pub fn from_decision(decision: Decision, reward: f32, done: bool) -> Self {
        Self {
            state: decision.state,
            action: decision.action,
            action_mean: decision.action_mean,
            action_log_std: decision.action_log_std,
            log_prob: decision.log_prob,
            value: decision.value,
            reward,
            done,
        }
    }

    /// Split back into the decision half and `(reward, done)`.
    pub fn into_parts(self) -> (Decision, f32, bool) {
        let decision = Decision {
            state: self.state,
            action: self.action,
            action_mean: self.action_mean,
            action_log_std: self.action_log_std,
            log_prob: self.log_prob,
            value: self.value,
        };
        (decision, self.reward, self.done)
    }

    pub fn action_dim(&self) -> usize {
        self.action.len()
    }
}
