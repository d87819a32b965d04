//! Bounded ring buffer of recent KL samples.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Recent KL-divergence samples, oldest first.
///
/// Persisted with the policy so a restarted learner resumes the same
/// learning-rate trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlHistory {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl KlHistory {
    /// Create an empty history. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn push(&mut self, kl: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(kl);
    }

    /// Rolling mean, or `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Re-bound to a new capacity, keeping the most recent samples.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }
}
