//! Environment contract for the rollout workers.
//!
//! The simulation is addressed per controlled agent: a worker observes,
//! acts and reads the reward of its own `agent_id` only.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A simulation hosting one or more controlled agents.
pub trait Environment: Send {
    /// Current observation of `agent_id`, `obs_size()` wide.
    fn observe(&mut self, agent_id: usize) -> Vec<f32>;

    /// Apply an `action_dim()` wide action and advance.
    fn act(&mut self, agent_id: usize, action: &[f32]);

    /// Reward earned by the last action.
    fn reward(&mut self, agent_id: usize) -> f32;

    fn is_done(&self, agent_id: usize) -> bool;

    /// Start a new episode for `agent_id`.
    fn reset(&mut self, _agent_id: usize) {}

    fn obs_size(&self) -> usize;

    fn action_dim(&self) -> usize;
}

/// Boxed environment, as built by runner factories.
impl<E: Environment + ?Sized> Environment for Box<E> {
    fn observe(&mut self, agent_id: usize) -> Vec<f32> {
        (**self).observe(agent_id)
    }

    fn act(&mut self, agent_id: usize, action: &[f32]) {
        (**self).act(agent_id, action)
    }

    fn reward(&mut self, agent_id: usize) -> f32 {
        (**self).reward(agent_id)
    }

    fn is_done(&self, agent_id: usize) -> bool {
        (**self).is_done(agent_id)
    }

    fn reset(&mut self, agent_id: usize) {
        (**self).reset(agent_id)
    }

    fn obs_size(&self) -> usize {
        (**self).obs_size()
    }

    fn action_dim(&self) -> usize {
        (**self).action_dim()
    }
}

/// One-dimensional tank that must drive onto a target line.
///
/// Observation is `[position, target, heading_error]`. The single action is
/// a throttle clamped to `[-1, 1]`. Reward is the reduction in distance to
/// the target; reaching it ends the episode with a bonus.
#[derive(Debug, Clone)]
pub struct TargetRange {
    position: f32,
    target: f32,
    last_reward: f32,
    done: bool,
    steps: usize,
    horizon: usize,
    rng: StdRng,
}

impl TargetRange {
    const SPEED: f32 = 0.1;
    const TOLERANCE: f32 = 0.05;
    const BONUS: f32 = 1.0;

    pub fn new(seed: u64) -> Self {
        let mut env = Self {
            position: 0.0,
            target: 0.0,
            last_reward: 0.0,
            done: false,
            steps: 0,
            horizon: 200,
            rng: StdRng::seed_from_u64(seed),
        };
        env.reset(0);
        env
    }

    /// Steps after which the episode ends on its own.
    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon.max(1);
        self
    }

    pub fn distance(&self) -> f32 {
        (self.target - self.position).abs()
    }
}

impl Environment for TargetRange {
    fn observe(&mut self, _agent_id: usize) -> Vec<f32> {
        let error = self.target - self.position;
        vec![self.position, self.target, error.signum() * error.abs().min(1.0)]
    }

    fn act(&mut self, _agent_id: usize, action: &[f32]) {
        if self.done {
            return;
        }
        let throttle = action.first().copied().unwrap_or(0.0);
        let throttle = if throttle.is_finite() { throttle.clamp(-1.0, 1.0) } else { 0.0 };

        let before = self.distance();
        self.position = (self.position + Self::SPEED * throttle).clamp(-2.0, 2.0);
        let after = self.distance();
        self.steps += 1;

        self.last_reward = before - after;
        if after < Self::TOLERANCE {
            self.last_reward += Self::BONUS;
            self.done = true;
        } else if self.steps >= self.horizon {
            self.done = true;
        }
    }

    fn reward(&mut self, _agent_id: usize) -> f32 {
        self.last_reward
    }

    fn is_done(&self, _agent_id: usize) -> bool {
        self.done
    }

    fn reset(&mut self, _agent_id: usize) {
        self.position = 0.0;
        let side = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        self.target = side * self.rng.gen_range(0.3..1.0);
        self.last_reward = 0.0;
        self.done = false;
        self.steps = 0;
    }

    fn obs_size(&self) -> usize {
        3
    }

    fn action_dim(&self) -> usize {
        1
    }
}
