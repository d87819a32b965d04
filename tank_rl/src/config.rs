//! Immutable hyperparameter record shared by every pipeline component.
//!
//! A `TrainingConfig` is built once (defaults, builder methods or JSON),
//! validated, and then handed by reference to each constructor. Nothing
//! reads configuration from ambient global state.
//!
//! ```rust,ignore
//! let config = TrainingConfig::new()
//!     .with_worker_count(4)
//!     .with_advantage(AdvantageMode::VTrace { clip_rho: 1.0, clip_c: 1.0 })
//!     .with_max_lag(3);
//! config.validate()?;
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which advantage estimator the pipeline runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdvantageMode {
    /// On-policy GAE computed by the actor when the episode closes.
    #[default]
    Gae,
    /// V-trace recomputed by the learner against the current policy.
    #[serde(rename = "vtrace")]
    VTrace { clip_rho: f32, clip_c: f32 },
}

/// Training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    // Advantage estimation
    pub gamma: f32,
    pub gae_lambda: f32,
    pub advantage: AdvantageMode,
    pub normalize_advantages: bool,

    // PPO
    pub clip_policy: f32,
    pub clip_value: f32,
    pub entropy_coeff: f32,
    pub epochs: usize,
    pub minibatch_size: usize,
    /// Global L2 norm each network's gradients are clipped to.
    pub clip_norm: f32,
    pub adam_epsilon: f32,

    // KL / learning-rate controller
    pub kl_target: f64,
    pub kl_high_coef: f64,
    pub kl_low_coef: f64,
    pub lr_mult_high: f64,
    pub lr_mult_low: f64,
    pub lr_min: f64,
    pub lr_max: f64,
    pub initial_lr: f64,
    /// Raw KL above which a training pass is abandoned.
    pub kl_max: f64,
    pub kl_history_len: usize,
    /// Fraction of each training set held out for KL measurement.
    pub kl_holdout_fraction: f32,

    // Staleness
    pub trust_coeff: f32,
    pub max_lag: u64,

    // Version sync
    pub reuse_limit: u32,
    pub sync_initial_backoff_ms: u64,
    pub sync_backoff_multiplier: f64,
    pub sync_max_backoff_ms: u64,
    pub sync_max_retries: u32,

    // Pipeline
    /// Buffered batches that trigger a training pass.
    pub worker_count: usize,
    pub warmup_steps: usize,
    pub max_episode_steps: usize,
    /// Archive a `policy@<version>` snapshot every N versions (0 disables).
    pub snapshot_interval: u64,
    pub transport_capacity: usize,
    pub learner_poll_ms: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            gae_lambda: 0.95,
            advantage: AdvantageMode::Gae,
            normalize_advantages: true,

            clip_policy: 0.2,
            clip_value: 0.2,
            entropy_coeff: 0.01,
            epochs: 4,
            minibatch_size: 64,
            clip_norm: 0.5,
            adam_epsilon: 1e-5,

            kl_target: 0.01,
            kl_high_coef: 2.0,
            kl_low_coef: 0.5,
            lr_mult_high: 0.95,
            lr_mult_low: 1.05,
            lr_min: 1e-5,
            lr_max: 1e-3,
            initial_lr: 3e-4,
            kl_max: 0.2,
            kl_history_len: 10,
            kl_holdout_fraction: 0.1,

            trust_coeff: 0.25,
            max_lag: 2,

            reuse_limit: 4,
            sync_initial_backoff_ms: 50,
            sync_backoff_multiplier: 2.0,
            sync_max_backoff_ms: 2000,
            sync_max_retries: 8,

            worker_count: 3,
            warmup_steps: 0,
            max_episode_steps: 1000,
            snapshot_interval: 0,
            transport_capacity: 64,
            learner_poll_ms: 10,
        }
    }
}

impl TrainingConfig {
    /// Create config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_gae_lambda(mut self, lambda: f32) -> Self {
        self.gae_lambda = lambda;
        self
    }

    pub fn with_advantage(mut self, mode: AdvantageMode) -> Self {
        self.advantage = mode;
        self
    }

    pub fn with_normalize_advantages(mut self, normalize: bool) -> Self {
        self.normalize_advantages = normalize;
        self
    }

    pub fn with_clip_policy(mut self, clip: f32) -> Self {
        self.clip_policy = clip;
        self
    }

    pub fn with_clip_value(mut self, clip: f32) -> Self {
        self.clip_value = clip;
        self
    }

    pub fn with_entropy_coeff(mut self, coeff: f32) -> Self {
        self.entropy_coeff = coeff;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_minibatch_size(mut self, size: usize) -> Self {
        self.minibatch_size = size;
        self
    }

    pub fn with_clip_norm(mut self, norm: f32) -> Self {
        self.clip_norm = norm;
        self
    }

    /// Set the KL target and the band coefficients around it.
    pub fn with_kl_band(mut self, target: f64, low_coef: f64, high_coef: f64) -> Self {
        self.kl_target = target;
        self.kl_low_coef = low_coef;
        self.kl_high_coef = high_coef;
        self
    }

    pub fn with_lr_multipliers(mut self, shrink: f64, grow: f64) -> Self {
        self.lr_mult_high = shrink;
        self.lr_mult_low = grow;
        self
    }

    pub fn with_lr_bounds(mut self, lr_min: f64, lr_max: f64) -> Self {
        self.lr_min = lr_min;
        self.lr_max = lr_max;
        self
    }

    pub fn with_initial_lr(mut self, lr: f64) -> Self {
        self.initial_lr = lr;
        self
    }

    pub fn with_kl_max(mut self, kl_max: f64) -> Self {
        self.kl_max = kl_max;
        self
    }

    pub fn with_kl_history_len(mut self, len: usize) -> Self {
        self.kl_history_len = len;
        self
    }

    pub fn with_kl_holdout_fraction(mut self, fraction: f32) -> Self {
        self.kl_holdout_fraction = fraction;
        self
    }

    pub fn with_trust_coeff(mut self, coeff: f32) -> Self {
        self.trust_coeff = coeff;
        self
    }

    pub fn with_max_lag(mut self, max_lag: u64) -> Self {
        self.max_lag = max_lag;
        self
    }

    pub fn with_reuse_limit(mut self, limit: u32) -> Self {
        self.reuse_limit = limit;
        self
    }

    /// Set the version-sync backoff schedule.
    pub fn with_sync_backoff(mut self, initial_ms: u64, max_ms: u64, max_retries: u32) -> Self {
        self.sync_initial_backoff_ms = initial_ms;
        self.sync_max_backoff_ms = max_ms;
        self.sync_max_retries = max_retries;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_warmup_steps(mut self, steps: usize) -> Self {
        self.warmup_steps = steps;
        self
    }

    pub fn with_max_episode_steps(mut self, steps: usize) -> Self {
        self.max_episode_steps = steps;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn with_transport_capacity(mut self, capacity: usize) -> Self {
        self.transport_capacity = capacity;
        self
    }

    pub fn sync_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.sync_initial_backoff_ms)
    }

    pub fn sync_max_backoff(&self) -> Duration {
        Duration::from_millis(self.sync_max_backoff_ms)
    }

    pub fn learner_poll_interval(&self) -> Duration {
        Duration::from_millis(self.learner_poll_ms)
    }

    /// Validate the configuration.
    ///
    /// # Validation Rules
    /// - Count parameters must be > 0
    /// - gamma and gae_lambda must be in [0.0, 1.0]
    /// - lr_min <= initial_lr <= lr_max, with positive bounds
    /// - lr_mult_high < 1 < lr_mult_low
    /// - kl_low_coef < kl_high_coef
    /// - kl_holdout_fraction must be in [0.0, 0.5)
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("epochs", self.epochs),
            ("minibatch_size", self.minibatch_size),
            ("kl_history_len", self.kl_history_len),
            ("worker_count", self.worker_count),
            ("max_episode_steps", self.max_episode_steps),
            ("transport_capacity", self.transport_capacity),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::InvalidCount { field, value });
            }
        }

        check_range("gamma", self.gamma as f64, 0.0, 1.0)?;
        check_range("gae_lambda", self.gae_lambda as f64, 0.0, 1.0)?;
        check_range("clip_policy", self.clip_policy as f64, f64::EPSILON, 1.0)?;
        check_range("clip_value", self.clip_value as f64, f64::EPSILON, f64::MAX)?;
        check_range("clip_norm", self.clip_norm as f64, f64::EPSILON, f64::MAX)?;
        check_range("entropy_coeff", self.entropy_coeff as f64, 0.0, f64::MAX)?;
        check_range("trust_coeff", self.trust_coeff as f64, 0.0, f64::MAX)?;
        check_range("kl_target", self.kl_target, f64::EPSILON, f64::MAX)?;
        check_range("kl_max", self.kl_max, f64::EPSILON, f64::MAX)?;
        check_range("lr_min", self.lr_min, f64::MIN_POSITIVE, f64::MAX)?;
        check_range("initial_lr", self.initial_lr, self.lr_min, self.lr_max)?;
        check_range("lr_mult_high", self.lr_mult_high, f64::EPSILON, 1.0)?;
        check_range("lr_mult_low", self.lr_mult_low, 1.0, f64::MAX)?;
        check_range(
            "kl_holdout_fraction",
            self.kl_holdout_fraction as f64,
            0.0,
            0.5 - f64::EPSILON,
        )?;
        check_range(
            "sync_backoff_multiplier",
            self.sync_backoff_multiplier,
            1.0,
            f64::MAX,
        )?;

        if self.lr_min > self.lr_max {
            return Err(ConfigError::Inconsistent(format!(
                "lr_min ({}) exceeds lr_max ({})",
                self.lr_min, self.lr_max
            )));
        }
        if self.kl_low_coef >= self.kl_high_coef {
            return Err(ConfigError::Inconsistent(format!(
                "kl_low_coef ({}) must be below kl_high_coef ({})",
                self.kl_low_coef, self.kl_high_coef
            )));
        }
        if self.sync_initial_backoff_ms > self.sync_max_backoff_ms {
            return Err(ConfigError::Inconsistent(format!(
                "sync_initial_backoff_ms ({}) exceeds sync_max_backoff_ms ({})",
                self.sync_initial_backoff_ms, self.sync_max_backoff_ms
            )));
        }
        if let AdvantageMode::VTrace { clip_rho, clip_c } = self.advantage {
            check_range("clip_rho", clip_rho as f64, 0.0, f64::MAX)?;
            check_range("clip_c", clip_c as f64, 0.0, f64::MAX)?;
        }

        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}
