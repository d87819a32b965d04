//! KL-driven learning-rate controller.
//!
//! After every epoch the learner measures KL(old ‖ new) on a held-out slice
//! and feeds it here:
//!
//! ```text
//!                 raw kl > kl_max ──────────────► DivergenceDetected
//!                        │ no
//!                        ▼
//!              history.push(kl); m = history.mean()
//!                        │
//!   m > high·target      │ m < low·target          otherwise
//!   lr ← max(lr·shrink, lr_min)   lr ← min(lr·grow, lr_max)   unchanged
//! ```
//!
//! The hard stop is checked on the raw sample, before it enters the
//! history, so one explosive epoch neither adjusts the LR nor poisons the
//! rolling mean.

use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::core::kl_history::KlHistory;
use crate::error::PipelineError;

/// Outcome of one controller observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrAdjustment {
    Decreased,
    Increased,
    Unchanged,
}

/// Persisted controller state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    pub lr: f64,
    pub history: KlHistory,
}

/// Adaptive learning-rate controller with a divergence stop.
#[derive(Debug, Clone)]
pub struct KlLrController {
    target: f64,
    high_coef: f64,
    low_coef: f64,
    mult_high: f64,
    mult_low: f64,
    lr_min: f64,
    lr_max: f64,
    kl_max: f64,
    lr: f64,
    history: KlHistory,
}

impl KlLrController {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            target: config.kl_target,
            high_coef: config.kl_high_coef,
            low_coef: config.kl_low_coef,
            mult_high: config.lr_mult_high,
            mult_low: config.lr_mult_low,
            lr_min: config.lr_min,
            lr_max: config.lr_max,
            kl_max: config.kl_max,
            lr: config.initial_lr,
            history: KlHistory::new(config.kl_history_len),
        }
    }

    /// Override the current learning rate, clamped to the configured bounds.
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr.clamp(self.lr_min, self.lr_max);
        self
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn history(&self) -> &KlHistory {
        &self.history
    }

    pub fn kl_max(&self) -> f64 {
        self.kl_max
    }

    /// Record one KL sample and adapt the learning rate.
    pub fn observe(&mut self, kl: f64) -> Result<LrAdjustment, PipelineError> {
        if !kl.is_finite() || kl > self.kl_max {
            log::warn!("kl hard stop: kl={kl} kl_max={} lr={}", self.kl_max, self.lr);
            return Err(PipelineError::DivergenceDetected {
                kl,
                kl_max: self.kl_max,
            });
        }

        self.history.push(kl);
        let mean = self.history.mean().unwrap_or(kl);

        let adjustment = if mean > self.high_coef * self.target {
            self.lr = (self.lr * self.mult_high).max(self.lr_min);
            LrAdjustment::Decreased
        } else if mean < self.low_coef * self.target {
            self.lr = (self.lr * self.mult_low).min(self.lr_max);
            LrAdjustment::Increased
        } else {
            LrAdjustment::Unchanged
        };

        log::debug!(
            "kl controller: kl={kl:.6} mean={mean:.6} lr={:.3e} adjustment={adjustment:?}",
            self.lr
        );
        Ok(adjustment)
    }

    pub fn state(&self) -> ControllerState {
        ControllerState {
            lr: self.lr,
            history: self.history.clone(),
        }
    }

    /// Resume from persisted state. The LR is clamped and the history
    /// re-bounded to the current configuration.
    pub fn restore(&mut self, state: ControllerState) {
        self.lr = state.lr.clamp(self.lr_min, self.lr_max);
        let capacity = self.history.capacity();
        self.history = state.history;
        self.history.resize(capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band_config() -> TrainingConfig {
        TrainingConfig::new()
            .with_kl_band(0.01, 0.5, 2.0)
            .with_lr_multipliers(0.95, 1.05)
            .with_lr_bounds(1e-5, 1e-3)
            .with_initial_lr(1e-4)
            .with_kl_max(0.2)
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn test_high_kl_shrinks_lr() {
        let mut ctrl = KlLrController::from_config(&band_config());
        assert_eq!(ctrl.observe(0.025).unwrap(), LrAdjustment::Decreased);
        assert_close(ctrl.lr(), 9.5e-5);
    }

    #[test]
    fn test_low_kl_grows_lr() {
        let mut ctrl = KlLrController::from_config(&band_config());
        assert_eq!(ctrl.observe(0.003).unwrap(), LrAdjustment::Increased);
        assert_close(ctrl.lr(), 1.05e-4);
    }

    #[test]
    fn test_in_band_kl_leaves_lr() {
        let mut ctrl = KlLrController::from_config(&band_config());
        assert_eq!(ctrl.observe(0.012).unwrap(), LrAdjustment::Unchanged);
        assert_close(ctrl.lr(), 1e-4);
    }

    #[test]
    fn test_lr_respects_bounds() {
        let mut ctrl = KlLrController::from_config(&band_config()).with_lr(1e-5);
        ctrl.observe(0.1).unwrap();
        assert_close(ctrl.lr(), 1e-5);

        let mut ctrl = KlLrController::from_config(&band_config()).with_lr(1e-3);
        ctrl.observe(0.0).unwrap();
        assert_close(ctrl.lr(), 1e-3);
    }

    #[test]
    fn test_rule_uses_rolling_mean() {
        let mut ctrl = KlLrController::from_config(&band_config());
        ctrl.observe(0.025).unwrap();
        // mean(0.025, 0.003) = 0.014, inside the band
        assert_eq!(ctrl.observe(0.003).unwrap(), LrAdjustment::Unchanged);
    }

    #[test]
    fn test_divergence_skips_adjustment_and_history() {
        let mut ctrl = KlLrController::from_config(&band_config());
        let err = ctrl.observe(0.5).unwrap_err();
        assert!(matches!(err, PipelineError::DivergenceDetected { kl, .. } if kl == 0.5));
        assert_close(ctrl.lr(), 1e-4);
        assert!(ctrl.history().is_empty());

        assert!(ctrl.observe(f64::NAN).is_err());
        assert!(ctrl.history().is_empty());
    }

    #[test]
    fn test_state_round_trip() {
        let config = band_config().with_kl_history_len(3);
        let mut ctrl = KlLrController::from_config(&config);
        for kl in [0.03, 0.04, 0.05, 0.06] {
            ctrl.observe(kl).unwrap();
        }

        let json = serde_json::to_string(&ctrl.state()).unwrap();
        let state: ControllerState = serde_json::from_str(&json).unwrap();

        let mut resumed = KlLrController::from_config(&config);
        resumed.restore(state);
        assert_close(resumed.lr(), ctrl.lr());
        assert_eq!(resumed.history().len(), 3);
        assert_eq!(resumed.history().latest(), Some(0.06));
    }

    #[test]
    fn test_restore_rebounds_history() {
        let mut big = KlLrController::from_config(&band_config().with_kl_history_len(10));
        for _ in 0..10 {
            big.observe(0.01).unwrap();
        }

        let mut small = KlLrController::from_config(&band_config().with_kl_history_len(4));
        small.restore(big.state());
        assert_eq!(small.history().len(), 4);
        assert_eq!(small.history().capacity(), 4);
    }
}
