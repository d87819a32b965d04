//! Error taxonomy for the actor-learner pipeline.
//!
//! Errors are split by how far they propagate:
//!
//! ```text
//! recovered locally        EmptyMemory, StaleBatchDropped, NonFiniteLoss,
//! (skip / drop / retry)    DivergenceDetected, SyncTimeout, TransportFull
//!
//! reload from store        ModelCorrupted
//!
//! fatal                    Store (when the reload itself fails), Config,
//!                          Spawn, ThreadPanicked
//! ```

use std::io;

use thiserror::Error;

/// Errors raised by the training pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No transitions were recorded before a batch was requested.
    #[error("trajectory memory is empty")]
    EmptyMemory,

    /// A batch trailed the learner by more than `max_lag` versions.
    #[error(
        "batch from actor {actor_id} at version {version} dropped: lag {lag} exceeds max lag {max_lag}"
    )]
    StaleBatchDropped {
        actor_id: usize,
        version: u64,
        lag: u64,
        max_lag: u64,
    },

    /// A loss scalar was NaN or infinite.
    #[error("non-finite {name} loss: {value}")]
    NonFiniteLoss { name: &'static str, value: f32 },

    /// Raw KL between the old and updated policy exceeded the hard limit.
    #[error("policy divergence: kl {kl:.5} exceeds hard limit {kl_max:.5}")]
    DivergenceDetected { kl: f64, kl_max: f64 },

    /// The canary prediction was not finite.
    #[error("model corrupted: {0}")]
    ModelCorrupted(String),

    /// Backoff exhausted without a newer published model.
    #[error("sync timed out after {attempts} attempts (local version {local_version:?})")]
    SyncTimeout {
        local_version: Option<u64>,
        attempts: u32,
    },

    /// A batch violated its shape invariants.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// An observation or action had the wrong width.
    #[error("{what} has width {got}, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// The transport queue was full and the batch was discarded.
    #[error("batch transport is full")]
    TransportFull,

    /// Every subscriber is gone.
    #[error("batch transport is closed")]
    TransportClosed,

    /// A pipeline thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A pipeline thread panicked before returning.
    #[error("{0} thread panicked")]
    ThreadPanicked(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Whether the error is handled where it occurs without touching the store.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::EmptyMemory
                | PipelineError::StaleBatchDropped { .. }
                | PipelineError::NonFiniteLoss { .. }
                | PipelineError::DivergenceDetected { .. }
                | PipelineError::SyncTimeout { .. }
                | PipelineError::TransportFull
        )
    }

    /// Whether the learner must reload its last persisted weights.
    pub fn requires_reload(&self) -> bool {
        matches!(self, PipelineError::ModelCorrupted(_))
    }

    /// Short stable name used for counters and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::EmptyMemory => "empty_memory",
            PipelineError::StaleBatchDropped { .. } => "stale_batch_dropped",
            PipelineError::NonFiniteLoss { .. } => "non_finite_loss",
            PipelineError::DivergenceDetected { .. } => "divergence_detected",
            PipelineError::ModelCorrupted(_) => "model_corrupted",
            PipelineError::SyncTimeout { .. } => "sync_timeout",
            PipelineError::InvalidBatch(_) => "invalid_batch",
            PipelineError::ShapeMismatch { .. } => "shape_mismatch",
            PipelineError::TransportFull => "transport_full",
            PipelineError::TransportClosed => "transport_closed",
            PipelineError::Spawn { .. } => "spawn",
            PipelineError::ThreadPanicked(_) => "thread_panicked",
            PipelineError::Store(_) => "store",
            PipelineError::Config(_) => "config",
        }
    }
}

/// Errors from a [`ModelStore`](crate::store::ModelStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no model stored under '{0}'")]
    NotFound(String),

    #[error("store io error: {0}")]
    Io(#[from] io::Error),

    #[error("store metadata error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Burn recorder failed to encode or decode a record.
    #[error("record codec error: {0}")]
    Codec(String),
}

/// Invalid or unreadable training configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A count parameter must be positive.
    #[error("{field} must be > 0, got {value}")]
    InvalidCount { field: &'static str, value: usize },

    /// A parameter is outside its valid range.
    #[error("{field} must be in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Two parameters contradict each other.
    #[error("inconsistent config: {0}")]
    Inconsistent(String),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
