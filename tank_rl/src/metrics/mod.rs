//! Metrics for the actor-learner pipeline.
//!
//! ## Sinks
//!
//! - [`NullSink`]: discards everything
//! - [`LogSink`]: one `log::info!` line per value
//! - [`ChannelSink`]: bounded channel to a UI thread, drops when full
//! - [`MemorySink`]: keeps every value, for tests and post-run inspection
//! - [`CsvSink`]: CSV file for offline analysis
//! - [`MultiSink`]: fan-out to several sinks
//!
//! ## Counters
//!
//! - [`PipelineCounters`]: lock-free totals shared by actors and the learner

pub mod counters;
pub mod sink;

pub use counters::{pipeline_counters, Counter, CounterSnapshot, PipelineCounters, SharedCounters};
pub use sink::{
    ChannelSink, CsvSink, LogSink, MemorySink, MetricValue, MetricsSink, MultiSink, NullSink,
    SharedSink,
};
