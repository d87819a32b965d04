//! Shared pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::sink::{MetricValue, MetricsSink};

/// Named pipeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    BatchesReceived,
    BatchesTrained,
    StaleDropped,
    MinibatchesSkipped,
    Divergences,
    ModelReloads,
    SyncTimeouts,
    Publishes,
    EnvSteps,
    Episodes,
    TransportDropped,
}

impl Counter {
    pub const ALL: [Counter; 11] = [
        Counter::BatchesReceived,
        Counter::BatchesTrained,
        Counter::StaleDropped,
        Counter::MinibatchesSkipped,
        Counter::Divergences,
        Counter::ModelReloads,
        Counter::SyncTimeouts,
        Counter::Publishes,
        Counter::EnvSteps,
        Counter::Episodes,
        Counter::TransportDropped,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::BatchesReceived => "batches_received",
            Counter::BatchesTrained => "batches_trained",
            Counter::StaleDropped => "stale_dropped",
            Counter::MinibatchesSkipped => "minibatches_skipped",
            Counter::Divergences => "divergences",
            Counter::ModelReloads => "model_reloads",
            Counter::SyncTimeouts => "sync_timeouts",
            Counter::Publishes => "publishes",
            Counter::EnvSteps => "env_steps",
            Counter::Episodes => "episodes",
            Counter::TransportDropped => "transport_dropped",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Thread-safe pipeline totals.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    values: [AtomicU64; 11],
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, counter: Counter, n: u64) -> u64 {
        self.values[counter.index()].fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn incr(&self, counter: Counter) -> u64 {
        self.add(counter, 1)
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter.index()].load(Ordering::Relaxed)
    }

    /// Increment and emit the new total as `counter/<name>`.
    pub fn record(&self, counter: Counter, sink: &dyn MetricsSink) -> u64 {
        let total = self.incr(counter);
        sink.emit(&format!("counter/{}", counter.name()), MetricValue::Scalar(total as f64));
        total
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            batches_received: self.get(Counter::BatchesReceived),
            batches_trained: self.get(Counter::BatchesTrained),
            stale_dropped: self.get(Counter::StaleDropped),
            minibatches_skipped: self.get(Counter::MinibatchesSkipped),
            divergences: self.get(Counter::Divergences),
            model_reloads: self.get(Counter::ModelReloads),
            sync_timeouts: self.get(Counter::SyncTimeouts),
            publishes: self.get(Counter::Publishes),
            env_steps: self.get(Counter::EnvSteps),
            episodes: self.get(Counter::Episodes),
            transport_dropped: self.get(Counter::TransportDropped),
        }
    }

    pub fn reset(&self) {
        for value in &self.values {
            value.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub batches_received: u64,
    pub batches_trained: u64,
    pub stale_dropped: u64,
    pub minibatches_skipped: u64,
    pub divergences: u64,
    pub model_reloads: u64,
    pub sync_timeouts: u64,
    pub publishes: u64,
    pub env_steps: u64,
    pub episodes: u64,
    pub transport_dropped: u64,
}

/// Shared counters.
pub type SharedCounters = Arc<PipelineCounters>;

/// Create new shared counters.
pub fn pipeline_counters() -> SharedCounters {
    Arc::new(PipelineCounters::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MemorySink;

    #[test]
    fn test_counters_start_at_zero() {
        let counters = PipelineCounters::new();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_add_and_snapshot() {
        let counters = PipelineCounters::new();
        counters.add(Counter::EnvSteps, 100);
        counters.add(Counter::EnvSteps, 50);
        counters.incr(Counter::Publishes);

        let snap = counters.snapshot();
        assert_eq!(snap.env_steps, 150);
        assert_eq!(snap.publishes, 1);
        assert_eq!(snap.stale_dropped, 0);
    }

    #[test]
    fn test_record_emits_total() {
        let counters = PipelineCounters::new();
        let sink = MemorySink::new();
        counters.record(Counter::StaleDropped, &sink);
        counters.record(Counter::StaleDropped, &sink);

        assert_eq!(
            sink.latest("counter/stale_dropped"),
            Some(MetricValue::Scalar(2.0))
        );
    }

    #[test]
    fn test_shared_counters_across_threads() {
        let counters = pipeline_counters();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counters);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        c.incr(Counter::Episodes);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.get(Counter::Episodes), 400);

        counters.reset();
        assert_eq!(counters.get(Counter::Episodes), 0);
    }

    #[test]
    fn test_counter_names_unique() {
        let mut names: Vec<_> = Counter::ALL.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Counter::ALL.len());
    }
}
