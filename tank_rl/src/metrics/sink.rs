//! Fire-and-forget metric sinks.
//!
//! Emitting never blocks the caller and never fails. Sinks that can lose
//! data (full channel, IO error) count or log the loss instead.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A metric payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Scalar(f64),
    Series(Vec<f64>),
}

impl MetricValue {
    /// Scalar value, or the last element of a series.
    pub fn last(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            MetricValue::Series(values) => values.last().copied(),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Scalar(v)
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Scalar(v as f64)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Scalar(v as f64)
    }
}

impl From<Vec<f64>> for MetricValue {
    fn from(values: Vec<f64>) -> Self {
        MetricValue::Series(values)
    }
}

/// Destination for named metric values.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, series: &str, value: MetricValue);

    /// Flush any buffered output.
    fn flush(&self) {}
}

/// Shared sink handle.
pub type SharedSink = Arc<dyn MetricsSink>;

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn emit(&self, _series: &str, _value: MetricValue) {}
}

/// Sink that writes each value through the `log` facade.
#[derive(Debug, Clone)]
pub struct LogSink {
    target: &'static str,
}

impl LogSink {
    pub fn new() -> Self {
        Self { target: "tank_rl::metrics" }
    }

    /// Log under a custom target so values can be filtered separately.
    pub fn with_target(mut self, target: &'static str) -> Self {
        self.target = target;
        self
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for LogSink {
    fn emit(&self, series: &str, value: MetricValue) {
        match value {
            MetricValue::Scalar(v) => log::info!(target: self.target, "metric series={series} value={v}"),
            MetricValue::Series(values) => {
                log::info!(target: self.target, "metric series={series} len={} values={values:?}", values.len())
            }
        }
    }
}

/// Bounded channel sink. Values are dropped, and counted, when the reader lags.
pub struct ChannelSink {
    tx: Sender<(String, MetricValue)>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create the sink and the receiving end.
    pub fn new(capacity: usize) -> (Self, Receiver<(String, MetricValue)>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Values lost to a full or disconnected channel.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl MetricsSink for ChannelSink {
    fn emit(&self, series: &str, value: MetricValue) {
        match self.tx.try_send((series.to_string(), value)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Sink that keeps every value in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(String, MetricValue)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every emitted value, in emission order.
    pub fn entries(&self) -> Vec<(String, MetricValue)> {
        self.entries.lock().clone()
    }

    /// Values emitted under `series`.
    pub fn series(&self, series: &str) -> Vec<MetricValue> {
        self.entries
            .lock()
            .iter()
            .filter(|(name, _)| name == series)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Most recent value emitted under `series`.
    pub fn latest(&self, series: &str) -> Option<MetricValue> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|(name, _)| name == series)
            .map(|(_, value)| value.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl MetricsSink for MemorySink {
    fn emit(&self, series: &str, value: MetricValue) {
        self.entries.lock().push((series.to_string(), value));
    }
}

/// CSV file sink.
///
/// Columns are `elapsed_secs,series,value`. Series values are joined with `;`.
pub struct CsvSink {
    writer: Mutex<BufWriter<File>>,
    start_time: Instant,
}

impl CsvSink {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "elapsed_secs,series,value")?;

        Ok(Self {
            writer: Mutex::new(writer),
            start_time: Instant::now(),
        })
    }
}

impl MetricsSink for CsvSink {
    fn emit(&self, series: &str, value: MetricValue) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let rendered = match value {
            MetricValue::Scalar(v) => v.to_string(),
            MetricValue::Series(values) => values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(";"),
        };

        if let Err(e) = writeln!(self.writer.lock(), "{elapsed:.3},{series},{rendered}") {
            log::warn!("csv metrics write failed: series={series} error={e}");
        }
    }

    fn flush(&self) {
        if let Err(e) = self.writer.lock().flush() {
            log::warn!("csv metrics flush failed: error={e}");
        }
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().flush();
    }
}

/// Sink that forwards to several sinks.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<SharedSink>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, sink: SharedSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MetricsSink for MultiSink {
    fn emit(&self, series: &str, value: MetricValue) {
        for sink in &self.sinks {
            sink.emit(series, value.clone());
        }
    }

    fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}
