//! Bounded crossbeam channel transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use super::BatchTransport;
use crate::core::batch::VersionedBatch;
use crate::error::PipelineError;

/// Bounded, lossy batch queue.
pub struct ChannelTransport {
    tx: Sender<VersionedBatch>,
    rx: Receiver<VersionedBatch>,
    closed: Arc<AtomicBool>,
    dropped: AtomicU64,
    capacity: usize,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            closed: Arc::new(AtomicBool::new(false)),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    /// Refuse further publishes. Queued batches stay readable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Batches discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Batches currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl BatchTransport for ChannelTransport {
    fn publish(&self, batch: VersionedBatch) -> Result<(), PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::TransportClosed);
        }
        match self.tx.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(dropped)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "transport full, batch dropped: actor_id={} version={} rows={}",
                    dropped.actor_id,
                    dropped.version,
                    dropped.len()
                );
                Err(PipelineError::TransportFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(PipelineError::TransportClosed),
        }
    }

    fn subscribe(&self) -> BatchSubscription {
        BatchSubscription {
            rx: self.rx.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

/// Shared transport handle.
pub type SharedTransport = Arc<ChannelTransport>;

/// Receiving end of a transport.
///
/// Several subscriptions compete for the same queue; each batch is
/// delivered to at most one of them.
#[derive(Clone)]
pub struct BatchSubscription {
    rx: Receiver<VersionedBatch>,
    closed: Arc<AtomicBool>,
}

impl BatchSubscription {
    /// Next batch if one is queued.
    pub fn try_next(&self) -> Option<VersionedBatch> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for a batch.
    ///
    /// Returns `Ok(None)` on timeout and `TransportClosed` once the
    /// transport is closed and drained.
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<VersionedBatch>, PipelineError> {
        match self.rx.recv_timeout(timeout) {
            Ok(batch) => Ok(Some(batch)),
            Err(RecvTimeoutError::Timeout) => {
                if self.closed.load(Ordering::Acquire) && self.rx.is_empty() {
                    Err(PipelineError::TransportClosed)
                } else {
                    Ok(None)
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::TransportClosed),
        }
    }

    /// Take everything currently queued.
    pub fn drain(&self) -> Vec<VersionedBatch> {
        self.rx.try_iter().collect()
    }
}
