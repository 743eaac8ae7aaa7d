//! Bounded message queue between producers and the MIDI writer
//!
//! One queue, two send modes. Which mode is used is decided by the call site:
//!
//! - [`QueueSender::send_blocking`] waits for a free slot (waveform generators)
//! - [`QueueSender::try_send`] never waits; a full queue drops the event
//!   (serial ingestor)
//!
//! The queue closes once every [`QueueSender`] has been dropped, which ends the
//! writer's receive loop.

use crossbeam::channel::{self, RecvTimeoutError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::midi::ControlChangeEvent;

/// Default number of events the queue holds before producers block or drop
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// The consumer side is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("message queue closed")]
pub struct QueueClosed;

/// Result of a non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Event enqueued
    Delivered,
    /// Queue full, event discarded
    Dropped,
    /// Consumer gone, event discarded
    Closed,
}

/// Counters shared by every handle of one queue
#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl QueueStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Producer handle. Cheap to clone; one per producer.
#[derive(Clone)]
pub struct QueueSender {
    tx: channel::Sender<ControlChangeEvent>,
    stats: Arc<QueueStats>,
}

/// Consumer handle. Owned by the MIDI writer.
pub struct QueueReceiver {
    rx: channel::Receiver<ControlChangeEvent>,
    stats: Arc<QueueStats>,
}

/// Create a bounded queue holding at most `capacity` events
pub fn message_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = channel::bounded(capacity);
    let stats = Arc::new(QueueStats::default());
    (
        QueueSender {
            tx,
            stats: stats.clone(),
        },
        QueueReceiver { rx, stats },
    )
}

impl QueueSender {
    /// Enqueue, waiting for a free slot if the queue is full
    pub fn send_blocking(&self, event: ControlChangeEvent) -> Result<(), QueueClosed> {
        self.tx.send(event).map_err(|_| QueueClosed)?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Enqueue without waiting; a full queue drops the event
    pub fn try_send(&self, event: ControlChangeEvent) -> SendOutcome {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Delivered
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => SendOutcome::Closed,
        }
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Events currently waiting
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl QueueReceiver {
    /// Wait for the next event; `None` once every sender is gone and the queue is drained
    pub fn recv(&self) -> Option<ControlChangeEvent> {
        self.rx.recv().ok()
    }

    /// Wait at most `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ControlChangeEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
