//! Bounded record queue between the listeners and the writer
//!
//! `offer` never waits: a full queue rejects the record and counts it as
//! dropped, so the network receive path cannot be stalled by a slow sink.
//!
//! The occupancy gauge is moved by increments and decrements only: a slot is
//! counted before `try_send` and released on rejection or on take, so the
//! gauge never lags behind an empty queue.

use crate::metrics::Metrics;
use crate::types::LogRecord;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Result of offering a record to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// The record was admitted
    Accepted,
    /// The queue was at capacity; the record was discarded
    Full,
    /// The queue no longer accepts records; the record was discarded
    Closed,
}

impl OfferOutcome {
    /// Whether the record was admitted
    pub fn is_accepted(&self) -> bool {
        matches!(self, OfferOutcome::Accepted)
    }
}

/// Create a queue holding at most `capacity` records
pub fn bounded(capacity: usize, metrics: Arc<Metrics>) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueProducer {
            tx,
            metrics: Arc::clone(&metrics),
        },
        QueueConsumer { rx, metrics },
    )
}

/// Producer half, cloned into every listener task
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<LogRecord>,
    metrics: Arc<Metrics>,
}

impl QueueProducer {
    /// Offer a record without waiting for space
    pub fn offer(&self, record: LogRecord) -> OfferOutcome {
        self.metrics.queue_entered();
        match self.tx.try_send(record) {
            Ok(()) => OfferOutcome::Accepted,
            Err(TrySendError::Full(_)) => {
                self.metrics.queue_left();
                self.metrics.record_dropped();
                OfferOutcome::Full
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.queue_left();
                self.metrics.record_dropped();
                OfferOutcome::Closed
            }
        }
    }

    /// Records currently waiting
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether no records are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity of the queue
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Whether the consumer has closed the queue
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the writer
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<LogRecord>,
    metrics: Arc<Metrics>,
}

impl QueueConsumer {
    /// Wait for the next record
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn take(&mut self) -> Option<LogRecord> {
        let record = self.rx.recv().await;
        if record.is_some() {
            self.metrics.queue_left();
        }
        record
    }

    /// Take a record if one is immediately available
    pub fn try_take(&mut self) -> Option<LogRecord> {
        match self.rx.try_recv() {
            Ok(record) => {
                self.metrics.queue_left();
                Some(record)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Stop admitting records; already queued records can still be taken
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Records currently waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no records are waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
