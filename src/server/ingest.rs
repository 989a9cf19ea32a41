//! Receive path shared by the UDP and TCP listeners

use crate::metrics::Metrics;
use crate::parser::SyslogParser;
use crate::server::queue::{OfferOutcome, QueueProducer};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Counts, parses and enqueues one received message
#[derive(Debug, Clone)]
pub struct Ingestor {
    parser: SyslogParser,
    producer: QueueProducer,
    metrics: Arc<Metrics>,
}

impl Ingestor {
    /// Create an ingestor feeding `producer`
    pub fn new(parser: SyslogParser, producer: QueueProducer, metrics: Arc<Metrics>) -> Self {
        Self {
            parser,
            producer,
            metrics,
        }
    }

    /// Handle one message received from `peer`
    ///
    /// `received_total` is counted before parsing or queue admission.
    pub fn ingest(&self, raw: &[u8], peer: SocketAddr) -> OfferOutcome {
        let received_at = Utc::now();
        self.metrics.record_received();

        let record = self.parser.parse(raw, peer, received_at);
        let outcome = self.producer.offer(record);

        match outcome {
            OfferOutcome::Accepted => {}
            OfferOutcome::Full => {
                debug!(peer = %peer, capacity = self.producer.capacity(), "queue full, record dropped");
            }
            OfferOutcome::Closed => {
                debug!(peer = %peer, "queue closed, record dropped");
            }
        }
        outcome
    }

    /// Maximum message size the parser keeps
    pub fn max_message_size(&self) -> usize {
        self.parser.settings().max_message_size
    }
}
