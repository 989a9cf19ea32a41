//! Process-wide pipeline metrics
//!
//! Counters are `prometheus` integer counters, which are plain atomics
//! underneath, so every task can update them through a shared `Arc<Metrics>`
//! without locking.

pub mod exporter;

use crate::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub use exporter::MetricsExporter;

/// Pipeline counters and the queue occupancy gauge
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    received: IntCounter,
    written: IntCounter,
    dropped: IntCounter,
    parse_errors: IntCounter,
    truncated: IntCounter,
    sink_errors: IntCounter,
    queue_size: IntGauge,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Metrics").field(&self.snapshot()).finish()
    }
}

/// Point-in-time copy of all metric values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Messages received from the network
    pub received_total: u64,
    /// Records appended and flushed to the sink
    pub written_total: u64,
    /// Records rejected by a full queue
    pub dropped_total: u64,
    /// Messages without a usable PRI prefix
    pub parse_errors_total: u64,
    /// Messages cut to the maximum message size
    pub truncated_total: u64,
    /// Failed sink appends or flushes
    pub sink_errors_total: u64,
    /// Records currently waiting in the queue
    pub queue_size: i64,
}

impl Metrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let received = IntCounter::new("syslog_received_total", "Total number of logs received")?;
        let written = IntCounter::new("syslog_written_total", "Total number of logs written")?;
        let dropped = IntCounter::new(
            "syslog_dropped_total",
            "Total number of logs dropped because the queue was full",
        )?;
        let parse_errors = IntCounter::new(
            "syslog_parse_errors_total",
            "Total number of logs without a valid priority prefix",
        )?;
        let truncated = IntCounter::new(
            "syslog_truncated_total",
            "Total number of logs truncated to the maximum message size",
        )?;
        let sink_errors = IntCounter::new(
            "syslog_sink_errors_total",
            "Total number of failed writes to the output sink",
        )?;
        let queue_size = IntGauge::new("syslog_queue_size", "Current size of the log queue")?;

        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(written.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(parse_errors.clone()))?;
        registry.register(Box::new(truncated.clone()))?;
        registry.register(Box::new(sink_errors.clone()))?;
        registry.register(Box::new(queue_size.clone()))?;

        Ok(Self {
            registry,
            received,
            written,
            dropped,
            parse_errors,
            truncated,
            sink_errors,
            queue_size,
        })
    }

    /// Record a message received from the network
    #[inline]
    pub fn record_received(&self) {
        self.received.inc();
    }

    /// Record `count` records durably written
    #[inline]
    pub fn record_written(&self, count: u64) {
        self.written.inc_by(count);
    }

    /// Record a record rejected by the queue
    #[inline]
    pub fn record_dropped(&self) {
        self.dropped.inc();
    }

    /// Record a message that failed PRI parsing
    #[inline]
    pub fn record_parse_error(&self) {
        self.parse_errors.inc();
    }

    /// Record a message that was truncated
    #[inline]
    pub fn record_truncated(&self) {
        self.truncated.inc();
    }

    /// Record a failed append or flush
    #[inline]
    pub fn record_sink_error(&self) {
        self.sink_errors.inc();
    }

    /// Count a record entering the queue
    #[inline]
    pub fn queue_entered(&self) {
        self.queue_size.inc();
    }

    /// Count a record leaving the queue
    #[inline]
    pub fn queue_left(&self) {
        self.queue_size.dec();
    }

    /// Current values of every metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received_total: self.received.get(),
            written_total: self.written.get(),
            dropped_total: self.dropped.get(),
            parse_errors_total: self.parse_errors.get(),
            truncated_total: self.truncated.get(),
            sink_errors_total: self.sink_errors.get(),
            queue_size: self.queue_size.get(),
        }
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::CollectorError::Metrics(format!("Invalid exposition output: {}", e)))
    }
}
