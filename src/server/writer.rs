//! Durable writer: the single consumer of the record queue
//!
//! Records are appended to the sink and flushed after `flush_batch` records
//! or `flush_interval`, whichever comes first. A record counts as written
//! only once the flush covering it succeeds. A failed flush loses its whole
//! batch: the rows are counted as failed and never reach the output.

use crate::config::StorageSettings;
use crate::metrics::Metrics;
use crate::server::queue::QueueConsumer;
use crate::server::storage::RecordSink;
use crate::types::LogRecord;
use crate::{CollectorError, Result};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWrite;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Totals reported when the writer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterSummary {
    /// Records appended and flushed
    pub written: u64,
    /// Records lost to sink failures
    pub failed: u64,
}

/// Queue consumer that persists records to a [`RecordSink`]
pub struct RecordWriter<W = File> {
    sink: RecordSink<W>,
    consumer: QueueConsumer,
    metrics: Arc<Metrics>,
    drain: CancellationToken,
    flush_batch: usize,
    flush_interval: Duration,
    max_consecutive_failures: u32,
    pending: u64,
    consecutive_failures: u32,
    summary: WriterSummary,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    /// Create a writer
    ///
    /// Cancelling `drain` closes the queue; the writer then empties it and stops.
    pub fn new(
        sink: RecordSink<W>,
        consumer: QueueConsumer,
        settings: &StorageSettings,
        metrics: Arc<Metrics>,
        drain: CancellationToken,
    ) -> Self {
        Self {
            sink,
            consumer,
            metrics,
            drain,
            flush_batch: settings.flush_batch.max(1),
            flush_interval: settings.flush_interval(),
            max_consecutive_failures: settings.max_consecutive_failures,
            pending: 0,
            consecutive_failures: 0,
            summary: WriterSummary::default(),
        }
    }

    /// Consume the queue until it is closed and empty
    ///
    /// Returns `CollectorError::Sink` once more than `max_consecutive_failures`
    /// appends or flushes fail in a row.
    pub async fn run(mut self) -> Result<WriterSummary> {
        debug!(
            flush_batch = self.flush_batch,
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "Writer started"
        );

        let mut flush_timer = interval(self.flush_interval);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        flush_timer.tick().await;

        let mut draining = false;

        loop {
            tokio::select! {
                biased;

                _ = self.drain.cancelled(), if !draining => {
                    draining = true;
                    self.consumer.close();
                    debug!(queued = self.consumer.len(), "Writer draining queue");
                }

                _ = flush_timer.tick() => {
                    if self.pending > 0 {
                        self.flush().await?;
                    }
                }

                next = self.consumer.take() => {
                    match next {
                        Some(record) => self.append(record).await?,
                        None => break,
                    }
                }
            }
        }

        self.flush().await?;
        if let Err(e) = self.sink.close().await {
            error!(error = %e, "Failed to close output sink");
        }

        info!(
            written = self.summary.written,
            failed = self.summary.failed,
            "Writer stopped"
        );
        Ok(self.summary)
    }

    async fn append(&mut self, record: LogRecord) -> Result<()> {
        trace!(record = %record.to_human_readable(), "Appending record");

        match self.sink.append(&record) {
            Ok(()) => {
                self.pending += 1;
                if self.pending >= self.flush_batch as u64 {
                    self.flush().await?;
                }
                Ok(())
            }
            Err(e) => self.sink_failed(e, 1),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.pending);
        match self.sink.flush().await {
            Ok(()) => {
                self.metrics.record_written(batch);
                self.summary.written += batch;
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => self.sink_failed(e, batch),
        }
    }

    fn sink_failed(&mut self, e: CollectorError, lost: u64) -> Result<()> {
        self.metrics.record_sink_error();
        self.summary.failed += lost;
        self.consecutive_failures += 1;

        error!(
            error = %e,
            lost,
            consecutive_failures = self.consecutive_failures,
            "Failed to persist records"
        );

        if self.consecutive_failures > self.max_consecutive_failures {
            return Err(CollectorError::Sink(format!(
                "{} consecutive write failures, last: {}",
                self.consecutive_failures, e
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::server::queue::{bounded, QueueProducer};
    use chrono::Utc;
    use std::io;
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::tempdir;
    use tokio::time::{sleep, timeout};

    fn record(message: &str) -> LogRecord {
        LogRecord::new(
            Utc::now(),
            "192.0.2.1:514".parse().unwrap(),
            message.to_string(),
            5,
            1,
        )
    }

    fn storage(path: PathBuf, flush_batch: usize, flush_interval_ms: u64) -> StorageSettings {
        StorageSettings {
            output_path: path,
            format: OutputFormat::Csv,
            flush_batch,
            flush_interval_ms,
            max_consecutive_failures: 2,
            local_time: false,
        }
    }

    async fn file_writer(
        settings: &StorageSettings,
        capacity: usize,
    ) -> (RecordWriter, QueueProducer, Arc<Metrics>, CancellationToken) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (producer, consumer) = bounded(capacity, Arc::clone(&metrics));
        let sink = RecordSink::open(settings).await.unwrap();
        let drain = CancellationToken::new();
        let writer = RecordWriter::new(
            sink,
            consumer,
            settings,
            Arc::clone(&metrics),
            drain.clone(),
        );
        (writer, producer, metrics, drain)
    }

    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Fails the first write, then records everything it is given
    #[derive(Clone, Default)]
    struct FlakyWriter {
        failed_once: Arc<std::sync::atomic::AtomicBool>,
        output: Arc<std::sync::Mutex<Vec<u8>>>,
    }

    impl AsyncWrite for FlakyWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if !self
                .failed_once
                .swap(true, std::sync::atomic::Ordering::SeqCst)
            {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")));
            }
            self.output.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_failed_batch_never_reaches_output() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (producer, consumer) = bounded(16, Arc::clone(&metrics));
        let settings = storage(PathBuf::from("unused.csv"), 1, 60_000);
        let flaky = FlakyWriter::default();
        let sink = RecordSink::from_writer(flaky.clone(), OutputFormat::Csv, false);
        let drain = CancellationToken::new();
        let writer = RecordWriter::new(
            sink,
            consumer,
            &settings,
            Arc::clone(&metrics),
            drain.clone(),
        );

        assert!(producer.offer(record("lost-A")).is_accepted());
        assert!(producer.offer(record("ok-B")).is_accepted());
        drain.cancel();

        let summary = timeout(Duration::from_secs(5), writer.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary, WriterSummary { written: 1, failed: 1 });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.written_total, 1);
        assert_eq!(snapshot.sink_errors_total, 1);

        let content = String::from_utf8(flaky.output.lock().unwrap().clone()).unwrap();
        assert_eq!(content.lines().count() as u64, snapshot.written_total);
        assert!(!content.contains("lost-A"));
        assert!(content.contains("ok-B"));
    }

    #[tokio::test]
    async fn test_drain_writes_everything_in_order() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("out.csv");
        let settings = storage(path.clone(), 100, 60_000);
        let (writer, producer, metrics, drain) = file_writer(&settings, 64).await;

        for i in 0..20 {
            assert!(producer.offer(record(&format!("msg-{:02}", i))).is_accepted());
        }
        drain.cancel();

        let summary = timeout(Duration::from_secs(5), writer.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary, WriterSummary { written: 20, failed: 0 });
        assert_eq!(metrics.snapshot().written_total, 20);
        assert_eq!(metrics.snapshot().queue_size, 0);

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let messages: Vec<&str> = content
            .lines()
            .skip(1)
            .map(|line| line.split(',').nth(2).unwrap())
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("msg-{:02}", i)).collect();
        assert_eq!(messages, expected);
    }

    #[tokio::test]
    async fn test_flushes_after_batch() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("out.csv");
        let settings = storage(path.clone(), 2, 3_600_000);
        let (writer, producer, metrics, drain) = file_writer(&settings, 16).await;
        let handle = tokio::spawn(writer.run());

        for i in 0..3 {
            producer.offer(record(&format!("batch-{}", i)));
        }
        sleep(Duration::from_millis(200)).await;

        assert_eq!(metrics.snapshot().written_total, 2);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("batch-1"));
        assert!(!content.contains("batch-2"));

        drain.cancel();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.written, 3);
    }

    #[tokio::test]
    async fn test_flushes_on_interval() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("out.csv");
        let settings = storage(path.clone(), 1000, 50);
        let (writer, producer, metrics, drain) = file_writer(&settings, 16).await;
        let handle = tokio::spawn(writer.run());

        producer.offer(record("lonely"));
        sleep(Duration::from_millis(300)).await;

        assert_eq!(metrics.snapshot().written_total, 1);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("lonely"));

        drain.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_persistent_failure_is_escalated() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (producer, consumer) = bounded(16, Arc::clone(&metrics));
        let settings = storage(PathBuf::from("unused.csv"), 1, 60_000);
        let sink = RecordSink::from_writer(BrokenWriter, OutputFormat::Csv, false);
        let writer = RecordWriter::new(
            sink,
            consumer,
            &settings,
            Arc::clone(&metrics),
            CancellationToken::new(),
        );

        for i in 0..5 {
            producer.offer(record(&format!("doomed-{}", i)));
        }

        let result = timeout(Duration::from_secs(5), writer.run()).await.unwrap();
        assert!(matches!(result, Err(CollectorError::Sink(_))));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sink_errors_total, 3);
        assert_eq!(snapshot.written_total, 0);

        assert!(producer.is_closed());
    }
}
