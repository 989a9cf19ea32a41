//! Collector server: wires the pipeline together and owns its lifetime
//!
//! Startup order is metrics endpoint, output sink and writer, then the
//! network listeners, so no record can be accepted before it has somewhere to
//! go. Shutdown runs the other way: listeners stop first, the queue is closed
//! and drained by the writer within the configured deadline, then the sink
//! and the metrics endpoint are closed.

pub mod ingest;
pub mod queue;
pub mod storage;
pub mod tcp;
pub mod udp;
pub mod writer;

use crate::config::CollectorConfig;
use crate::metrics::{Metrics, MetricsExporter};
use crate::parser::SyslogParser;
use crate::{CollectorError, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use ingest::Ingestor;
pub use queue::{OfferOutcome, QueueConsumer, QueueProducer};
pub use storage::RecordSink;
pub use tcp::TcpSyslogListener;
pub use udp::UdpListener;
pub use writer::{RecordWriter, WriterSummary};

/// Collector server that coordinates all components
pub struct LogServer {
    config: CollectorConfig,
    metrics: Arc<Metrics>,
}

impl LogServer {
    /// Create a new server with the given configuration
    pub async fn new(config: CollectorConfig) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new()?);

        Ok(Self { config, metrics })
    }

    /// Shared metrics registry
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Bind every socket, open the sink and start all tasks
    ///
    /// Any bind or open failure is returned before traffic is accepted.
    pub async fn start(self) -> Result<ServerHandle> {
        let exporter = self.bind_exporter().await?;

        let sink = match RecordSink::open(&self.config.storage).await {
            Ok(sink) => sink,
            Err(e) => {
                if let Some(exporter) = exporter {
                    exporter.shutdown().await;
                }
                return Err(e);
            }
        };
        info!(
            path = %self.config.storage.output_path.display(),
            format = ?self.config.storage.format,
            "Output sink opened"
        );

        self.launch(exporter, sink).await
    }

    async fn bind_exporter(&self) -> Result<Option<MetricsExporter>> {
        if !self.config.metrics.enabled {
            return Ok(None);
        }
        let exporter = MetricsExporter::bind(&self.config.metrics, Arc::clone(&self.metrics)).await?;
        Ok(Some(exporter))
    }

    /// Start the writer over `sink`, then bind and spawn the listeners
    async fn launch<W>(
        self,
        exporter: Option<MetricsExporter>,
        sink: RecordSink<W>,
    ) -> Result<ServerHandle>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let config = self.config;
        let metrics = self.metrics;

        let (producer, consumer) = queue::bounded(config.queue.capacity, Arc::clone(&metrics));
        let drain = CancellationToken::new();
        let shutdown = CancellationToken::new();

        let writer = RecordWriter::new(
            sink,
            consumer,
            &config.storage,
            Arc::clone(&metrics),
            drain.clone(),
        );
        let writer_task = tokio::spawn(writer.run());

        let parser = SyslogParser::new(config.parser.clone(), Arc::clone(&metrics));
        let ingestor = Ingestor::new(parser, producer, Arc::clone(&metrics));

        let inputs = match bind_inputs(&config, ingestor, &shutdown).await {
            Ok(inputs) => inputs,
            Err(e) => {
                drain.cancel();
                let _ = writer_task.await;
                if let Some(exporter) = exporter {
                    exporter.shutdown().await;
                }
                return Err(e);
            }
        };

        let udp_addr = inputs.udp.local_addr()?;
        let tcp_addr = match &inputs.tcp {
            Some(tcp) => Some(tcp.local_addr()?),
            None => None,
        };

        let mut listeners = vec![tokio::spawn(inputs.udp.run())];
        if let Some(tcp) = inputs.tcp {
            listeners.push(tokio::spawn(tcp.run()));
        }

        info!(
            udp = %udp_addr,
            tcp = ?tcp_addr,
            metrics = ?exporter.as_ref().map(|e| e.local_addr()),
            queue_capacity = config.queue.capacity,
            "Syslog collector started"
        );

        Ok(ServerHandle {
            udp_addr,
            tcp_addr,
            metrics,
            shutdown,
            drain,
            listeners,
            writer: Some(writer_task),
            exporter,
            drain_timeout: config.shutdown.drain_timeout(),
        })
    }
}

struct Inputs {
    udp: UdpListener,
    tcp: Option<TcpSyslogListener>,
}

async fn bind_inputs(
    config: &CollectorConfig,
    ingestor: Ingestor,
    shutdown: &CancellationToken,
) -> Result<Inputs> {
    let listener = &config.listener;

    let udp = UdpListener::bind(
        &listener.udp_bind_address(),
        ingestor.clone(),
        listener.recv_buffer_size,
        shutdown.clone(),
    )
    .await?;

    let tcp = if listener.tcp_enabled {
        Some(
            TcpSyslogListener::bind(
                &listener.tcp_bind_address(),
                ingestor,
                listener.max_connections,
                shutdown.clone(),
            )
            .await?,
        )
    } else {
        None
    };

    Ok(Inputs { udp, tcp })
}

/// Running collector
pub struct ServerHandle {
    udp_addr: SocketAddr,
    tcp_addr: Option<SocketAddr>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    drain: CancellationToken,
    listeners: Vec<JoinHandle<Result<()>>>,
    writer: Option<JoinHandle<Result<WriterSummary>>>,
    exporter: Option<MetricsExporter>,
    drain_timeout: Duration,
}

impl ServerHandle {
    /// Bound UDP address
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Bound TCP address, when TCP is enabled
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// Bound metrics endpoint address, when enabled
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.exporter.as_ref().map(|e| e.local_addr())
    }

    /// Shared metrics registry
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run until `signal` completes or the writer fails
    ///
    /// A writer failure stops the listeners and is returned as the error.
    pub async fn run_until<F>(mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => return self.shutdown().await,
        };

        let finished = tokio::select! {
            _ = signal => None,
            joined = &mut writer => Some(joined),
        };

        match finished {
            None => {
                info!("Shutdown signal received");
                self.writer = Some(writer);
                self.shutdown().await
            }
            Some(joined) => {
                let err = match joined {
                    Ok(Err(e)) => e,
                    Ok(Ok(_)) => CollectorError::Sink("Writer stopped unexpectedly".to_string()),
                    Err(e) => CollectorError::Sink(format!("Writer task failed: {}", e)),
                };
                error!(error = %err, "Writer failed, shutting down");
                self.stop_listeners().await;
                if let Some(exporter) = self.exporter.take() {
                    exporter.shutdown().await;
                }
                Err(err)
            }
        }
    }

    /// Stop listeners, drain the queue within the deadline and close the sink
    pub async fn shutdown(mut self) -> Result<()> {
        self.stop_listeners().await;

        self.drain.cancel();
        let result = match self.writer.take() {
            Some(mut writer) => match timeout(self.drain_timeout, &mut writer).await {
                Ok(Ok(Ok(summary))) => {
                    info!(
                        written = summary.written,
                        failed = summary.failed,
                        "Queue drained"
                    );
                    Ok(())
                }
                Ok(Ok(Err(e))) => Err(e),
                Ok(Err(e)) => Err(CollectorError::Sink(format!("Writer task failed: {}", e))),
                Err(_) => {
                    warn!(
                        deadline_ms = self.drain_timeout.as_millis() as u64,
                        queued = self.metrics.snapshot().queue_size,
                        "Drain deadline elapsed, abandoning queued records"
                    );
                    writer.abort();
                    Ok(())
                }
            },
            None => Ok(()),
        };

        if let Some(exporter) = self.exporter.take() {
            exporter.shutdown().await;
        }

        info!("Syslog collector stopped");
        result
    }

    async fn stop_listeners(&mut self) {
        self.shutdown.cancel();
        for listener in self.listeners.drain(..) {
            match listener.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Listener stopped with error"),
                Err(e) => warn!(error = %e, "Listener task failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use std::io;
    use std::path::Path;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::tempdir;
    use tokio::net::UdpSocket;
    use tokio::time::{sleep, Instant};

    /// Rejects every write
    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "no space left on device")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Never completes a write
    struct HungDisk;

    impl AsyncWrite for HungDisk {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    async fn wait_for_received(metrics: &Metrics, count: u64) {
        for _ in 0..100 {
            if metrics.snapshot().received_total >= count {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    fn test_config(output_dir: &Path) -> CollectorConfig {
        let mut config = CollectorConfig::default();
        config.listener.bind_address = "127.0.0.1".to_string();
        config.listener.udp_port = 0;
        config.metrics.bind_address = "127.0.0.1".to_string();
        config.metrics.port = 0;
        config.storage.output_path = output_dir.join("syslog.csv");
        config
    }

    #[tokio::test]
    async fn test_server_rejects_invalid_config() {
        let temp_dir = tempdir().unwrap();
        let mut config = test_config(temp_dir.path());
        config.queue.capacity = 0;

        assert!(matches!(
            LogServer::new(config).await,
            Err(CollectorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let temp_dir = tempdir().unwrap();
        let mut config = test_config(temp_dir.path());
        config.listener.tcp_enabled = true;
        config.listener.tcp_port = Some(0);

        let server = LogServer::new(config).await.unwrap();
        let handle = server.start().await.unwrap();

        assert_ne!(handle.udp_addr().port(), 0);
        assert!(handle.tcp_addr().is_some());
        assert!(handle.metrics_addr().is_some());

        let result = timeout(Duration::from_secs(5), handle.shutdown()).await.unwrap();
        assert!(result.is_ok());
        assert!(temp_dir.path().join("syslog.csv").exists());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_can_be_disabled() {
        let temp_dir = tempdir().unwrap();
        let mut config = test_config(temp_dir.path());
        config.metrics.enabled = false;

        let handle = LogServer::new(config).await.unwrap().start().await.unwrap();
        assert!(handle.metrics_addr().is_none());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unopenable_sink_fails_startup() {
        let temp_dir = tempdir().unwrap();
        let mut config = test_config(temp_dir.path());
        config.storage.output_path = temp_dir.path().join("no-such-dir").join("out.csv");

        let server = LogServer::new(config).await.unwrap();
        assert!(matches!(server.start().await, Err(CollectorError::Sink(_))));
    }

    #[tokio::test]
    async fn test_writer_failure_ends_run_with_error() {
        let temp_dir = tempdir().unwrap();
        let mut config = test_config(temp_dir.path());
        config.metrics.enabled = false;
        config.storage.flush_batch = 1;
        config.storage.max_consecutive_failures = 0;

        let server = LogServer::new(config).await.unwrap();
        let sink = RecordSink::from_writer(FullDisk, OutputFormat::Csv, false);
        let handle = server.launch(None, sink).await.unwrap();
        let metrics = Arc::clone(handle.metrics());
        let udp_addr = handle.udp_addr();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"<13>MyApp: doomed", udp_addr).await.unwrap();

        let result = timeout(
            Duration::from_secs(5),
            handle.run_until(std::future::pending::<()>()),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(CollectorError::Sink(_))));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received_total, 1);
        assert_eq!(snapshot.sink_errors_total, 1);
        assert_eq!(snapshot.written_total, 0);

        // The listener is gone, so nothing more is received.
        let _ = client.send_to(b"<13>MyApp: late", udp_addr).await;
        sleep(Duration::from_millis(200)).await;
        assert_eq!(metrics.snapshot().received_total, 1);
    }

    #[tokio::test]
    async fn test_drain_deadline_abandons_stuck_writer() {
        let temp_dir = tempdir().unwrap();
        let mut config = test_config(temp_dir.path());
        config.metrics.enabled = false;
        config.storage.flush_batch = 1;
        config.shutdown.drain_timeout_ms = 100;

        let server = LogServer::new(config).await.unwrap();
        let sink = RecordSink::from_writer(HungDisk, OutputFormat::Csv, false);
        let handle = server.launch(None, sink).await.unwrap();
        let metrics = Arc::clone(handle.metrics());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"<13>MyApp: stuck", handle.udp_addr())
            .await
            .unwrap();
        wait_for_received(&metrics, 1).await;

        let started = Instant::now();
        let result = timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(metrics.snapshot().written_total, 0);
    }

    #[tokio::test]
    async fn test_port_in_use_fails_startup() {
        let temp_dir = tempdir().unwrap();
        let taken = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config(temp_dir.path());
        config.listener.udp_port = taken.local_addr().unwrap().port();

        let server = LogServer::new(config).await.unwrap();
        assert!(matches!(server.start().await, Err(CollectorError::Bind(_))));
    }
}
