//! HTTP exposition of the metrics registry

use crate::config::MetricsSettings;
use crate::metrics::Metrics;
use crate::{CollectorError, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Running `/metrics` HTTP endpoint
pub struct MetricsExporter {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MetricsExporter {
    /// Bind the endpoint and start serving in the background
    ///
    /// A bind failure is returned to the caller, it is fatal at startup.
    pub async fn bind(settings: &MetricsSettings, metrics: Arc<Metrics>) -> Result<Self> {
        let addr = settings.socket_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            CollectorError::Bind(format!("Failed to bind metrics endpoint {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;

        let app = router(&settings.path, metrics);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                debug!("Metrics endpoint received shutdown signal");
            });

            if let Err(e) = server.await {
                error!(error = %e, "Metrics endpoint error");
            }
        });

        info!(address = %local_addr, path = %settings.path, "Metrics endpoint listening");

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Address the endpoint is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop serving
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut handle) = self.handle.take() {
            if timeout(Duration::from_secs(5), &mut handle).await.is_err() {
                warn!("Metrics endpoint shutdown timed out");
                handle.abort();
            }
        }
    }
}

/// Router serving the registry at `path`
pub fn router(path: &str, metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route(path, get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_settings() -> MetricsSettings {
        MetricsSettings {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            path: "/metrics".to_string(),
        }
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
            .await
            .unwrap()
            .unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_current_values() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.record_received();
        metrics.record_received();
        metrics.record_dropped();

        let exporter = MetricsExporter::bind(&test_settings(), Arc::clone(&metrics))
            .await
            .unwrap();

        let response = http_get(exporter.local_addr(), "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("text/plain"));
        assert!(response.contains("# TYPE syslog_received_total counter"));
        assert!(response.contains("syslog_received_total 2"));
        assert!(response.contains("syslog_dropped_total 1"));

        metrics.record_received();
        let response = http_get(exporter.local_addr(), "/metrics").await;
        assert!(response.contains("syslog_received_total 3"));

        exporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let exporter = MetricsExporter::bind(&test_settings(), metrics).await.unwrap();

        let response = http_get(exporter.local_addr(), "/other").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        exporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let first = MetricsExporter::bind(&test_settings(), Arc::clone(&metrics))
            .await
            .unwrap();

        let mut settings = test_settings();
        settings.port = first.local_addr().port();
        let result = MetricsExporter::bind(&settings, metrics).await;
        assert!(matches!(result, Err(CollectorError::Bind(_))));

        first.shutdown().await;
    }
}
