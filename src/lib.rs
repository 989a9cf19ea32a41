//! # Syslog Collector
//!
//! A network-facing syslog collector. Messages arrive over UDP (and optionally
//! TCP), are parsed into [`types::LogRecord`]s, buffered in a bounded queue and
//! appended to a structured output file by a single writer task.
//!
//! ## Features
//!
//! - **UDP and TCP ingestion**: one datagram or one newline-delimited line per message
//! - **Lossy backpressure**: the receive path never waits for queue space
//! - **Append-only output**: CSV (default) or JSON lines, never truncated
//! - **Metrics**: Prometheus text exposition of throughput and loss counters
//! - **Graceful shutdown**: listeners stop first, the queue drains within a deadline
//!
//! ## Quick Start
//!
//! ```no_run
//! use syslog_collector::config::CollectorConfig;
//! use syslog_collector::server::LogServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = CollectorConfig::default();
//!     config.listener.udp_port = 1514;
//!     config.storage.output_path = "syslog.csv".into();
//!
//!     let server = LogServer::new(config).await?;
//!     let handle = server.start().await?;
//!     handle.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod metrics;
pub mod parser;
pub mod server;
pub mod types;

/// Common error types used throughout the collector
pub mod error {
    use std::fmt;

    /// Collector error types
    #[derive(Debug)]
    pub enum CollectorError {
        /// I/O operation failed
        Io(std::io::Error),
        /// JSON serialization failed
        Serde(serde_json::Error),
        /// CSV serialization failed
        Csv(csv::Error),
        /// Configuration error
        Config(String),
        /// A listening socket could not be bound
        Bind(String),
        /// The output sink failed persistently
        Sink(String),
        /// Metrics registry or exporter error
        Metrics(String),
    }

    impl fmt::Display for CollectorError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                CollectorError::Io(e) => write!(f, "I/O error: {}", e),
                CollectorError::Serde(e) => write!(f, "Serialization error: {}", e),
                CollectorError::Csv(e) => write!(f, "CSV error: {}", e),
                CollectorError::Config(e) => write!(f, "Configuration error: {}", e),
                CollectorError::Bind(e) => write!(f, "Bind error: {}", e),
                CollectorError::Sink(e) => write!(f, "Sink error: {}", e),
                CollectorError::Metrics(e) => write!(f, "Metrics error: {}", e),
            }
        }
    }

    impl std::error::Error for CollectorError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            match self {
                CollectorError::Io(e) => Some(e),
                CollectorError::Serde(e) => Some(e),
                CollectorError::Csv(e) => Some(e),
                _ => None,
            }
        }
    }

    impl From<std::io::Error> for CollectorError {
        fn from(err: std::io::Error) -> Self {
            CollectorError::Io(err)
        }
    }

    impl From<serde_json::Error> for CollectorError {
        fn from(err: serde_json::Error) -> Self {
            CollectorError::Serde(err)
        }
    }

    impl From<csv::Error> for CollectorError {
        fn from(err: csv::Error) -> Self {
            CollectorError::Csv(err)
        }
    }

    impl From<prometheus::Error> for CollectorError {
        fn from(err: prometheus::Error) -> Self {
            CollectorError::Metrics(err.to_string())
        }
    }

    impl From<toml::de::Error> for CollectorError {
        fn from(err: toml::de::Error) -> Self {
            CollectorError::Config(format!("Failed to parse config: {}", err))
        }
    }

    /// Result type alias for collector operations
    pub type Result<T> = std::result::Result<T, CollectorError>;
}

pub use error::{CollectorError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::CollectorConfig;
    pub use crate::metrics::{Metrics, MetricsSnapshot};
    pub use crate::parser::SyslogParser;
    pub use crate::server::{LogServer, ServerHandle};
    pub use crate::types::LogRecord;
    pub use crate::{CollectorError, Result};
}
