//! Configuration structures for the collector

use crate::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Network listener settings
    pub listener: ListenerSettings,
    /// Wire parser settings
    pub parser: ParserSettings,
    /// Bounded queue settings
    pub queue: QueueSettings,
    /// Output sink settings
    pub storage: StorageSettings,
    /// Metrics exporter settings
    pub metrics: MetricsSettings,
    /// Shutdown behaviour
    pub shutdown: ShutdownSettings,
}

/// Network listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    /// Address to bind the syslog sockets to
    pub bind_address: String,
    /// UDP listen port
    pub udp_port: u16,
    /// Accept newline-delimited syslog over TCP as well
    pub tcp_enabled: bool,
    /// TCP listen port; the UDP port is used when unset
    pub tcp_port: Option<u16>,
    /// Maximum concurrent TCP connections
    pub max_connections: usize,
    /// Datagram receive buffer size
    pub recv_buffer_size: usize,
}

/// Wire parser settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    /// Messages longer than this many bytes are truncated
    pub max_message_size: usize,
    /// Facility used when the PRI prefix is missing or invalid
    pub default_facility: u8,
    /// Severity used when the PRI prefix is missing or invalid
    pub default_severity: u8,
}

/// Bounded queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum number of records waiting for the writer
    pub capacity: usize,
}

/// Output row format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Comma separated rows with a header line
    #[default]
    Csv,
    /// One JSON object per line
    Json,
}

/// Output sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// File the records are appended to
    pub output_path: PathBuf,
    /// Row format
    pub format: OutputFormat,
    /// Flush after this many appended records
    pub flush_batch: usize,
    /// Flush at least this often while records are pending (milliseconds)
    pub flush_interval_ms: u64,
    /// Consecutive append/flush failures tolerated before the writer gives up
    pub max_consecutive_failures: u32,
    /// Format event times in local time instead of UTC
    pub local_time: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Enable metrics endpoint
    pub enabled: bool,
    /// Address the metrics endpoint binds to
    pub bind_address: String,
    /// Metrics server port
    pub port: u16,
    /// Metrics endpoint path
    pub path: String,
}

/// Shutdown behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// How long the writer may keep draining the queue after listeners stop
    pub drain_timeout_ms: u64,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            udp_port: 514,
            tcp_enabled: false,
            tcp_port: None,
            max_connections: 1000,
            recv_buffer_size: 65535,
        }
    }
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            max_message_size: 8192,
            default_facility: 1,
            default_severity: 5,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("syslog.csv"),
            format: OutputFormat::Csv,
            flush_batch: 100,
            flush_interval_ms: 1000,
            max_consecutive_failures: 10,
            local_time: false,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 9000,
            path: "/metrics".to_string(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 5000,
        }
    }
}

/// Join a host and port, bracketing IPv6 literals
fn socket_address(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{}:{}", host, port),
    }
}

impl ListenerSettings {
    /// UDP socket address to bind
    pub fn udp_bind_address(&self) -> String {
        socket_address(&self.bind_address, self.udp_port)
    }

    /// TCP socket address to bind
    pub fn tcp_bind_address(&self) -> String {
        socket_address(&self.bind_address, self.tcp_port.unwrap_or(self.udp_port))
    }
}

impl StorageSettings {
    /// Time-based flush cadence
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl MetricsSettings {
    /// Socket address of the metrics endpoint
    pub fn socket_address(&self) -> String {
        socket_address(&self.bind_address, self.port)
    }
}

impl ShutdownSettings {
    /// Drain deadline as a duration
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl CollectorConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CollectorError::Config(format!("Failed to read config file: {}", e)))?;

        let config: CollectorConfig = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.listener.bind_address.is_empty() {
            return Err(CollectorError::Config("Bind address cannot be empty".to_string()));
        }
        if self.listener.recv_buffer_size == 0 {
            return Err(CollectorError::Config(
                "Receive buffer size must be greater than zero".to_string(),
            ));
        }
        if self.listener.tcp_enabled && self.listener.max_connections == 0 {
            return Err(CollectorError::Config(
                "max_connections must be greater than zero when TCP is enabled".to_string(),
            ));
        }
        if self.parser.max_message_size == 0 {
            return Err(CollectorError::Config(
                "Maximum message size must be greater than zero".to_string(),
            ));
        }
        if self.parser.default_facility > 23 {
            return Err(CollectorError::Config(format!(
                "Default facility {} is out of range 0-23",
                self.parser.default_facility
            )));
        }
        if self.parser.default_severity > 7 {
            return Err(CollectorError::Config(format!(
                "Default severity {} is out of range 0-7",
                self.parser.default_severity
            )));
        }
        if self.queue.capacity == 0 {
            return Err(CollectorError::Config("Queue capacity must be greater than zero".to_string()));
        }
        if self.storage.output_path.as_os_str().is_empty() {
            return Err(CollectorError::Config("Output path cannot be empty".to_string()));
        }
        if self.storage.flush_batch == 0 {
            return Err(CollectorError::Config("Flush batch must be greater than zero".to_string()));
        }
        if self.storage.flush_interval_ms == 0 {
            return Err(CollectorError::Config(
                "Flush interval must be greater than zero".to_string(),
            ));
        }
        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(CollectorError::Config(format!(
                "Metrics path must start with '/': {}",
                self.metrics.path
            )));
        }
        Ok(())
    }
}
