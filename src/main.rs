//! Syslog Collector Binary
//!
//! Receives syslog over UDP/TCP and appends structured rows to a file.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use syslog_collector::config::{CollectorConfig, OutputFormat};
use syslog_collector::server::LogServer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "syslog-collector")]
#[command(about = "Syslog collector writing append-only structured logs")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Syslog listen port (UDP, and TCP unless --tcp-port is given)
    #[arg(short, long)]
    port: Option<u16>,

    /// Output file path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Metrics endpoint port
    #[arg(short, long)]
    metrics_port: Option<u16>,

    /// Queue capacity
    #[arg(short, long)]
    queue_size: Option<usize>,

    /// Flush interval in milliseconds
    #[arg(long)]
    flush_interval_ms: Option<u64>,

    /// Flush after this many records
    #[arg(long)]
    flush_batch: Option<usize>,

    /// Accept syslog over TCP as well
    #[arg(long)]
    tcp: bool,

    /// TCP listen port
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Output format
    #[arg(long, value_parser = parse_format)]
    format: Option<OutputFormat>,

    /// Address to bind the syslog sockets to
    #[arg(long)]
    bind: Option<String>,

    /// Disable the metrics endpoint
    #[arg(long)]
    no_metrics: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_format(value: &str) -> Result<OutputFormat, String> {
    match value.to_ascii_lowercase().as_str() {
        "csv" => Ok(OutputFormat::Csv),
        "json" => Ok(OutputFormat::Json),
        other => Err(format!("unknown format '{}', expected csv or json", other)),
    }
}

impl Args {
    fn apply(self, config: &mut CollectorConfig) {
        if let Some(port) = self.port {
            config.listener.udp_port = port;
        }
        if let Some(output) = self.output {
            config.storage.output_path = output;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }
        if let Some(capacity) = self.queue_size {
            config.queue.capacity = capacity;
        }
        if let Some(interval) = self.flush_interval_ms {
            config.storage.flush_interval_ms = interval;
        }
        if let Some(batch) = self.flush_batch {
            config.storage.flush_batch = batch;
        }
        if self.tcp {
            config.listener.tcp_enabled = true;
        }
        if let Some(port) = self.tcp_port {
            config.listener.tcp_enabled = true;
            config.listener.tcp_port = Some(port);
        }
        if let Some(format) = self.format {
            config.storage.format = format;
        }
        if let Some(bind) = self.bind {
            config.listener.bind_address = bind;
        }
        if self.no_metrics {
            config.metrics.enabled = false;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn run(args: Args) -> syslog_collector::Result<()> {
    let mut config = match &args.config {
        Some(path) => CollectorConfig::from_file(path)?,
        None => CollectorConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    info!("Configuration loaded successfully");
    info!("UDP address: {}", config.listener.udp_bind_address());
    if config.listener.tcp_enabled {
        info!("TCP address: {}", config.listener.tcp_bind_address());
    }
    info!("Output file: {}", config.storage.output_path.display());
    info!(
        "Flush cadence: {} records or {} ms",
        config.storage.flush_batch, config.storage.flush_interval_ms
    );

    let server = LogServer::new(config).await?;
    let handle = server.start().await?;
    handle.run_until(shutdown_signal()).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "syslog_collector=debug,info"
    } else {
        "syslog_collector=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting Syslog Collector v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => {
            info!("Syslog Collector stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fatal: {}", e);
            eprintln!("syslog-collector: {}", e);
            ExitCode::FAILURE
        }
    }
}
