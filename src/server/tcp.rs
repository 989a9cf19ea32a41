//! Syslog over TCP with newline-delimited framing
//!
//! Each connection is read line by line (LF or CRLF). Blank lines are
//! skipped, lines longer than the maximum message size are cut, and a final
//! line without a terminator is still delivered when the peer closes.

use crate::server::ingest::Ingestor;
use crate::{CollectorError, Result};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// TCP accept loop
pub struct TcpSyslogListener {
    listener: TcpListener,
    ingestor: Ingestor,
    shutdown: CancellationToken,
    connections: Arc<Semaphore>,
}

impl TcpSyslogListener {
    /// Bind the TCP listening socket
    pub async fn bind(
        address: &str,
        ingestor: Ingestor,
        max_connections: usize,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            CollectorError::Bind(format!("Failed to bind TCP socket {}: {}", address, e))
        })?;

        Ok(Self {
            listener,
            ingestor,
            shutdown,
            connections: Arc::new(Semaphore::new(max_connections)),
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown, then wait for open connections to finish
    pub async fn run(self) -> Result<()> {
        let local_addr = self.local_addr()?;
        info!(address = %local_addr, "syslog TCP listener started");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    break;
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            match Arc::clone(&self.connections).try_acquire_owned() {
                                Ok(permit) => {
                                    connections.spawn(handle_connection(
                                        stream,
                                        peer,
                                        self.ingestor.clone(),
                                        self.shutdown.clone(),
                                        permit,
                                    ));
                                }
                                Err(_) => {
                                    warn!(peer = %peer, "connection limit reached, closing connection");
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        while connections.join_next().await.is_some() {}

        debug!(address = %local_addr, "syslog TCP listener stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ingestor: Ingestor,
    shutdown: CancellationToken,
    _permit: OwnedSemaphorePermit,
) {
    debug!(peer = %peer, "syslog TCP connection opened");

    let max_message_size = ingestor.max_message_size();
    let mut reader = BufReader::new(stream);
    let mut line = Vec::with_capacity(1024);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                break;
            }

            result = read_frame(&mut reader, &mut line, max_message_size) => {
                match result {
                    Ok(true) => {
                        if !line.is_empty() {
                            ingestor.ingest(&line, peer);
                        }
                    }
                    Ok(false) => break,
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "syslog TCP read error");
                        break;
                    }
                }
            }
        }
    }

    debug!(peer = %peer, "syslog TCP connection closed");
}

/// Read one newline-terminated frame into `line`, without the terminator
///
/// At most `max_len + 1` bytes are kept so the parser still sees that the
/// frame was oversized. Returns `Ok(false)` at end of stream.
pub async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max_len: usize,
) -> io::Result<bool> {
    line.clear();
    let mut saw_data = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(saw_data);
        }
        saw_data = true;

        let (content_len, consumed, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i, i + 1, true),
            None => (available.len(), available.len(), false),
        };

        let room = (max_len + 1).saturating_sub(line.len());
        line.extend_from_slice(&available[..content_len.min(room)]);
        reader.consume(consumed);

        if complete {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(true);
        }
    }
}
