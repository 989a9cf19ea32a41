//! Syslog over UDP
//!
//! One datagram is one message. The sender address is taken from the packet,
//! never from the message text.

use crate::server::ingest::Ingestor;
use crate::{CollectorError, Result};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// UDP receive loop
pub struct UdpListener {
    socket: UdpSocket,
    ingestor: Ingestor,
    shutdown: CancellationToken,
    recv_buffer_size: usize,
}

impl UdpListener {
    /// Bind the UDP socket
    ///
    /// Bind failures are fatal at startup and returned as `CollectorError::Bind`.
    pub async fn bind(
        address: &str,
        ingestor: Ingestor,
        recv_buffer_size: usize,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(address).await.map_err(|e| {
            CollectorError::Bind(format!("Failed to bind UDP socket {}: {}", address, e))
        })?;

        Ok(Self {
            socket,
            ingestor,
            shutdown,
            recv_buffer_size,
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive datagrams until shutdown
    pub async fn run(self) -> Result<()> {
        let local_addr = self.local_addr()?;
        info!(address = %local_addr, "syslog UDP listener started");

        let mut recv_buf = vec![0u8; self.recv_buffer_size];

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    break;
                }

                result = self.socket.recv_from(&mut recv_buf) => {
                    match result {
                        Ok((len, peer)) => {
                            self.ingestor.ingest(&recv_buf[..len], peer);
                        }
                        Err(e) => {
                            warn!(error = %e, "syslog UDP receive error");
                        }
                    }
                }
            }
        }

        debug!(address = %local_addr, "syslog UDP listener stopped");
        Ok(())
    }
}
