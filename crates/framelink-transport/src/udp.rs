//! Async UDP datagram transport.
//!
//! Chunked frames travel as individual datagrams, so the socket is created
//! through `socket2` to enlarge the kernel buffers before handing it to Tokio.
//! A burst of 65 000-byte chunks would otherwise overflow the default receive
//! buffer on most systems.

use crate::TransportConfig;
use crate::transport::{DatagramTransport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::UdpSocket;

/// Largest payload a single IPv4 UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Async UDP socket with statistics tracking and idempotent close.
///
/// # Examples
///
/// ```no_run
/// use framelink_transport::{DatagramSocket, DatagramTransport, TransportConfig};
/// use std::net::SocketAddr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let addr: SocketAddr = "127.0.0.1:5005".parse()?;
/// let socket = DatagramSocket::bind(addr, &TransportConfig::default()).await?;
///
/// let mut buf = vec![0u8; framelink_transport::MAX_DATAGRAM_SIZE];
/// let (size, from) = socket.recv_from(&mut buf).await?;
/// println!("Received {} bytes from {}", size, from);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DatagramSocket {
    socket: Arc<UdpSocket>,
    closed: Arc<AtomicBool>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    packets_sent: Arc<AtomicU64>,
    packets_received: Arc<AtomicU64>,
    send_errors: Arc<AtomicU64>,
    recv_errors: Arc<AtomicU64>,
}

impl DatagramSocket {
    /// Create a UDP socket bound to the given address.
    ///
    /// Use `0.0.0.0:0` on the sending side for automatic port selection.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created,
    /// configured or bound.
    pub async fn bind(addr: SocketAddr, config: &TransportConfig) -> TransportResult<Self> {
        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };

        let socket2 =
            socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
                .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket2
            .set_recv_buffer_size(config.recv_buffer_size)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket2
            .set_send_buffer_size(config.send_buffer_size)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket2
            .bind(&addr.into())
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;

        // Tokio requires the socket to be non-blocking before adoption
        socket2
            .set_nonblocking(true)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let std_socket: std::net::UdpSocket = socket2.into();
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        tracing::debug!("UDP socket bound to {}", addr);
        Ok(Self::from_socket(socket))
    }

    /// Create from an existing Tokio `UdpSocket`.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            closed: Arc::new(AtomicBool::new(false)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            packets_sent: Arc::new(AtomicU64::new(0)),
            packets_received: Arc::new(AtomicU64::new(0)),
            send_errors: Arc::new(AtomicU64::new(0)),
            recv_errors: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl DatagramTransport for DatagramSocket {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        match self.socket.send_to(buf, addr).await {
            Ok(sent) => {
                self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        match self.socket.recv_from(buf).await {
            Ok((size, addr)) => {
                self.bytes_received
                    .fetch_add(size as u64, Ordering::Relaxed);
                self.packets_received.fetch_add(1, Ordering::Relaxed);
                Ok((size, addr))
            }
            Err(e) => {
                self.recv_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> TransportResult<()> {
        if !self.closed.swap(true, Ordering::Relaxed) {
            tracing::debug!(
                "UDP socket closed ({} datagrams sent, {} received)",
                self.packets_sent.load(Ordering::Relaxed),
                self.packets_received.load(Ordering::Relaxed)
            );
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}
