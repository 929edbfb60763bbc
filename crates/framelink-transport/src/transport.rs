//! Transport errors, statistics and the datagram transport abstraction.
//!
//! Stream connections expose concrete methods (see [`crate::tcp`]); datagram
//! backends sit behind the [`DatagramTransport`] trait so the datagram pumps
//! can be driven by any socket implementation.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// Address binding failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// Remote endpoint actively refused the connection
    #[error("Connection refused by {0}")]
    ConnectionRefused(SocketAddr),

    /// Connection failed for a reason other than refusal
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer closed the stream before the requested bytes arrived
    #[error("Stream truncated: expected {expected} bytes, received {received}")]
    Truncated {
        /// Bytes requested
        expected: usize,
        /// Bytes received before end-of-stream
        received: usize,
    },

    /// Peer reset or closed the connection while we were writing
    #[error("Peer disconnected: {0}")]
    PeerDisconnected(io::ErrorKind),

    /// A delimited read exceeded its length bound
    #[error("Delimited read exceeded {limit} bytes")]
    LineTooLong {
        /// Maximum accepted length
        limit: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    /// Classify an I/O error raised on an established connection.
    ///
    /// Resets, aborts and broken pipes mean the peer is gone; everything else
    /// is kept as a plain I/O error.
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Self::PeerDisconnected(err.kind()),
            _ => Self::Io(err),
        }
    }

    /// Returns true if the error means the remote side has gone away.
    ///
    /// Pumps treat these as a clean end of the session rather than a failure.
    #[must_use]
    pub fn is_peer_gone(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::PeerDisconnected(_) | Self::Closed
        )
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Async datagram transport trait.
///
/// Implemented by [`crate::DatagramSocket`]; tests may provide in-memory
/// implementations that drop or reorder datagrams.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Send one datagram to a remote address.
    ///
    /// # Errors
    /// Returns `TransportError` if the send operation fails
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize>;

    /// Receive one datagram into `buf`.
    ///
    /// Returns the number of bytes received and the sender's address.
    ///
    /// # Errors
    /// Returns `TransportError` if the receive operation fails
    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)>;

    /// Get the local address this transport is bound to.
    ///
    /// # Errors
    /// Returns `TransportError` if the address cannot be determined
    fn local_addr(&self) -> TransportResult<SocketAddr>;

    /// Close the transport and release resources.
    ///
    /// Closing twice is not an error. After closing, sends and receives
    /// return `TransportError::Closed`.
    ///
    /// # Errors
    /// Returns `TransportError` if closing fails
    async fn close(&self) -> TransportResult<()>;

    /// Check if the transport is closed.
    fn is_closed(&self) -> bool;

    /// Get transport statistics.
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total packets (datagrams or send calls) sent
    pub packets_sent: u64,
    /// Total packets (datagrams or completed reads) received
    pub packets_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Receive errors
    pub recv_errors: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful send
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.packets_sent += 1;
    }

    /// Record a successful receive
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.packets_received += 1;
    }

    /// Record a send error
    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }

    /// Record a receive error
    pub fn record_recv_error(&mut self) {
        self.recv_errors += 1;
    }
}
