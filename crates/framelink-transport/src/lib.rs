//! # FRAMELINK Transport
//!
//! Network transport layer for the FRAMELINK frame protocol.
//!
//! This crate provides:
//! - Single-peer TCP stream connections with exact-read / send-all primitives
//! - A single-client TCP listener
//! - UDP datagram sockets with enlarged kernel buffers
//! - Liveness classification (peer closed, reset, truncated read)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod tcp;
pub mod transport;
pub mod udp;

pub use tcp::{StreamConnection, StreamListener};
pub use transport::{DatagramTransport, TransportError, TransportResult, TransportStats};
pub use udp::{DatagramSocket, MAX_DATAGRAM_SIZE};

use std::time::Duration;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Disable Nagle's algorithm on stream connections
    pub nodelay: bool,
    /// Bound on the time spent establishing an outgoing connection
    pub connect_timeout: Option<Duration>,
    /// Receive buffer size
    pub recv_buffer_size: usize,
    /// Send buffer size
    pub send_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            connect_timeout: Some(Duration::from_secs(10)),
            recv_buffer_size: 2 * 1024 * 1024,
            send_buffer_size: 2 * 1024 * 1024,
        }
    }
}
