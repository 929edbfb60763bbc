//! Single-peer TCP stream transport.
//!
//! A [`StreamConnection`] owns one byte stream for the lifetime of a session.
//! Reads are buffered so that delimited handshake reads and exact frame reads
//! can be interleaved on the same connection without losing bytes.
//!
//! The connection is generic over the underlying stream so the codec and
//! handshake layers can be exercised over in-memory pipes
//! (`tokio::io::duplex`) as well as real sockets.

use crate::TransportConfig;
use crate::transport::{TransportError, TransportResult, TransportStats};
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Read buffer capacity for stream connections (64 KiB)
const READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// TCP listener that services exactly one client.
pub struct StreamListener {
    listener: TcpListener,
    config: TransportConfig,
}

impl StreamListener {
    /// Bind a listener on `addr` with a backlog of one.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created
    /// or bound.
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> TransportResult<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket
            .set_reuseaddr(true)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .bind(addr)
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;

        let listener = socket
            .listen(1)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        tracing::debug!("Listening on {}", addr);
        Ok(Self { listener, config })
    }

    /// Get the local address this listener is bound to
    ///
    /// # Errors
    /// Returns `TransportError::Io` if the address cannot be determined
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }

    /// Accept a single client and close the listening socket.
    ///
    /// Consuming the listener guarantees that only one session is ever
    /// serviced; later connection attempts are refused by the kernel.
    ///
    /// # Errors
    /// Returns `TransportError::Io` if accepting fails
    pub async fn accept_one(self) -> TransportResult<StreamConnection<TcpStream>> {
        let (stream, peer) = self.listener.accept().await?;
        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }
        tracing::info!("Client connected: {}", peer);
        Ok(StreamConnection::from_stream(stream, Some(peer)))
    }
}

/// A buffered, single-owner byte stream connection.
pub struct StreamConnection<S = TcpStream> {
    stream: Option<BufReader<S>>,
    peer_addr: Option<SocketAddr>,
    stats: TransportStats,
}

impl StreamConnection<TcpStream> {
    /// Connect to a remote listener.
    ///
    /// # Errors
    /// Returns `TransportError::ConnectionRefused` if the peer refuses the
    /// connection and `TransportError::ConnectionFailed` for any other
    /// failure, including the configured connect timeout expiring.
    pub async fn connect(addr: SocketAddr, config: &TransportConfig) -> TransportResult<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // Kernel may clamp these; failures are not fatal
        if let Err(e) = socket.set_recv_buffer_size(clamp_u32(config.recv_buffer_size)) {
            tracing::debug!("Could not set receive buffer size: {}", e);
        }
        if let Err(e) = socket.set_send_buffer_size(clamp_u32(config.send_buffer_size)) {
            tracing::debug!("Could not set send buffer size: {}", e);
        }

        let connect = socket.connect(addr);
        let result = match config.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(TransportError::ConnectionFailed(format!(
                        "{addr}: timed out after {limit:?}"
                    )));
                }
            },
            None => connect.await,
        };

        let stream = result.map_err(|e| match e.kind() {
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(addr),
            _ => TransportError::ConnectionFailed(format!("{addr}: {e}")),
        })?;

        if config.nodelay {
            stream.set_nodelay(true)?;
        }

        tracing::info!("Connected to {}", addr);
        Ok(Self::from_stream(stream, Some(addr)))
    }
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-established stream.
    #[must_use]
    pub fn from_stream(stream: S, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            stream: Some(BufReader::with_capacity(READ_BUFFER_CAPACITY, stream)),
            peer_addr,
            stats: TransportStats::new(),
        }
    }

    /// Remote address, when the stream is a socket
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Check if the connection has been closed locally
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Get connection statistics
    #[must_use]
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Fill `buf` completely.
    ///
    /// # Errors
    /// Returns `TransportError::Truncated` (with the number of bytes that did
    /// arrive) if the peer closes the stream first.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        let reader = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut filled = 0;

        while filled < buf.len() {
            let n = match reader.read(&mut buf[filled..]).await {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.stats.record_recv_error();
                    return Err(TransportError::from_io(e));
                }
            };
            if n == 0 {
                return Err(TransportError::Truncated {
                    expected: buf.len(),
                    received: filled,
                });
            }
            filled += n;
        }

        self.stats.record_recv(filled);
        Ok(())
    }

    /// Read exactly `n` bytes.
    ///
    /// # Errors
    /// Returns `TransportError::Truncated` if the peer closes before `n`
    /// bytes arrive.
    pub async fn read_exact(&mut self, n: usize) -> TransportResult<Bytes> {
        let mut buf = vec![0u8; n];
        self.read_into(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Read up to (and consume) `delim`, returning the bytes before it.
    ///
    /// Bytes read before a cancellation are lost, so callers that wrap this
    /// in a timeout must treat the stream position as undefined afterwards
    /// unless the delimiter is known to follow.
    ///
    /// # Errors
    /// Returns `TransportError::LineTooLong` if more than `max_len` bytes
    /// arrive without a delimiter, and `TransportError::Truncated` if the
    /// peer closes first.
    pub async fn read_until(&mut self, delim: u8, max_len: usize) -> TransportResult<Vec<u8>> {
        let reader = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut out = Vec::new();

        loop {
            let (found, used) = {
                let available = match reader.fill_buf().await {
                    Ok(available) => available,
                    Err(e) => return Err(TransportError::from_io(e)),
                };
                if available.is_empty() {
                    return Err(TransportError::Truncated {
                        expected: out.len() + 1,
                        received: out.len(),
                    });
                }

                match available.iter().position(|&b| b == delim) {
                    Some(pos) => {
                        if out.len() + pos > max_len {
                            return Err(TransportError::LineTooLong { limit: max_len });
                        }
                        out.extend_from_slice(&available[..pos]);
                        (true, pos + 1)
                    }
                    None => {
                        if out.len() + available.len() > max_len {
                            return Err(TransportError::LineTooLong { limit: max_len });
                        }
                        out.extend_from_slice(available);
                        (false, available.len())
                    }
                }
            };

            reader.consume(used);
            if found {
                self.stats.record_recv(out.len() + 1);
                return Ok(out);
            }
        }
    }

    /// Read one `\n`-terminated line, giving up after `limit`.
    ///
    /// Returns `Ok(None)` if the timeout expires first. A trailing `\r` is
    /// stripped. Bytes of a partially received line are discarded on
    /// timeout.
    ///
    /// # Errors
    /// Same as [`read_until`](Self::read_until).
    pub async fn read_line_with_timeout(
        &mut self,
        max_len: usize,
        limit: Duration,
    ) -> TransportResult<Option<Vec<u8>>> {
        match tokio::time::timeout(limit, self.read_until(b'\n', max_len)).await {
            Ok(Ok(mut line)) => {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Ok(Some(line))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// Write the whole buffer.
    ///
    /// # Errors
    /// Returns `TransportError::PeerDisconnected` on broken pipe or reset,
    /// `TransportError::Closed` if the connection was closed locally.
    pub async fn send_all(&mut self, buf: &[u8]) -> TransportResult<()> {
        let writer = self.stream.as_mut().ok_or(TransportError::Closed)?;

        let result = match writer.write_all(buf).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.stats.record_send(buf.len());
                Ok(())
            }
            Err(e) => {
                self.stats.record_send_error();
                Err(TransportError::from_io(e))
            }
        }
    }

    /// Shut down and release the stream.
    ///
    /// Safe to call any number of times; only the first call touches the
    /// socket.
    ///
    /// # Errors
    /// Never fails in practice; shutdown errors on an already-dead peer are
    /// logged and swallowed.
    pub async fn close(&mut self) -> TransportResult<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!("Shutdown on close failed (peer likely gone): {}", e);
            }
            tracing::debug!(
                "Connection to {:?} closed ({} bytes sent, {} bytes received)",
                self.peer_addr,
                self.stats.bytes_sent,
                self.stats.bytes_received
            );
        }
        Ok(())
    }
}

fn clamp_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
