//! Session state machine.
//!
//! A session owns exactly one stream connection to one peer. Its state
//! moves strictly forward:
//!
//! ```text
//! Connecting -> AwaitingHandshake -> Streaming
//!      \               |                |
//!       `-------------> Closed <--------'
//! ```
//!
//! Frames may only be exchanged in `Streaming`. `Closed` is terminal and
//! closing is idempotent.

use crate::error::SessionError;
use framelink_transport::{StreamConnection, StreamListener, TransportConfig, TransportResult};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Transport being established
    Connecting,
    /// Transport up, handshake not yet complete
    AwaitingHandshake,
    /// Handshake complete, frames flowing
    Streaming,
    /// Session terminated
    Closed,
}

/// A single-peer session over a stream connection
pub struct Session<S = TcpStream> {
    state: SessionState,
    connection: StreamConnection<S>,
    created_at: Instant,
    streaming_since: Option<Instant>,
}

impl Session<TcpStream> {
    /// Connect to a listening peer.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionRefused` if nothing is listening,
    /// or another `TransportError` if the connection cannot be established.
    pub async fn connect(addr: SocketAddr, config: &TransportConfig) -> TransportResult<Self> {
        tracing::debug!("Session connecting to {}", addr);
        let connection = StreamConnection::connect(addr, config).await?;
        Ok(Self::from_connection(connection))
    }

    /// Accept the single client of a listener.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if accepting fails.
    pub async fn accept(listener: StreamListener) -> TransportResult<Self> {
        let connection = listener.accept_one().await?;
        Ok(Self::from_connection(connection))
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established connection; the session awaits its handshake.
    #[must_use]
    pub fn from_connection(connection: StreamConnection<S>) -> Self {
        let mut session = Self {
            state: SessionState::Connecting,
            connection,
            created_at: Instant::now(),
            streaming_since: None,
        };
        session.set_state(SessionState::AwaitingHandshake);
        session
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true once the handshake has completed and until close
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    /// Returns true if the session is closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Remote address, when known
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.connection.peer_addr()
    }

    /// Time since the session was created
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time spent streaming, if the handshake completed
    #[must_use]
    pub fn streaming_duration(&self) -> Option<Duration> {
        self.streaming_since.map(|t| t.elapsed())
    }

    /// Check whether a transition is allowed
    #[must_use]
    pub fn can_transition(&self, to: SessionState) -> bool {
        matches!(
            (self.state, to),
            (SessionState::Connecting, SessionState::AwaitingHandshake)
                | (SessionState::AwaitingHandshake, SessionState::Streaming)
                | (_, SessionState::Closed)
        )
    }

    /// Transition to a new state.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` if the transition is not
    /// allowed.
    pub fn transition_to(&mut self, new_state: SessionState) -> Result<(), SessionError> {
        if !self.can_transition(new_state) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }
        self.set_state(new_state);
        Ok(())
    }

    fn set_state(&mut self, new_state: SessionState) {
        let old_state = self.state;
        self.state = new_state;

        if new_state == SessionState::Streaming && self.streaming_since.is_none() {
            self.streaming_since = Some(Instant::now());
        }

        tracing::debug!(
            "Session state transition: {:?} -> {:?}",
            old_state,
            new_state
        );
    }

    /// Connection access for the handshake phase
    pub(crate) fn connection_mut(&mut self) -> &mut StreamConnection<S> {
        &mut self.connection
    }

    /// Connection access for frame exchange.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotStreaming` unless the session is streaming.
    pub fn stream(&mut self) -> Result<&mut StreamConnection<S>, SessionError> {
        if self.state != SessionState::Streaming {
            return Err(SessionError::NotStreaming(self.state));
        }
        Ok(&mut self.connection)
    }

    /// Close the session and release the transport.
    ///
    /// Safe to call any number of times.
    pub async fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.set_state(SessionState::Closed);
        }
        // Connection close is itself idempotent and infallible
        let _ = self.connection.close().await;
    }
}
