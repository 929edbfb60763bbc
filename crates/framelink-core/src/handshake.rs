//! Start-token handshake.
//!
//! Before frames flow, the connecting side (initiator) sends a start token
//! terminated by a NUL byte. The accepting side (responder) may send a
//! greeting line before reading the token and an acknowledgment line after
//! it. Both lines are `\n`-terminated and advisory: the initiator waits for
//! each one for a bounded time and carries on without it.
//!
//! ```text
//! Initiator                          Responder
//!     |  <------- greeting\n -------   |   (optional)
//!     |  -------- TOKEN\0 -------->    |
//!     |  <------- ack\n ------------   |   (optional)
//!     |        frames either way       |
//! ```
//!
//! Which side sends frames afterwards is independent of who initiated.
//! Both sides must agree on whether greeting and ack are used, since an
//! unexpected line would otherwise be read as frame data.

use crate::DEFAULT_TOKEN;
use crate::error::{HandshakeError, SessionError};
use crate::session::{Session, SessionState};
use framelink_transport::{StreamConnection, TransportError};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Handshake configuration
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Perform the handshake at all; when false the session streams at once
    pub enabled: bool,
    /// Greeting line sent by the responder and awaited by the initiator
    pub greeting: Option<String>,
    /// Acknowledgment line sent by the responder and awaited by the initiator
    pub ack: Option<String>,
    /// How long the initiator waits for the greeting
    pub greeting_timeout: Duration,
    /// How long the initiator waits for the acknowledgment
    pub ack_timeout: Duration,
    /// Longest greeting or acknowledgment line accepted
    pub max_line_len: usize,
    /// Longest start token accepted
    pub max_token_len: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            greeting: None,
            ack: None,
            greeting_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(5),
            max_line_len: 1024,
            max_token_len: 256,
        }
    }
}

/// Start token: a readiness gate, not a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeToken(String);

impl HandshakeToken {
    /// Create a token; an empty string yields the default token.
    ///
    /// # Errors
    ///
    /// Returns `HandshakeError::InvalidToken` if the token contains a NUL
    /// byte.
    pub fn new(token: impl Into<String>) -> Result<Self, HandshakeError> {
        let token = token.into();
        if token.contains('\0') {
            return Err(HandshakeError::InvalidToken(
                "token must not contain NUL".to_string(),
            ));
        }
        if token.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self(token))
    }

    /// Token text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Token bytes followed by the NUL terminator
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(self.0.len() + 1);
        wire.extend_from_slice(self.0.as_bytes());
        wire.push(0);
        wire
    }
}

impl Default for HandshakeToken {
    fn default() -> Self {
        Self(DEFAULT_TOKEN.to_string())
    }
}

impl fmt::Display for HandshakeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a completed handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    /// Token sent (initiator) or received (responder)
    pub token: HandshakeToken,
    /// Greeting received by the initiator, if any arrived
    pub greeting: Option<String>,
    /// Acknowledgment received by the initiator, if any arrived
    pub ack: Option<String>,
}

impl HandshakeOutcome {
    fn bare(token: HandshakeToken) -> Self {
        Self {
            token,
            greeting: None,
            ack: None,
        }
    }
}

/// Run the handshake as the connecting side.
///
/// On success the session is `Streaming`. On failure the session is closed
/// and the transport released.
///
/// # Errors
///
/// - `HandshakeError::Session` if the session is not awaiting its handshake
/// - `HandshakeError::PeerClosed` if the peer goes away during the exchange
/// - `HandshakeError::Transport` for other transport failures
pub async fn initiate<S>(
    session: &mut Session<S>,
    config: &HandshakeConfig,
    token: &HandshakeToken,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    ensure_awaiting(session)?;

    if !config.enabled {
        session.transition_to(SessionState::Streaming)?;
        return Ok(HandshakeOutcome::bare(token.clone()));
    }

    let result = initiate_exchange(session.connection_mut(), config, token).await;
    finish(session, result).await
}

async fn initiate_exchange<S>(
    conn: &mut StreamConnection<S>,
    config: &HandshakeConfig,
    token: &HandshakeToken,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let greeting = if config.greeting.is_some() {
        read_advisory(conn, "greeting", config.max_line_len, config.greeting_timeout).await?
    } else {
        None
    };
    if let Some(greeting) = &greeting {
        tracing::info!("Server greeting: {}", greeting);
    }

    conn.send_all(&token.to_wire()).await?;
    tracing::info!("Sent start token {:?}", token.as_str());

    let ack = if config.ack.is_some() {
        read_advisory(conn, "acknowledgment", config.max_line_len, config.ack_timeout).await?
    } else {
        None
    };
    if let Some(ack) = &ack {
        tracing::info!("Server acknowledged: {}", ack);
    }

    Ok(HandshakeOutcome {
        token: token.clone(),
        greeting,
        ack,
    })
}

/// Run the handshake as the accepting side.
///
/// The token is not validated; any token (or an empty one, taken as the
/// default) lets streaming begin. On failure the session is closed.
///
/// # Errors
///
/// - `HandshakeError::Session` if the session is not awaiting its handshake
/// - `HandshakeError::TokenTooLong` if no NUL arrives within the limit
/// - `HandshakeError::PeerClosed` if the peer goes away during the exchange
/// - `HandshakeError::Transport` for other transport failures
pub async fn respond<S>(
    session: &mut Session<S>,
    config: &HandshakeConfig,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    ensure_awaiting(session)?;

    if !config.enabled {
        session.transition_to(SessionState::Streaming)?;
        return Ok(HandshakeOutcome::bare(HandshakeToken::default()));
    }

    let result = respond_exchange(session.connection_mut(), config).await;
    finish(session, result).await
}

async fn respond_exchange<S>(
    conn: &mut StreamConnection<S>,
    config: &HandshakeConfig,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if let Some(greeting) = &config.greeting {
        conn.send_all(&line(greeting)).await?;
    }

    let raw = conn
        .read_until(0, config.max_token_len)
        .await
        .map_err(|e| match e {
            TransportError::LineTooLong { limit } => HandshakeError::TokenTooLong { limit },
            other => other.into(),
        })?;
    let token = HandshakeToken::new(String::from_utf8_lossy(&raw).into_owned())?;
    tracing::info!("Received start token {:?}", token.as_str());

    if let Some(ack) = &config.ack {
        conn.send_all(&line(ack)).await?;
    }

    Ok(HandshakeOutcome::bare(token))
}

fn ensure_awaiting<S>(session: &Session<S>) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if session.state() != SessionState::AwaitingHandshake {
        return Err(SessionError::InvalidTransition {
            from: session.state(),
            to: SessionState::Streaming,
        });
    }
    Ok(())
}

async fn finish<S>(
    session: &mut Session<S>,
    result: Result<HandshakeOutcome, HandshakeError>,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match result {
        Ok(outcome) => {
            session.transition_to(SessionState::Streaming)?;
            Ok(outcome)
        }
        Err(e) => {
            tracing::warn!("Handshake failed: {}", e);
            session.close().await;
            Err(e)
        }
    }
}

/// Read an optional line; absence and malformed lines are not errors.
async fn read_advisory<S>(
    conn: &mut StreamConnection<S>,
    what: &str,
    max_len: usize,
    timeout: Duration,
) -> Result<Option<String>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match conn.read_line_with_timeout(max_len, timeout).await {
        Ok(Some(bytes)) => match String::from_utf8(bytes) {
            Ok(text) => Ok(Some(text)),
            Err(_) => {
                tracing::warn!("Ignoring {} that is not valid UTF-8", what);
                Ok(None)
            }
        },
        Ok(None) => {
            tracing::warn!("No {} within {:?}, continuing", what, timeout);
            Ok(None)
        }
        Err(TransportError::LineTooLong { limit }) => {
            tracing::warn!("Ignoring {} longer than {} bytes", what, limit);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn line(text: &str) -> Vec<u8> {
    let mut out = text.trim_end_matches(['\r', '\n']).as_bytes().to_vec();
    out.push(b'\n');
    out
}
