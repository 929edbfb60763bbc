//! Error types for the FRAMELINK core protocol.

use crate::session::SessionState;
use framelink_transport::TransportError;
use thiserror::Error;

/// Core protocol errors
#[derive(Debug, Error)]
pub enum Error {
    /// Frame construction error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Wire codec error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Datagram chunk error
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Handshake error
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Session error
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame source error
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Frame sink error
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Frame construction errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Raw RGB payload does not match its dimensions
    #[error("raw frame {width}x{height} needs {expected} bytes, got {actual}")]
    LayoutMismatch {
        /// Frame width in pixels
        width: u16,
        /// Frame height in pixels
        height: u16,
        /// Required byte length
        expected: usize,
        /// Supplied byte length
        actual: usize,
    },

    /// Payload does not fit the 32-bit length field
    #[error("frame payload of {0} bytes exceeds the 32-bit length field")]
    TooLarge(usize),
}

/// Wire codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Peer closed the stream before a whole frame arrived.
    ///
    /// Counts cover the whole frame including its header, so `received == 0`
    /// means the stream ended cleanly on a frame boundary.
    #[error("stream truncated: expected {expected} bytes, received {received}")]
    TruncatedStream {
        /// Bytes the current frame needed
        expected: usize,
        /// Bytes of the current frame that arrived
        received: usize,
    },

    /// Fixed-size frame had the wrong number of bytes
    #[error("frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSizeMismatch {
        /// Configured fixed frame size
        expected: usize,
        /// Actual byte count
        actual: usize,
    },

    /// In-memory framed packet length disagrees with its header
    #[error("framed packet declares {declared} payload bytes but carries {actual}")]
    LengthMismatch {
        /// Length announced by the header
        declared: usize,
        /// Payload bytes present
        actual: usize,
    },

    /// Header announces a frame larger than the configured limit
    #[error("frame of {length} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// Announced length
        length: usize,
        /// Configured maximum
        limit: usize,
    },

    /// Frame construction failed
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Transport failure other than truncation
    #[error(transparent)]
    Transport(TransportError),
}

impl CodecError {
    /// Returns true if the peer closed cleanly between two frames
    #[must_use]
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Self::TruncatedStream { received: 0, .. })
    }

    /// Returns true if the peer has gone away (cleanly or mid-frame)
    #[must_use]
    pub fn is_peer_gone(&self) -> bool {
        match self {
            Self::TruncatedStream { .. } => true,
            Self::Transport(e) => e.is_peer_gone(),
            _ => false,
        }
    }
}

impl From<TransportError> for CodecError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Truncated { expected, received } => {
                Self::TruncatedStream { expected, received }
            }
            other => Self::Transport(other),
        }
    }
}

/// Datagram chunk errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// Datagram shorter than the chunk header
    #[error("datagram too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Header size
        expected: usize,
        /// Datagram size
        actual: usize,
    },

    /// Header announces zero chunks
    #[error("total_chunks must be at least 1")]
    ZeroTotal,

    /// Chunk index not below total
    #[error("chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange {
        /// Chunk index
        index: u16,
        /// Total chunks
        total: u16,
    },

    /// Chunk payload larger than the safe datagram payload
    #[error("chunk payload of {len} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Payload length
        len: usize,
        /// Maximum payload
        limit: usize,
    },

    /// Frame needs more chunks than the 16-bit index can address
    #[error("frame of {len} bytes needs more than 65535 chunks of {max_payload}")]
    TooManyChunks {
        /// Frame length
        len: usize,
        /// Chunk payload size
        max_payload: usize,
    },
}

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Token cannot be sent (interior NUL)
    #[error("invalid handshake token: {0}")]
    InvalidToken(String),

    /// Peer sent more than the token limit without a terminator
    #[error("handshake token exceeds {limit} bytes")]
    TokenTooLong {
        /// Maximum accepted token length
        limit: usize,
    },

    /// Peer closed the connection during the handshake
    #[error("peer closed the connection during the handshake")]
    PeerClosed,

    /// Transport failure during the handshake
    #[error(transparent)]
    Transport(TransportError),

    /// Session was not in a state that allows the handshake
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<TransportError> for HandshakeError {
    fn from(err: TransportError) -> Self {
        if err.is_peer_gone() {
            Self::PeerClosed
        } else {
            Self::Transport(err)
        }
    }
}

/// Session-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Requested state transition is not allowed
    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state
        from: SessionState,
        /// Requested state
        to: SessionState,
    },

    /// Operation requires the streaming state
    #[error("session is not streaming (state: {0:?})")]
    NotStreaming(SessionState),
}

/// Frame source (producer collaborator) errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// No frame available: end of file, or a live source with nothing ready
    #[error("source exhausted")]
    Exhausted,

    /// Source failed irrecoverably
    #[error("source failed: {0}")]
    Failed(String),
}

/// Frame sink (consumer collaborator) errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Consumer stopped accepting frames (window closed, quit requested)
    #[error("sink closed")]
    Closed,

    /// Consumer failed irrecoverably
    #[error("sink failed: {0}")]
    Failed(String),
}
