//! # FRAMELINK Core
//!
//! Frame transport core for the FRAMELINK video link.
//!
//! This crate provides:
//! - Frame model and wire codecs (framed and fixed-size)
//! - Datagram chunking and reassembly
//! - Session state machine and start-token handshake
//! - Paced send/receive pumps with cooperative shutdown
//! - Error types and handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Pumps                                    │
//! │   (paced send / receive loops, shutdown, cleanup)               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                   Session + Handshake                            │
//! │   (greeting, NUL-terminated start token, acknowledgment)        │
//! ├──────────────────────────────┬──────────────────────────────────┤
//! │         Wire Codec           │       Chunker / Reassembler      │
//! │   (TCP framed or fixed)      │   (UDP datagram fragments)       │
//! ├──────────────────────────────┴──────────────────────────────────┤
//! │                    framelink-transport                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod pacing;
pub mod pump;
pub mod reassembly;
pub mod session;

pub use chunk::{Chunk, ChunkDecoder, ChunkFormat, ChunkHeader, Chunker, LegacySequencer};
pub use codec::{
    DEFAULT_MAX_FRAME_BYTES, FixedFormat, FrameCodec, decode_fixed, decode_framed,
    decode_framed_bytes, encode_fixed, encode_framed,
};
pub use error::{
    ChunkError, CodecError, Error, FrameError, HandshakeError, SessionError, SinkError,
    SourceError,
};
pub use frame::{Frame, FrameHeader, PixelLayout};
pub use handshake::{HandshakeConfig, HandshakeOutcome, HandshakeToken};
pub use pacing::Pacer;
pub use pump::{
    DatagramConfig, DatagramReceivePump, DatagramSendPump, DesyncPolicy, FrameSink, FrameSource,
    PumpConfig, PumpExit, PumpReport, ReceivePump, SendPump, Shutdown, ShutdownHandle,
    SourceKind, StreamStats,
};
pub use reassembly::{PayloadFormat, ReassemblyConfig, ReassemblyStats, Reassembler};
pub use session::{Session, SessionState};

use std::time::Duration;

/// Framed packet header size in bytes
pub const FRAME_HEADER_SIZE: usize = 8;

/// Datagram chunk header size in bytes (v1 wire format)
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Datagram chunk header size in bytes (legacy wire format)
pub const LEGACY_CHUNK_HEADER_SIZE: usize = 4;

/// Largest chunk payload carried by a single datagram
pub const MAX_CHUNK_PAYLOAD: usize = 65_000;

/// Idle time after which an incomplete frame is discarded
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Start token used when the operator supplies none
pub const DEFAULT_TOKEN: &str = "START";

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
