//! Datagram chunk format and frame splitting.
//!
//! A frame too large for one datagram is split into chunks. Two wire formats
//! exist:
//!
//! - **V1**: 8-byte big-endian header `{u32 frame_sequence_id, u16
//!   chunk_index, u16 total_chunks}`. The sequence id lets the receiver tell
//!   frames apart even when chunks of consecutive frames interleave.
//! - **Legacy**: 4-byte little-endian header `{u16 chunk_index, u16
//!   total_chunks}`. Frame boundaries are inferred by [`LegacySequencer`].

use crate::error::ChunkError;
use crate::{CHUNK_HEADER_SIZE, LEGACY_CHUNK_HEADER_SIZE, MAX_CHUNK_PAYLOAD};
use bytes::{BufMut, Bytes, BytesMut};

/// Chunk header wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkFormat {
    /// Sequence-numbered big-endian header
    #[default]
    V1,
    /// Index/total little-endian header without a sequence id
    Legacy,
}

impl ChunkFormat {
    /// Header size for this format
    #[must_use]
    pub const fn header_size(self) -> usize {
        match self {
            Self::V1 => CHUNK_HEADER_SIZE,
            Self::Legacy => LEGACY_CHUNK_HEADER_SIZE,
        }
    }
}

/// Parsed chunk header.
///
/// For the legacy format `frame_sequence_id` is zero until a
/// [`LegacySequencer`] assigns one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Frame this chunk belongs to
    pub frame_sequence_id: u32,
    /// Position of this chunk within the frame
    pub chunk_index: u16,
    /// Number of chunks in the frame
    pub total_chunks: u16,
}

impl ChunkHeader {
    fn validate(self) -> Result<Self, ChunkError> {
        if self.total_chunks == 0 {
            return Err(ChunkError::ZeroTotal);
        }
        if self.chunk_index >= self.total_chunks {
            return Err(ChunkError::IndexOutOfRange {
                index: self.chunk_index,
                total: self.total_chunks,
            });
        }
        Ok(self)
    }

    /// Encode as a v1 header
    #[must_use]
    pub fn to_v1_bytes(self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut out = [0u8; CHUNK_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.frame_sequence_id.to_be_bytes());
        out[4..6].copy_from_slice(&self.chunk_index.to_be_bytes());
        out[6..8].copy_from_slice(&self.total_chunks.to_be_bytes());
        out
    }

    /// Encode as a legacy header (sequence id is not carried)
    #[must_use]
    pub fn to_legacy_bytes(self) -> [u8; LEGACY_CHUNK_HEADER_SIZE] {
        let mut out = [0u8; LEGACY_CHUNK_HEADER_SIZE];
        out[0..2].copy_from_slice(&self.chunk_index.to_le_bytes());
        out[2..4].copy_from_slice(&self.total_chunks.to_le_bytes());
        out
    }

    /// Parse a header in the given format from the start of a datagram.
    ///
    /// # Errors
    ///
    /// Returns `ChunkError::TooShort` if the datagram is shorter than the
    /// header, `ChunkError::ZeroTotal` or `ChunkError::IndexOutOfRange` if
    /// the header violates the chunk invariants.
    pub fn parse(data: &[u8], format: ChunkFormat) -> Result<Self, ChunkError> {
        let size = format.header_size();
        if data.len() < size {
            return Err(ChunkError::TooShort {
                expected: size,
                actual: data.len(),
            });
        }

        let header = match format {
            ChunkFormat::V1 => Self {
                frame_sequence_id: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
                chunk_index: u16::from_be_bytes([data[4], data[5]]),
                total_chunks: u16::from_be_bytes([data[6], data[7]]),
            },
            ChunkFormat::Legacy => Self {
                frame_sequence_id: 0,
                chunk_index: u16::from_le_bytes([data[0], data[1]]),
                total_chunks: u16::from_le_bytes([data[2], data[3]]),
            },
        };
        header.validate()
    }
}

/// One datagram's worth of a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Frame this chunk belongs to
    pub frame_sequence_id: u32,
    /// Position of this chunk within the frame
    pub chunk_index: u16,
    /// Number of chunks in the frame
    pub total_chunks: u16,
    /// Chunk payload
    pub payload: Bytes,
}

impl Chunk {
    /// Create a chunk, checking its invariants.
    ///
    /// # Errors
    ///
    /// Returns `ChunkError` if the index is not below the total, the total is
    /// zero, or the payload exceeds [`MAX_CHUNK_PAYLOAD`].
    pub fn new(
        frame_sequence_id: u32,
        chunk_index: u16,
        total_chunks: u16,
        payload: Bytes,
    ) -> Result<Self, ChunkError> {
        ChunkHeader {
            frame_sequence_id,
            chunk_index,
            total_chunks,
        }
        .validate()?;

        if payload.len() > MAX_CHUNK_PAYLOAD {
            return Err(ChunkError::PayloadTooLarge {
                len: payload.len(),
                limit: MAX_CHUNK_PAYLOAD,
            });
        }

        Ok(Self {
            frame_sequence_id,
            chunk_index,
            total_chunks,
            payload,
        })
    }

    /// Header of this chunk
    #[must_use]
    pub fn header(&self) -> ChunkHeader {
        ChunkHeader {
            frame_sequence_id: self.frame_sequence_id,
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
        }
    }

    /// Encode header + payload as one datagram
    #[must_use]
    pub fn encode(&self, format: ChunkFormat) -> Bytes {
        let mut buf = BytesMut::with_capacity(format.header_size() + self.payload.len());
        match format {
            ChunkFormat::V1 => buf.put_slice(&self.header().to_v1_bytes()),
            ChunkFormat::Legacy => buf.put_slice(&self.header().to_legacy_bytes()),
        }
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a v1 datagram
    ///
    /// # Errors
    ///
    /// See [`ChunkHeader::parse`]; also `ChunkError::PayloadTooLarge`.
    pub fn decode_v1(datagram: Bytes) -> Result<Self, ChunkError> {
        let header = ChunkHeader::parse(&datagram, ChunkFormat::V1)?;
        Self::new(
            header.frame_sequence_id,
            header.chunk_index,
            header.total_chunks,
            datagram.slice(CHUNK_HEADER_SIZE..),
        )
    }
}

/// Splits frame payloads into chunks
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_payload: usize,
}

impl Chunker {
    /// Create a chunker; `max_payload` is clamped to `1..=MAX_CHUNK_PAYLOAD`
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.clamp(1, MAX_CHUNK_PAYLOAD),
        }
    }

    /// Payload bytes per chunk
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Number of chunks a payload of `len` bytes needs (minimum one)
    #[must_use]
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_payload).max(1)
    }

    /// Split a payload into chunks of at most `max_payload` bytes.
    ///
    /// An empty payload yields a single empty chunk. Chunk payloads are
    /// slices of `payload`, not copies.
    ///
    /// # Errors
    ///
    /// Returns `ChunkError::TooManyChunks` if more than `u16::MAX` chunks
    /// would be needed.
    pub fn split(&self, sequence_id: u32, payload: &Bytes) -> Result<Vec<Chunk>, ChunkError> {
        let count = self.chunk_count(payload.len());
        let total = u16::try_from(count).map_err(|_| ChunkError::TooManyChunks {
            len: payload.len(),
            max_payload: self.max_payload,
        })?;

        let mut chunks = Vec::with_capacity(count);
        for index in 0..total {
            let start = usize::from(index) * self.max_payload;
            let end = (start + self.max_payload).min(payload.len());
            chunks.push(Chunk {
                frame_sequence_id: sequence_id,
                chunk_index: index,
                total_chunks: total,
                payload: payload.slice(start..end),
            });
        }
        Ok(chunks)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(MAX_CHUNK_PAYLOAD)
    }
}

struct LegacyFrame {
    sequence_id: u32,
    total: u16,
    seen: Vec<bool>,
}

/// Assigns synthetic frame sequence ids to legacy chunks.
///
/// A chunk starts a new frame when its index is zero, when its total differs
/// from the current frame's, or when its index was already seen in the
/// current frame. Reordering across a frame boundary cannot be detected in
/// this format; such chunks end up in the wrong frame and the reassembler
/// discards the result.
#[derive(Default)]
pub struct LegacySequencer {
    current: Option<LegacyFrame>,
    next_sequence: u32,
}

impl LegacySequencer {
    /// Create a new sequencer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a sequence id to a legacy header
    pub fn assign(&mut self, header: ChunkHeader) -> u32 {
        let index = usize::from(header.chunk_index);

        if let Some(frame) = self.current.as_mut() {
            let continues = header.chunk_index != 0
                && frame.total == header.total_chunks
                && !frame.seen[index];
            if continues {
                frame.seen[index] = true;
                return frame.sequence_id;
            }
        }

        let sequence_id = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let mut seen = vec![false; usize::from(header.total_chunks)];
        seen[index] = true;
        self.current = Some(LegacyFrame {
            sequence_id,
            total: header.total_chunks,
            seen,
        });
        sequence_id
    }

    /// Decode a legacy datagram, assigning it a sequence id
    ///
    /// # Errors
    ///
    /// See [`ChunkHeader::parse`]; also `ChunkError::PayloadTooLarge`.
    pub fn decode(&mut self, datagram: Bytes) -> Result<Chunk, ChunkError> {
        let header = ChunkHeader::parse(&datagram, ChunkFormat::Legacy)?;
        let payload = datagram.slice(LEGACY_CHUNK_HEADER_SIZE..);
        if payload.len() > MAX_CHUNK_PAYLOAD {
            return Err(ChunkError::PayloadTooLarge {
                len: payload.len(),
                limit: MAX_CHUNK_PAYLOAD,
            });
        }

        Ok(Chunk {
            frame_sequence_id: self.assign(header),
            chunk_index: header.chunk_index,
            total_chunks: header.total_chunks,
            payload,
        })
    }
}

/// Parses datagrams of either chunk format
pub enum ChunkDecoder {
    /// V1 headers carry their own sequence id
    V1,
    /// Legacy headers need a sequencer
    Legacy(LegacySequencer),
}

impl ChunkDecoder {
    /// Create a decoder for the given format
    #[must_use]
    pub fn new(format: ChunkFormat) -> Self {
        match format {
            ChunkFormat::V1 => Self::V1,
            ChunkFormat::Legacy => Self::Legacy(LegacySequencer::new()),
        }
    }

    /// Decode one datagram
    ///
    /// # Errors
    ///
    /// Returns `ChunkError` for malformed datagrams.
    pub fn decode(&mut self, datagram: Bytes) -> Result<Chunk, ChunkError> {
        match self {
            Self::V1 => Chunk::decode_v1(datagram),
            Self::Legacy(sequencer) => sequencer.decode(datagram),
        }
    }
}
