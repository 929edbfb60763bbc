//! Datagram frame reassembly.
//!
//! The [`Reassembler`] rebuilds frames from chunks that may arrive out of
//! order, duplicated, or not at all. It holds at most one partial frame:
//!
//! - a chunk of a newer frame abandons the current one (superseded)
//! - a chunk of an older frame is dropped (stale)
//! - a partial frame that sees no chunk for the idle timeout is discarded
//!
//! Frame sequence ids are compared with serial-number arithmetic so the
//! wrap from `u32::MAX` to `0` counts as moving forward.

use crate::chunk::Chunk;
use crate::codec::{DEFAULT_MAX_FRAME_BYTES, decode_framed_bytes};
use crate::frame::{Frame, PixelLayout};
use crate::{DEFAULT_REASSEMBLY_TIMEOUT, FRAME_HEADER_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::{Duration, Instant};

/// How a reassembled payload becomes a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// Payload is a framed packet (header + frame bytes)
    #[default]
    Framed,
    /// Payload is the frame bytes themselves
    Bare(PixelLayout),
}

/// Reassembly configuration
#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    /// Idle time after which a partial frame is discarded
    pub timeout: Duration,
    /// Interpretation of completed payloads
    pub payload_format: PayloadFormat,
    /// Largest frame accepted, bounding the bytes held for one frame
    pub max_frame_bytes: usize,
    /// Frame width for bare payloads
    pub width: u16,
    /// Frame height for bare payloads
    pub height: u16,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            payload_format: PayloadFormat::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            width: 0,
            height: 0,
        }
    }
}

impl ReassemblyConfig {
    /// Largest reassembled payload, including the frame header when framed
    #[must_use]
    pub fn max_payload_bytes(&self) -> usize {
        match self.payload_format {
            PayloadFormat::Framed => self.max_frame_bytes.saturating_add(FRAME_HEADER_SIZE),
            PayloadFormat::Bare(_) => self.max_frame_bytes,
        }
    }

    /// Largest `total_chunks` a frame may announce.
    ///
    /// Senders pick their own chunk size, so this assumes one-byte chunks.
    #[must_use]
    pub fn max_chunks(&self) -> usize {
        self.max_payload_bytes().min(usize::from(u16::MAX))
    }
}

/// Reassembly event counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Frames emitted
    pub completed: u64,
    /// Partial frames abandoned for a newer frame
    pub superseded: u64,
    /// Partial frames discarded after the idle timeout
    pub expired: u64,
    /// Chunks of frames older than the current one
    pub stale: u64,
    /// Chunks received more than once
    pub duplicate: u64,
    /// Chunks whose total disagrees with their frame, or too large a total
    pub inconsistent: u64,
    /// Partial frames discarded for holding more than the frame limit
    pub oversized: u64,
    /// Completed payloads that did not decode to a frame
    pub undecodable: u64,
}

impl ReassemblyStats {
    /// Frames lost to supersession, expiry or decode failure
    #[must_use]
    pub fn frames_lost(&self) -> u64 {
        self.superseded + self.expired + self.oversized + self.undecodable
    }
}

/// Returns true if `a` comes after `b` in serial-number order
fn is_newer(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000_0000
}

struct ReassemblyBuffer {
    sequence_id: u32,
    expected_total: u16,
    received: Vec<Option<Bytes>>,
    received_count: usize,
    received_bytes: usize,
    created_at: Instant,
    last_update: Instant,
}

impl ReassemblyBuffer {
    fn new(sequence_id: u32, expected_total: u16, now: Instant) -> Self {
        Self {
            sequence_id,
            expected_total,
            received: vec![None; usize::from(expected_total)],
            received_count: 0,
            received_bytes: 0,
            created_at: now,
            last_update: now,
        }
    }

    /// Store a chunk; returns false if its index was already filled
    fn insert(&mut self, index: u16, payload: Bytes, now: Instant) -> bool {
        self.last_update = now;
        let slot = &mut self.received[usize::from(index)];
        self.received_bytes += payload.len();
        let previous = slot.replace(payload);
        match previous {
            Some(old) => {
                self.received_bytes -= old.len();
                false
            }
            None => {
                self.received_count += 1;
                true
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.received_count == usize::from(self.expected_total)
    }

    fn assemble(self) -> Bytes {
        let len = self.received.iter().flatten().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(len);
        for payload in self.received.into_iter().flatten() {
            out.put_slice(&payload);
        }
        out.freeze()
    }
}

/// Single-buffer frame reassembler
pub struct Reassembler {
    config: ReassemblyConfig,
    current: Option<ReassemblyBuffer>,
    /// Last sequence that left the buffer, with the time of the last accepted chunk
    floor: Option<(u32, Instant)>,
    stats: ReassemblyStats,
}

impl Reassembler {
    /// Create a new reassembler
    #[must_use]
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            config,
            current: None,
            floor: None,
            stats: ReassemblyStats::default(),
        }
    }

    /// Event counters
    #[must_use]
    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Sequence id of the partial frame, if any
    #[must_use]
    pub fn pending_sequence(&self) -> Option<u32> {
        self.current.as_ref().map(|b| b.sequence_id)
    }

    /// Chunks held for the partial frame
    #[must_use]
    pub fn pending_chunks(&self) -> usize {
        self.current.as_ref().map_or(0, |b| b.received_count)
    }

    /// Ingest a chunk received now
    pub fn ingest(&mut self, chunk: Chunk) -> Option<Frame> {
        self.ingest_at(chunk, Instant::now())
    }

    /// Ingest a chunk received at `now`, returning a frame if it completes one
    pub fn ingest_at(&mut self, chunk: Chunk, now: Instant) -> Option<Frame> {
        self.expire_idle(now);

        if usize::from(chunk.total_chunks) > self.config.max_chunks() {
            tracing::debug!(
                "Dropping chunk of frame {}: {} chunks exceeds limit",
                chunk.frame_sequence_id,
                chunk.total_chunks
            );
            self.stats.inconsistent += 1;
            return None;
        }

        match self.current.as_mut() {
            Some(buffer) if buffer.sequence_id == chunk.frame_sequence_id => {
                if buffer.expected_total != chunk.total_chunks {
                    tracing::debug!(
                        "Dropping chunk of frame {}: total {} disagrees with {}",
                        chunk.frame_sequence_id,
                        chunk.total_chunks,
                        buffer.expected_total
                    );
                    self.stats.inconsistent += 1;
                    return None;
                }
                if !buffer.insert(chunk.chunk_index, chunk.payload, now) {
                    self.stats.duplicate += 1;
                }
                self.check_size(now);
            }
            Some(buffer) if is_newer(chunk.frame_sequence_id, buffer.sequence_id) => {
                tracing::debug!(
                    "Frame {} superseded by {} ({}/{} chunks received)",
                    buffer.sequence_id,
                    chunk.frame_sequence_id,
                    buffer.received_count,
                    buffer.expected_total
                );
                self.stats.superseded += 1;
                self.start(chunk, now);
                self.check_size(now);
            }
            Some(_) => {
                self.stats.stale += 1;
                return None;
            }
            None => {
                let behind = self.floor.is_some_and(|(seq, at)| {
                    now.duration_since(at) < self.config.timeout
                        && !is_newer(chunk.frame_sequence_id, seq)
                });
                if behind {
                    self.stats.stale += 1;
                    return None;
                }
                self.start(chunk, now);
                self.check_size(now);
            }
        }

        self.complete(now)
    }

    /// Discard the partial frame if it has been idle for the timeout.
    ///
    /// Returns true if a frame was discarded.
    pub fn expire_idle(&mut self, now: Instant) -> bool {
        let idle = self
            .current
            .as_ref()
            .is_some_and(|b| now.duration_since(b.last_update) >= self.config.timeout);
        if !idle {
            return false;
        }

        if let Some(buffer) = self.current.take() {
            tracing::warn!(
                "Frame {} expired after {:?} ({}/{} chunks received)",
                buffer.sequence_id,
                now.duration_since(buffer.created_at),
                buffer.received_count,
                buffer.expected_total
            );
            self.floor = Some((buffer.sequence_id, buffer.last_update));
            self.stats.expired += 1;
        }
        true
    }

    fn start(&mut self, chunk: Chunk, now: Instant) {
        let mut buffer = ReassemblyBuffer::new(chunk.frame_sequence_id, chunk.total_chunks, now);
        buffer.insert(chunk.chunk_index, chunk.payload, now);
        self.current = Some(buffer);
    }

    /// Discard the partial frame once it holds more than the frame limit
    fn check_size(&mut self, now: Instant) {
        let limit = self.config.max_payload_bytes();
        let over = self.current.as_ref().is_some_and(|b| b.received_bytes > limit);
        if !over {
            return;
        }

        if let Some(buffer) = self.current.take() {
            tracing::warn!(
                "Dropping frame {}: {} bytes received exceeds limit of {}",
                buffer.sequence_id,
                buffer.received_bytes,
                limit
            );
            self.floor = Some((buffer.sequence_id, now));
            self.stats.oversized += 1;
        }
    }

    fn complete(&mut self, now: Instant) -> Option<Frame> {
        if !self.current.as_ref().is_some_and(ReassemblyBuffer::is_complete) {
            return None;
        }
        let buffer = self.current.take()?;
        let sequence_id = buffer.sequence_id;
        self.floor = Some((sequence_id, now));

        let payload = buffer.assemble();
        let decoded = match self.config.payload_format {
            PayloadFormat::Framed => decode_framed_bytes(payload, self.config.max_frame_bytes)
                .map_err(|e| e.to_string()),
            PayloadFormat::Bare(layout) => {
                Frame::new(layout, self.config.width, self.config.height, payload)
                    .map_err(|e| e.to_string())
            }
        };

        match decoded {
            Ok(frame) => {
                self.stats.completed += 1;
                Some(frame)
            }
            Err(e) => {
                tracing::warn!("Dropping reassembled frame {}: {}", sequence_id, e);
                self.stats.undecodable += 1;
                None
            }
        }
    }
}
