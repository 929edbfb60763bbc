//! Fuzz target for frame reassembly
//!
//! Feeds an arbitrary datagram stream through the chunk decoder and the
//! reassembler. Nothing may panic, and every delivered frame must respect
//! the configured size limit.

#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use framelink_core::{
    ChunkDecoder, ChunkFormat, PayloadFormat, PixelLayout, ReassemblyConfig, Reassembler,
};
use libfuzzer_sys::fuzz_target;
use std::time::{Duration, Instant};

#[derive(Debug, Arbitrary)]
struct ReassemblyInput {
    legacy: bool,
    bare: bool,
    datagrams: Vec<(u16, Vec<u8>)>,
}

const MAX_FRAME_BYTES: usize = 1 << 16;

fuzz_target!(|input: ReassemblyInput| {
    let format = if input.legacy {
        ChunkFormat::Legacy
    } else {
        ChunkFormat::V1
    };
    let payload_format = if input.bare {
        PayloadFormat::Bare(PixelLayout::EncodedJpeg)
    } else {
        PayloadFormat::Framed
    };

    let mut decoder = ChunkDecoder::new(format);
    let mut reassembler = Reassembler::new(ReassemblyConfig {
        payload_format,
        max_frame_bytes: MAX_FRAME_BYTES,
        ..Default::default()
    });

    // Each datagram arrives a fuzzed number of milliseconds after the last
    let mut now = Instant::now();
    for (delay_ms, datagram) in input.datagrams {
        now += Duration::from_millis(u64::from(delay_ms));
        reassembler.expire_idle(now);

        if let Ok(chunk) = decoder.decode(Bytes::from(datagram)) {
            if let Some(frame) = reassembler.ingest_at(chunk, now) {
                assert!(frame.payload().len() <= MAX_FRAME_BYTES);
            }
        }
    }
});
