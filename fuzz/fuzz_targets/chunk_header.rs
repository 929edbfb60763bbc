//! Fuzz target for datagram chunk headers
//!
//! Tests both header formats on arbitrary datagrams.

#![no_main]

use bytes::Bytes;
use framelink_core::{Chunk, ChunkDecoder, ChunkFormat, ChunkHeader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for format in [ChunkFormat::V1, ChunkFormat::Legacy] {
        if let Ok(header) = ChunkHeader::parse(data, format) {
            assert!(header.chunk_index < header.total_chunks);
        }
    }

    if let Ok(chunk) = Chunk::decode_v1(Bytes::copy_from_slice(data)) {
        assert_eq!(&chunk.encode(ChunkFormat::V1)[..], data);
    }

    let _ = ChunkDecoder::new(ChunkFormat::Legacy).decode(Bytes::copy_from_slice(data));
});
