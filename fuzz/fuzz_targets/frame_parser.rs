//! Fuzz target for framed packet parsing
//!
//! The framed decoder must reject malformed packets without panicking and
//! never accept a packet whose length disagrees with its header.

#![no_main]

use bytes::Bytes;
use framelink_core::{FRAME_HEADER_SIZE, decode_framed_bytes, encode_framed};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = decode_framed_bytes(Bytes::copy_from_slice(data), 1 << 20) {
        assert_eq!(data.len(), FRAME_HEADER_SIZE + frame.payload().len());

        // Re-encoding a decoded frame reproduces the input
        assert_eq!(&encode_framed(&frame)[..], data);
    }
});
