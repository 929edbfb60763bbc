//! Frame model and the explicit framing header.
//!
//! A [`Frame`] is an immutable pixel buffer plus its dimensions and layout.
//! The payload is a reference-counted [`Bytes`] so handing a frame from the
//! producer to the codec and on to the transport never copies pixel data.
//! All multi-byte header fields are big-endian (network byte order).

use crate::FRAME_HEADER_SIZE;
use crate::error::FrameError;
use bytes::Bytes;

/// Bytes per pixel for packed 24-bit RGB
pub const RGB24_BYTES_PER_PIXEL: usize = 3;

/// Byte size of a packed RGB24 frame with the given dimensions
#[must_use]
pub const fn rgb24_size(width: u16, height: u16) -> usize {
    width as usize * height as usize * RGB24_BYTES_PER_PIXEL
}

/// Pixel layout of a frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    /// Packed 8-bit RGB, row-major, no padding
    RawRgb24,
    /// JPEG (or other pre-encoded) image, opaque to the transport
    EncodedJpeg,
}

impl PixelLayout {
    /// Infer the layout of a framed packet from its header.
    ///
    /// The framed wire format does not carry a layout tag; a non-empty
    /// payload whose length is exactly `width * height * 3` is taken to be
    /// raw RGB. An empty payload carries no pixels and is always encoded, so
    /// a raw frame with a zero dimension decodes as [`Self::EncodedJpeg`].
    #[must_use]
    pub fn infer(header: &FrameHeader) -> Self {
        let len = header.payload_len();
        if len > 0 && len == rgb24_size(header.width, header.height) {
            Self::RawRgb24
        } else {
            Self::EncodedJpeg
        }
    }
}

/// Explicit per-frame header: `u32 byte_length, u16 width, u16 height`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes
    pub byte_length: u32,
    /// Frame width in pixels
    pub width: u16,
    /// Frame height in pixels
    pub height: u16,
}

impl FrameHeader {
    /// Parse a header from its 8-byte wire form
    #[must_use]
    pub fn from_bytes(bytes: [u8; FRAME_HEADER_SIZE]) -> Self {
        Self {
            byte_length: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            width: u16::from_be_bytes([bytes[4], bytes[5]]),
            height: u16::from_be_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Encode the header to its 8-byte wire form
    #[must_use]
    pub fn to_bytes(self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.byte_length.to_be_bytes());
        out[4..6].copy_from_slice(&self.width.to_be_bytes());
        out[6..8].copy_from_slice(&self.height.to_be_bytes());
        out
    }

    /// Payload length as `usize`
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.byte_length as usize
    }
}

/// An immutable video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    width: u16,
    height: u16,
    layout: PixelLayout,
}

impl Frame {
    /// Create a frame, checking the layout invariant.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::LayoutMismatch` if a raw RGB payload is not
    /// exactly `width * height * 3` bytes, and `FrameError::TooLarge` if the
    /// payload does not fit the 32-bit length field.
    pub fn new(
        layout: PixelLayout,
        width: u16,
        height: u16,
        data: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let data = data.into();

        if u32::try_from(data.len()).is_err() {
            return Err(FrameError::TooLarge(data.len()));
        }

        if layout == PixelLayout::RawRgb24 {
            let expected = rgb24_size(width, height);
            if data.len() != expected {
                return Err(FrameError::LayoutMismatch {
                    width,
                    height,
                    expected,
                    actual: data.len(),
                });
            }
        }

        Ok(Self {
            data,
            width,
            height,
            layout,
        })
    }

    /// Create a raw RGB24 frame
    ///
    /// # Errors
    ///
    /// Returns `FrameError::LayoutMismatch` if the payload size is wrong.
    pub fn raw_rgb24(width: u16, height: u16, data: impl Into<Bytes>) -> Result<Self, FrameError> {
        Self::new(PixelLayout::RawRgb24, width, height, data)
    }

    /// Create a pre-encoded (JPEG) frame
    ///
    /// # Errors
    ///
    /// Returns `FrameError::TooLarge` if the payload exceeds `u32::MAX` bytes.
    pub fn encoded(width: u16, height: u16, data: impl Into<Bytes>) -> Result<Self, FrameError> {
        Self::new(PixelLayout::EncodedJpeg, width, height, data)
    }

    /// Frame width in pixels (0 when unknown for encoded frames)
    #[must_use]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Frame height in pixels (0 when unknown for encoded frames)
    #[must_use]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Payload layout
    #[must_use]
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Payload length in bytes
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn byte_length(&self) -> u32 {
        // Checked in `new`
        self.data.len() as u32
    }

    /// Payload bytes (zero-copy)
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.data
    }

    /// Consume the frame, returning its payload
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.data
    }

    /// Header describing this frame on the framed wire format
    #[must_use]
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            byte_length: self.byte_length(),
            width: self.width,
            height: self.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader {
            byte_length: 230_400,
            width: 320,
            height: 240,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes, [0x00, 0x03, 0x84, 0x00, 0x01, 0x40, 0x00, 0xF0]);
        assert_eq!(FrameHeader::from_bytes(bytes), header);
    }

    #[test]
    fn test_raw_frame_size_invariant() {
        let frame = Frame::raw_rgb24(4, 2, vec![0u8; 24]).unwrap();
        assert_eq!(frame.byte_length(), 24);
        assert_eq!(frame.layout(), PixelLayout::RawRgb24);

        let err = Frame::raw_rgb24(4, 2, vec![0u8; 23]).unwrap_err();
        assert_eq!(
            err,
            FrameError::LayoutMismatch {
                width: 4,
                height: 2,
                expected: 24,
                actual: 23
            }
        );
    }

    #[test]
    fn test_encoded_frame_any_size() {
        let frame = Frame::encoded(640, 480, vec![0xFF, 0xD8, 0xFF]).unwrap();
        assert_eq!(frame.byte_length(), 3);
        assert_eq!(frame.layout(), PixelLayout::EncodedJpeg);
        assert_eq!(frame.header().width, 640);
    }

    #[test]
    fn test_layout_inference() {
        let raw = FrameHeader {
            byte_length: 24,
            width: 4,
            height: 2,
        };
        assert_eq!(PixelLayout::infer(&raw), PixelLayout::RawRgb24);

        let jpeg = FrameHeader {
            byte_length: 1000,
            width: 320,
            height: 240,
        };
        assert_eq!(PixelLayout::infer(&jpeg), PixelLayout::EncodedJpeg);

        let empty = FrameHeader {
            byte_length: 0,
            width: 0,
            height: 0,
        };
        assert_eq!(PixelLayout::infer(&empty), PixelLayout::EncodedJpeg);
    }

    #[test]
    fn test_empty_raw_frame() {
        let frame = Frame::raw_rgb24(0, 0, Bytes::new()).unwrap();
        assert_eq!(frame.byte_length(), 0);
    }
}
