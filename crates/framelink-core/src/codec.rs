//! Wire codecs for the stream transport.
//!
//! Two formats are supported:
//!
//! - **Framed**: every frame is preceded by an 8-byte [`FrameHeader`]
//!   (`u32 byte_length, u16 width, u16 height`, big-endian). Frames are
//!   self-describing and any size is allowed, including zero.
//! - **Fixed**: raw `width * height * 3` bytes per frame with no header. The
//!   size is agreed out-of-band and never changes during a session, so a
//!   short read cannot be recovered from.

use crate::FRAME_HEADER_SIZE;
use crate::error::CodecError;
use crate::frame::{Frame, FrameHeader, PixelLayout, rgb24_size};
use bytes::{BufMut, Bytes, BytesMut};
use framelink_transport::{StreamConnection, TransportError};
use tokio::io::{AsyncRead, AsyncWrite};

/// Default upper bound on the payload a framed header may announce (64 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Encode a frame as header + payload.
#[must_use]
pub fn encode_framed(frame: &Frame) -> Bytes {
    let payload = frame.payload();
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_slice(&frame.header().to_bytes());
    buf.put_slice(payload);
    buf.freeze()
}

fn check_frame_len(header: &FrameHeader, max_frame_bytes: usize) -> Result<(), CodecError> {
    if header.payload_len() > max_frame_bytes {
        return Err(CodecError::FrameTooLarge {
            length: header.payload_len(),
            limit: max_frame_bytes,
        });
    }
    Ok(())
}

/// Read one framed packet from the connection.
///
/// The header is read in full before the payload is interpreted; the payload
/// is then read in full. Truncation counts in the returned error cover the
/// header bytes as well.
///
/// # Errors
///
/// - `CodecError::TruncatedStream` if the peer closes before the frame is
///   complete (never a short frame)
/// - `CodecError::FrameTooLarge` if the header announces more than
///   `max_frame_bytes`
/// - `CodecError::Transport` for any other transport failure
pub async fn decode_framed<S>(
    conn: &mut StreamConnection<S>,
    max_frame_bytes: usize,
) -> Result<Frame, CodecError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut raw = [0u8; FRAME_HEADER_SIZE];
    conn.read_into(&mut raw).await?;
    let header = FrameHeader::from_bytes(raw);
    check_frame_len(&header, max_frame_bytes)?;

    let payload = match conn.read_exact(header.payload_len()).await {
        Ok(payload) => payload,
        Err(TransportError::Truncated { expected, received }) => {
            return Err(CodecError::TruncatedStream {
                expected: FRAME_HEADER_SIZE + expected,
                received: FRAME_HEADER_SIZE + received,
            });
        }
        Err(e) => return Err(e.into()),
    };

    let layout = PixelLayout::infer(&header);
    Ok(Frame::new(layout, header.width, header.height, payload)?)
}

/// Parse a complete framed packet held in memory.
///
/// Used for reassembled datagram payloads, where the whole packet is already
/// present.
///
/// # Errors
///
/// Returns `CodecError::TruncatedStream` if the buffer is shorter than the
/// header and `CodecError::LengthMismatch` if the payload length disagrees
/// with the header.
pub fn decode_framed_bytes(data: Bytes, max_frame_bytes: usize) -> Result<Frame, CodecError> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(CodecError::TruncatedStream {
            expected: FRAME_HEADER_SIZE,
            received: data.len(),
        });
    }

    let mut raw = [0u8; FRAME_HEADER_SIZE];
    raw.copy_from_slice(&data[..FRAME_HEADER_SIZE]);
    let header = FrameHeader::from_bytes(raw);
    check_frame_len(&header, max_frame_bytes)?;

    let payload = data.slice(FRAME_HEADER_SIZE..);
    if payload.len() != header.payload_len() {
        return Err(CodecError::LengthMismatch {
            declared: header.payload_len(),
            actual: payload.len(),
        });
    }

    let layout = PixelLayout::infer(&header);
    Ok(Frame::new(layout, header.width, header.height, payload)?)
}

/// Out-of-band agreed dimensions for the fixed-size format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFormat {
    /// Frame width in pixels
    pub width: u16,
    /// Frame height in pixels
    pub height: u16,
}

impl FixedFormat {
    /// Create a new fixed format
    #[must_use]
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Bytes per frame (`width * height * 3`)
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        rgb24_size(self.width, self.height)
    }
}

/// Encode a frame for the fixed-size format (payload only, zero-copy).
///
/// # Errors
///
/// Returns `CodecError::FrameSizeMismatch` if the payload is not exactly the
/// configured frame size.
pub fn encode_fixed(frame: &Frame, format: FixedFormat) -> Result<Bytes, CodecError> {
    let expected = format.frame_size();
    let actual = frame.payload().len();
    if actual != expected {
        return Err(CodecError::FrameSizeMismatch { expected, actual });
    }
    Ok(frame.payload().clone())
}

/// Read one fixed-size frame.
///
/// # Errors
///
/// - `CodecError::TruncatedStream` with `received == 0` if the peer closed
///   cleanly on a frame boundary
/// - `CodecError::FrameSizeMismatch` if the peer closed part-way through a
///   frame (framing desync)
/// - `CodecError::Transport` for any other transport failure
pub async fn decode_fixed<S>(
    conn: &mut StreamConnection<S>,
    format: FixedFormat,
) -> Result<Frame, CodecError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let expected = format.frame_size();
    match conn.read_exact(expected).await {
        Ok(payload) => Ok(Frame::raw_rgb24(format.width, format.height, payload)?),
        Err(TransportError::Truncated { received: 0, .. }) => Err(CodecError::TruncatedStream {
            expected,
            received: 0,
        }),
        Err(TransportError::Truncated { received, .. }) => Err(CodecError::FrameSizeMismatch {
            expected,
            actual: received,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Runtime selection of the stream wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCodec {
    /// Header-prefixed frames
    Framed {
        /// Largest payload a header may announce
        max_frame_bytes: usize,
    },
    /// Headerless fixed-size raw frames
    Fixed(FixedFormat),
}

impl FrameCodec {
    /// Framed codec with the default size limit
    #[must_use]
    pub const fn framed() -> Self {
        Self::Framed {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Fixed-size codec for the given dimensions
    #[must_use]
    pub const fn fixed(width: u16, height: u16) -> Self {
        Self::Fixed(FixedFormat::new(width, height))
    }

    /// Encode one frame
    ///
    /// # Errors
    ///
    /// Returns `CodecError::FrameSizeMismatch` for a wrongly sized frame on
    /// the fixed format.
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, CodecError> {
        match self {
            Self::Framed { .. } => Ok(encode_framed(frame)),
            Self::Fixed(format) => encode_fixed(frame, *format),
        }
    }

    /// Decode one frame from the connection
    ///
    /// # Errors
    ///
    /// See [`decode_framed`] and [`decode_fixed`].
    pub async fn decode<S>(&self, conn: &mut StreamConnection<S>) -> Result<Frame, CodecError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match self {
            Self::Framed { max_frame_bytes } => decode_framed(conn, *max_frame_bytes).await,
            Self::Fixed(format) => decode_fixed(conn, *format).await,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::framed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};

    fn pipe() -> (StreamConnection<DuplexStream>, StreamConnection<DuplexStream>) {
        let (a, b) = duplex(256 * 1024);
        (
            StreamConnection::from_stream(a, None),
            StreamConnection::from_stream(b, None),
        )
    }

    fn test_frame(width: u16, height: u16) -> Frame {
        let data: Vec<u8> = (0..rgb24_size(width, height))
            .map(|i| (i % 251) as u8)
            .collect();
        Frame::raw_rgb24(width, height, data).unwrap()
    }

    #[test]
    fn test_encode_framed_layout() {
        let frame = test_frame(2, 2);
        let encoded = encode_framed(&frame);
        assert_eq!(encoded.len(), FRAME_HEADER_SIZE + 12);
        assert_eq!(&encoded[..4], &12u32.to_be_bytes());
        assert_eq!(&encoded[4..6], &2u16.to_be_bytes());
        assert_eq!(&encoded[6..8], &2u16.to_be_bytes());
        assert_eq!(&encoded[8..], &frame.payload()[..]);
    }

    #[tokio::test]
    async fn test_framed_roundtrip() {
        let (mut tx, mut rx) = pipe();
        let frame = test_frame(32, 24);

        tx.send_all(&encode_framed(&frame)).await.unwrap();
        let decoded = decode_framed(&mut rx, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn test_framed_empty_frame() {
        let (mut tx, mut rx) = pipe();
        let frame = Frame::encoded(0, 0, Bytes::new()).unwrap();

        tx.send_all(&encode_framed(&frame)).await.unwrap();
        let decoded = decode_framed(&mut rx, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.layout(), PixelLayout::EncodedJpeg);
    }

    #[tokio::test]
    async fn test_framed_truncated_payload() {
        let (mut tx, mut rx) = pipe();
        let header = FrameHeader {
            byte_length: 100,
            width: 10,
            height: 10,
        };
        tx.send_all(&header.to_bytes()).await.unwrap();
        tx.send_all(&[0xAB; 10]).await.unwrap();
        tx.close().await.unwrap();

        let err = decode_framed(&mut rx, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::TruncatedStream {
                expected: 108,
                received: 18
            }
        ));
        assert!(!err.is_clean_close());
    }

    #[tokio::test]
    async fn test_framed_truncated_header() {
        let (mut tx, mut rx) = pipe();
        tx.send_all(&[0, 0, 0]).await.unwrap();
        tx.close().await.unwrap();

        let err = decode_framed(&mut rx, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::TruncatedStream {
                expected: 8,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_framed_clean_close() {
        let (mut tx, mut rx) = pipe();
        tx.close().await.unwrap();

        let err = decode_framed(&mut rx, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap_err();
        assert!(err.is_clean_close());
    }

    #[tokio::test]
    async fn test_framed_rejects_oversized_header() {
        let (mut tx, mut rx) = pipe();
        let header = FrameHeader {
            byte_length: u32::MAX,
            width: 1,
            height: 1,
        };
        tx.send_all(&header.to_bytes()).await.unwrap();

        let err = decode_framed(&mut rx, 1024).await.unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { limit: 1024, .. }));
    }

    #[test]
    fn test_decode_framed_bytes() {
        let frame = Frame::encoded(320, 240, vec![1, 2, 3, 4, 5]).unwrap();
        let decoded = decode_framed_bytes(encode_framed(&frame), DEFAULT_MAX_FRAME_BYTES).unwrap();
        assert_eq!(decoded, frame);

        let mut short = encode_framed(&frame).to_vec();
        short.pop();
        let err = decode_framed_bytes(Bytes::from(short), DEFAULT_MAX_FRAME_BYTES).unwrap_err();
        assert!(matches!(
            err,
            CodecError::LengthMismatch {
                declared: 5,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_fixed_roundtrip() {
        let (mut tx, mut rx) = pipe();
        let format = FixedFormat::new(8, 6);
        let frame = test_frame(8, 6);

        let encoded = encode_fixed(&frame, format).unwrap();
        assert_eq!(encoded.len(), format.frame_size());
        tx.send_all(&encoded).await.unwrap();

        let decoded = decode_fixed(&mut rx, format).await.unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_fixed_rejects_wrong_size() {
        let frame = test_frame(4, 4);
        let err = encode_fixed(&frame, FixedFormat::new(8, 8)).unwrap_err();
        assert!(matches!(
            err,
            CodecError::FrameSizeMismatch {
                expected: 192,
                actual: 48
            }
        ));
    }

    #[tokio::test]
    async fn test_fixed_short_read_is_desync() {
        let (mut tx, mut rx) = pipe();
        let format = FixedFormat::new(4, 4);
        tx.send_all(&[0u8; 20]).await.unwrap();
        tx.close().await.unwrap();

        let err = decode_fixed(&mut rx, format).await.unwrap_err();
        assert!(matches!(
            err,
            CodecError::FrameSizeMismatch {
                expected: 48,
                actual: 20
            }
        ));
    }

    #[tokio::test]
    async fn test_fixed_clean_close() {
        let (mut tx, mut rx) = pipe();
        tx.close().await.unwrap();

        let err = decode_fixed(&mut rx, FixedFormat::new(4, 4))
            .await
            .unwrap_err();
        assert!(err.is_clean_close());
    }

    #[tokio::test]
    async fn test_codec_dispatch() {
        let (mut tx, mut rx) = pipe();
        let frame = test_frame(4, 3);

        for codec in [FrameCodec::framed(), FrameCodec::fixed(4, 3)] {
            tx.send_all(&codec.encode(&frame).unwrap()).await.unwrap();
            let decoded = codec.decode(&mut rx).await.unwrap();
            assert_eq!(decoded, frame);
        }
    }
}
