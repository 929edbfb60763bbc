//! Frame sources for the sender.

use crate::progress::StreamProgress;
use async_trait::async_trait;
use framelink_core::{Frame, FrameSource, PixelLayout, SourceError, SourceKind};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Live source producing a moving RGB gradient
pub struct TestPatternSource {
    width: u16,
    height: u16,
    tick: u8,
}

impl TestPatternSource {
    /// Create a generator for `width` x `height` frames
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (usize::from(self.width), usize::from(self.height));
        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                data.push((x * 255 / w.max(1)) as u8);
                data.push((y * 255 / h.max(1)) as u8);
                data.push(self.tick);
            }
        }
        data
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let data = self.render();
        self.tick = self.tick.wrapping_add(4);
        Frame::raw_rgb24(self.width, self.height, data)
            .map_err(|e| SourceError::Failed(e.to_string()))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }
}

/// Recorded frames read from disk, looped by the pump.
///
/// Raw RGB files hold back-to-back frames of exactly `width * height * 3`
/// bytes; a trailing partial frame is ignored. A JPEG file is a single
/// still frame.
pub struct RawFileSource {
    file: File,
    width: u16,
    height: u16,
    layout: PixelLayout,
    still_sent: bool,
}

impl RawFileSource {
    /// Open a frame file
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Failed` if the file cannot be opened.
    pub async fn open(
        path: impl AsRef<Path>,
        width: u16,
        height: u16,
        layout: PixelLayout,
    ) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .map_err(|e| SourceError::Failed(format!("{}: {e}", path.display())))?;

        Ok(Self {
            file,
            width,
            height,
            layout,
            still_sent: false,
        })
    }

    async fn next_raw(&mut self) -> Result<Frame, SourceError> {
        let size = usize::from(self.width) * usize::from(self.height) * 3;
        let mut data = vec![0u8; size];

        match self.file.read_exact(&mut data).await {
            Ok(_) => Frame::raw_rgb24(self.width, self.height, data)
                .map_err(|e| SourceError::Failed(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(SourceError::Exhausted)
            }
            Err(e) => Err(SourceError::Failed(e.to_string())),
        }
    }

    async fn next_still(&mut self) -> Result<Frame, SourceError> {
        if self.still_sent {
            return Err(SourceError::Exhausted);
        }

        let mut data = Vec::new();
        self.file
            .read_to_end(&mut data)
            .await
            .map_err(|e| SourceError::Failed(e.to_string()))?;
        if data.is_empty() {
            return Err(SourceError::Exhausted);
        }

        self.still_sent = true;
        Frame::encoded(self.width, self.height, data)
            .map_err(|e| SourceError::Failed(e.to_string()))
    }
}

#[async_trait]
impl FrameSource for RawFileSource {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        match self.layout {
            PixelLayout::RawRgb24 => self.next_raw().await,
            PixelLayout::EncodedJpeg => self.next_still().await,
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    async fn rewind(&mut self) -> Result<(), SourceError> {
        self.still_sent = false;
        self.file
            .seek(SeekFrom::Start(0))
            .await
            .map(|_| ())
            .map_err(|e| SourceError::Failed(e.to_string()))
    }
}

/// Source wrapper that counts produced frames on a progress display
pub struct ProgressSource<S> {
    inner: S,
    progress: StreamProgress,
}

impl<S> ProgressSource<S> {
    /// Wrap `inner`
    pub fn new(inner: S, progress: StreamProgress) -> Self {
        Self { inner, progress }
    }
}

#[async_trait]
impl<S: FrameSource> FrameSource for ProgressSource<S> {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let frame = self.inner.next_frame().await?;
        self.progress.record_frame(frame.payload().len());
        Ok(frame)
    }

    fn kind(&self) -> SourceKind {
        self.inner.kind()
    }

    async fn rewind(&mut self) -> Result<(), SourceError> {
        self.inner.rewind().await
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}
