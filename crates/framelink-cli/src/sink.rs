//! Frame sinks for the receiver.

use crate::progress::StreamProgress;
use async_trait::async_trait;
use framelink_core::{Frame, FrameSink, SinkError};

/// Sink that counts received frames, optionally stopping after a limit
pub struct StatsSink {
    progress: StreamProgress,
    limit: Option<u64>,
    last: Option<(u16, u16, usize)>,
}

impl StatsSink {
    /// Create a sink reporting to `progress`
    #[must_use]
    pub fn new(progress: StreamProgress, limit: Option<u64>) -> Self {
        Self {
            progress,
            limit,
            last: None,
        }
    }
}

#[async_trait]
impl FrameSink for StatsSink {
    async fn deliver(&mut self, frame: Frame) -> Result<(), SinkError> {
        let shape = (frame.width(), frame.height(), frame.payload().len());
        if self.last.is_some_and(|(w, h, _)| (w, h) != (shape.0, shape.1)) {
            tracing::info!("Frame size changed to {}x{}", shape.0, shape.1);
        }
        self.last = Some(shape);
        self.progress.record_frame(shape.2);

        if self.limit.is_some_and(|limit| self.progress.frames() >= limit) {
            return Err(SinkError::Closed);
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some((w, h, len)) = self.last {
            tracing::debug!("Last frame: {}x{}, {} bytes", w, h, len);
        }
    }
}
