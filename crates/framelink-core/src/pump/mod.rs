//! Steady-state frame pumps.
//!
//! A pump owns one side of a streaming session and moves frames until it is
//! told to stop or the session ends. There are four:
//!
//! - [`SendPump`]: source -> codec -> stream connection
//! - [`ReceivePump`]: stream connection -> codec -> sink
//! - [`DatagramSendPump`]: source -> chunker -> datagram socket
//! - [`DatagramReceivePump`]: datagram socket -> reassembler -> sink
//!
//! Errors in the steady state never escape a pump; they end it with a
//! [`PumpExit`]. Whatever the exit path, the pump closes its source or sink
//! and its transport before returning.

mod datagram;
mod shutdown;
mod stats;
mod stream;

pub use datagram::{DatagramConfig, DatagramReceivePump, DatagramSendPump};
pub use shutdown::{Shutdown, ShutdownHandle};
pub use stats::StreamStats;
pub use stream::{ReceivePump, SendPump};

use crate::codec::FrameCodec;
use crate::error::{SinkError, SourceError};
use crate::frame::Frame;
use async_trait::async_trait;
use std::time::Duration;

/// What a source does when it has no frame ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Live capture: retry after a short pause
    Live,
    /// Recorded file: rewind and loop
    File,
}

/// Frame producer (camera, file, generator)
#[async_trait]
pub trait FrameSource: Send {
    /// Produce the next frame.
    ///
    /// Returns `SourceError::Exhausted` when no frame is available right
    /// now (end of file, or nothing captured yet).
    async fn next_frame(&mut self) -> Result<Frame, SourceError>;

    /// How exhaustion should be handled
    fn kind(&self) -> SourceKind;

    /// Restart from the beginning (file sources)
    async fn rewind(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Release the underlying device or file
    async fn close(&mut self) {}
}

/// Frame consumer (display, recorder, statistics)
#[async_trait]
pub trait FrameSink: Send {
    /// Consume one frame.
    ///
    /// Returning `SinkError::Closed` ends the receiving pump cleanly.
    async fn deliver(&mut self, frame: Frame) -> Result<(), SinkError>;

    /// Release the underlying window or device
    async fn close(&mut self) {}
}

/// Reaction of the receive pump to a fixed-size framing desync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DesyncPolicy {
    /// Log, count the frame as dropped and keep reading
    #[default]
    DropAndContinue,
    /// End the session
    Fatal,
}

/// Pump configuration
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Target frame rate for senders; zero disables pacing
    pub fps: f64,
    /// Stream wire format
    pub codec: FrameCodec,
    /// Pause before asking an exhausted live source again
    pub idle_retry: Duration,
    /// Frames between progress log lines; zero disables them
    pub report_every: u64,
    /// Reaction to a fixed-size framing desync
    pub desync_policy: DesyncPolicy,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            codec: FrameCodec::default(),
            idle_retry: Duration::from_millis(50),
            report_every: 30,
            desync_policy: DesyncPolicy::default(),
        }
    }
}

/// Why a pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// Shutdown was requested
    Stopped,
    /// Peer closed or reset the connection
    PeerClosed,
    /// Source failed irrecoverably
    SourceFailed,
    /// Sink stopped accepting frames
    SinkClosed,
    /// Transport failed or framing could not be recovered
    TransportLost,
}

impl PumpExit {
    /// Returns true for exits that are part of normal operation
    #[must_use]
    pub fn is_clean(self) -> bool {
        matches!(self, Self::Stopped | Self::PeerClosed | Self::SinkClosed)
    }
}

/// Summary returned by every pump
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpReport {
    /// Why the pump stopped
    pub exit: PumpExit,
    /// Frames sent or delivered
    pub frames: u64,
    /// Payload bytes sent or received
    pub bytes: u64,
    /// Frames dropped (bad size, lost chunks, desync)
    pub dropped: u64,
    /// Time the pump ran
    pub elapsed: Duration,
}

impl PumpReport {
    /// Average frame rate over the run
    #[must_use]
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Source that yields a fixed list of frames, then a configurable end
    pub struct VecSource {
        frames: Vec<Frame>,
        queue: VecDeque<Frame>,
        kind: SourceKind,
        fail_when_empty: bool,
        pub rewinds: Arc<Mutex<u32>>,
        pub closed: Arc<Mutex<bool>>,
    }

    impl VecSource {
        pub fn new(frames: Vec<Frame>, kind: SourceKind) -> Self {
            Self {
                queue: frames.iter().cloned().collect(),
                frames,
                kind,
                fail_when_empty: false,
                rewinds: Arc::new(Mutex::new(0)),
                closed: Arc::new(Mutex::new(false)),
            }
        }

        /// Report `SourceError::Failed` once the frames run out
        pub fn failing_when_empty(mut self) -> Self {
            self.fail_when_empty = true;
            self
        }
    }

    #[async_trait]
    impl FrameSource for VecSource {
        async fn next_frame(&mut self) -> Result<Frame, SourceError> {
            match self.queue.pop_front() {
                Some(frame) => Ok(frame),
                None if self.fail_when_empty => Err(SourceError::Failed("done".to_string())),
                None => Err(SourceError::Exhausted),
            }
        }

        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn rewind(&mut self) -> Result<(), SourceError> {
            *self.rewinds.lock().unwrap() += 1;
            self.queue = self.frames.iter().cloned().collect();
            Ok(())
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    /// Sink that records frames and closes after an optional limit
    #[derive(Clone, Default)]
    pub struct CollectSink {
        pub frames: Arc<Mutex<Vec<Frame>>>,
        pub closed: Arc<Mutex<bool>>,
        limit: Option<usize>,
    }

    impl CollectSink {
        pub fn with_limit(limit: usize) -> Self {
            Self {
                limit: Some(limit),
                ..Default::default()
            }
        }

        pub fn received(&self) -> Vec<Frame> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FrameSink for CollectSink {
        async fn deliver(&mut self, frame: Frame) -> Result<(), SinkError> {
            let mut frames = self.frames.lock().unwrap();
            frames.push(frame);
            if self.limit.is_some_and(|limit| frames.len() >= limit) {
                return Err(SinkError::Closed);
            }
            Ok(())
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    pub fn frames(count: usize) -> Vec<Frame> {
        (0..count)
            .map(|i| Frame::raw_rgb24(4, 2, vec![i as u8; 24]).unwrap())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_fps() {
        let report = PumpReport {
            exit: PumpExit::Stopped,
            frames: 60,
            bytes: 0,
            dropped: 0,
            elapsed: Duration::from_secs(2),
        };
        assert!((report.fps() - 30.0).abs() < f64::EPSILON);

        let instant = PumpReport {
            elapsed: Duration::ZERO,
            ..report
        };
        assert_eq!(instant.fps(), 0.0);
    }

    #[test]
    fn test_exit_cleanliness() {
        assert!(PumpExit::Stopped.is_clean());
        assert!(PumpExit::PeerClosed.is_clean());
        assert!(!PumpExit::SourceFailed.is_clean());
        assert!(!PumpExit::TransportLost.is_clean());
    }
}
