//! Frame throughput statistics.

use super::{PumpExit, PumpReport};
use std::time::{Duration, Instant};

/// Frame and byte counters with periodic progress logging
#[derive(Debug, Clone)]
pub struct StreamStats {
    label: &'static str,
    report_every: u64,
    frames: u64,
    bytes: u64,
    dropped: u64,
    started: Instant,
    window_start: Instant,
    window_frames: u64,
}

impl StreamStats {
    /// Create counters; `report_every == 0` disables progress lines
    #[must_use]
    pub fn new(label: &'static str, report_every: u64) -> Self {
        let now = Instant::now();
        Self {
            label,
            report_every,
            frames: 0,
            bytes: 0,
            dropped: 0,
            started: now,
            window_start: now,
            window_frames: 0,
        }
    }

    /// Count one frame of `bytes` payload bytes
    pub fn record_frame(&mut self, bytes: usize) {
        self.frames += 1;
        self.bytes += bytes as u64;
        self.window_frames += 1;

        if self.report_every > 0 && self.frames % self.report_every == 0 {
            let window = self.window_start.elapsed().as_secs_f64();
            let fps = if window > 0.0 {
                self.window_frames as f64 / window
            } else {
                0.0
            };
            tracing::info!(
                "{}: {} frames, {:.1} fps, {} bytes",
                self.label,
                self.frames,
                fps,
                self.bytes
            );
            self.window_start = Instant::now();
            self.window_frames = 0;
        }
    }

    /// Count one dropped frame
    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    /// Count several dropped frames
    pub fn record_drops(&mut self, count: u64) {
        self.dropped += count;
    }

    /// Frames counted so far
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes counted so far
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Frames dropped so far
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Time since the counters were created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average frame rate since creation
    #[must_use]
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }

    /// Final report for a pump that stopped with `exit`
    #[must_use]
    pub fn report(&self, exit: PumpExit) -> PumpReport {
        let report = PumpReport {
            exit,
            frames: self.frames,
            bytes: self.bytes,
            dropped: self.dropped,
            elapsed: self.elapsed(),
        };
        tracing::info!(
            "{} finished ({:?}): {} frames, {} dropped, {} bytes in {:.2?} ({:.1} fps)",
            self.label,
            exit,
            report.frames,
            report.dropped,
            report.bytes,
            report.elapsed,
            report.fps()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = StreamStats::new("test", 2);
        stats.record_frame(100);
        stats.record_frame(50);
        stats.record_frame(10);
        stats.record_drop();
        stats.record_drops(2);

        assert_eq!(stats.frames(), 3);
        assert_eq!(stats.bytes(), 160);
        assert_eq!(stats.dropped(), 3);
        assert_eq!(stats.window_frames, 1);
    }

    #[test]
    fn test_report() {
        let mut stats = StreamStats::new("test", 0);
        stats.record_frame(8);
        let report = stats.report(PumpExit::PeerClosed);
        assert_eq!(report.exit, PumpExit::PeerClosed);
        assert_eq!(report.frames, 1);
        assert_eq!(report.bytes, 8);
        assert_eq!(stats.window_frames, 1);
    }
}
