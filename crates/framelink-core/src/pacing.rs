//! Fixed-interval frame pacing.
//!
//! The sender marks the start of each frame's work with [`Pacer::begin`] and
//! then sleeps for whatever is left of the frame interval. Work that overruns
//! the interval yields a zero sleep, never a negative one, and the overrun is
//! not paid back on later frames.

use std::time::Duration;
use tokio::time::Instant;

/// Longest frame interval; slower rates are clamped to it
pub const MAX_FRAME_INTERVAL: Duration = Duration::from_secs(3600);

/// Frame pacer
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    frame_start: Instant,
}

impl Pacer {
    /// Pace at `fps` frames per second; zero or negative disables pacing.
    ///
    /// Rates slower than one frame per [`MAX_FRAME_INTERVAL`] are clamped.
    #[must_use]
    pub fn new(fps: f64) -> Self {
        let interval = if fps.is_finite() && fps > 0.0 {
            Duration::try_from_secs_f64(1.0 / fps)
                .map_or(MAX_FRAME_INTERVAL, |d| d.min(MAX_FRAME_INTERVAL))
        } else {
            Duration::ZERO
        };
        Self::from_interval(interval)
    }

    /// Pace with an explicit frame interval
    #[must_use]
    pub fn from_interval(interval: Duration) -> Self {
        Self {
            interval,
            frame_start: Instant::now(),
        }
    }

    /// Frame interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true if pacing is disabled
    #[must_use]
    pub fn is_unpaced(&self) -> bool {
        self.interval.is_zero()
    }

    /// Mark the start of a frame's work
    pub fn begin(&mut self) {
        self.frame_start = Instant::now();
    }

    /// Remaining sleep for the current frame as of `now`
    #[must_use]
    pub fn delay_at(&self, now: Instant) -> Duration {
        self.interval
            .saturating_sub(now.saturating_duration_since(self.frame_start))
    }

    /// Remaining sleep for the current frame
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay_at(Instant::now())
    }

    /// Sleep out the rest of the current frame interval.
    ///
    /// Returns the time slept.
    pub async fn wait(&mut self) -> Duration {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_fps() {
        assert_eq!(Pacer::new(10.0).interval(), Duration::from_millis(100));
        assert_eq!(Pacer::new(40.0).interval(), Duration::from_millis(25));
        assert!(Pacer::new(0.0).is_unpaced());
        assert!(Pacer::new(-5.0).is_unpaced());
        assert!(Pacer::new(f64::NAN).is_unpaced());
    }

    #[test]
    fn test_slow_rates_clamped() {
        assert_eq!(Pacer::new(0.5).interval(), Duration::from_secs(2));
        assert_eq!(Pacer::new(1e-20).interval(), MAX_FRAME_INTERVAL);
        assert_eq!(Pacer::new(f64::MIN_POSITIVE).interval(), MAX_FRAME_INTERVAL);
        assert_eq!(Pacer::new(1e-6).interval(), MAX_FRAME_INTERVAL);
    }

    #[test]
    fn test_delay_subtracts_work() {
        let pacer = Pacer::from_interval(Duration::from_millis(100));
        let start = pacer.frame_start;

        assert_eq!(pacer.delay_at(start), Duration::from_millis(100));
        assert_eq!(
            pacer.delay_at(start + Duration::from_millis(30)),
            Duration::from_millis(70)
        );
    }

    #[test]
    fn test_delay_floors_at_zero() {
        let pacer = Pacer::from_interval(Duration::from_millis(100));
        let late = pacer.frame_start + Duration::from_millis(250);
        assert_eq!(pacer.delay_at(late), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_wait_sleeps_remaining_interval() {
        let mut pacer = Pacer::from_interval(Duration::from_millis(50));
        pacer.begin();
        let start = Instant::now();
        pacer.wait().await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(45), "slept {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "slept {elapsed:?}");
    }

    #[tokio::test]
    async fn test_unpaced_does_not_sleep() {
        let mut pacer = Pacer::new(0.0);
        pacer.begin();
        assert_eq!(pacer.wait().await, Duration::ZERO);
    }
}
