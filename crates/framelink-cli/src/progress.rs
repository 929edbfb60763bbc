//! Live stream progress display.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Frame counter shown as a spinner line
#[derive(Clone)]
pub struct StreamProgress {
    bar: ProgressBar,
    started: Instant,
}

impl StreamProgress {
    /// Create a spinner labelled with the stream direction
    #[must_use]
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        Self::with_bar(bar, label)
    }

    /// Create a progress tracker that draws nothing
    #[must_use]
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden(), "")
    }

    fn with_bar(bar: ProgressBar, label: &str) -> Self {
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {prefix} {pos} frames {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));

        Self {
            bar,
            started: Instant::now(),
        }
    }

    /// Count one frame of `bytes` payload bytes
    pub fn record_frame(&self, bytes: usize) {
        self.bar.inc(1);
        let total = self.bytes() + bytes as u64;
        self.bar.set_length(total);

        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.bar.set_message(format!(
                "({:.1} fps, {}, {})",
                self.bar.position() as f64 / elapsed,
                format_bytes(total),
                format_speed(total as f64 / elapsed)
            ));
        }
    }

    /// Frames counted so far
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.bar.position()
    }

    /// Payload bytes counted so far
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bar.length().unwrap_or(0)
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the spinner (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format speed in human-readable format (bytes/sec)
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}.{}s", secs, duration.subsec_millis() / 100)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
