// Pacing Module
// Server-side write pacing hints and the client-side display cadence.

use crate::mode::StreamMode;
use rand_distr::{Distribution, Normal};
use std::time::Duration;

/// Nominal delays the dispatcher inserts between writes.
///
/// These only make the stream look like a live one on the wire; the frame
/// sequence is identical whatever the values are.
#[derive(Debug, Clone)]
pub struct WritePacing {
    /// Mean delay after each chunk frame in milliseconds
    pub interval_mean_ms: u64,
    /// Standard deviation of the inter-chunk delay
    pub interval_stddev_ms: u64,
    /// Gap before a duplicate frame is resent
    pub duplicate_gap_ms: u64,
}

impl WritePacing {
    pub fn new(interval_mean_ms: u64, interval_stddev_ms: u64, duplicate_gap_ms: u64) -> Self {
        Self {
            interval_mean_ms,
            interval_stddev_ms,
            duplicate_gap_ms,
        }
    }

    /// Write everything back to back (what the production server does)
    pub fn burst() -> Self {
        Self {
            interval_mean_ms: 0,
            interval_stddev_ms: 0,
            duplicate_gap_ms: 50,
        }
    }

    /// No delays at all, not even before duplicates (for fast tests)
    pub fn instant() -> Self {
        Self {
            interval_mean_ms: 0,
            interval_stddev_ms: 0,
            duplicate_gap_ms: 0,
        }
    }

    /// Roughly one chunk every 100ms
    pub fn live() -> Self {
        Self {
            interval_mean_ms: 100,
            interval_stddev_ms: 20,
            duplicate_gap_ms: 50,
        }
    }

    /// Sample the delay after a chunk frame using a normal distribution
    pub fn sample_interval(&self) -> Duration {
        if self.interval_mean_ms == 0 {
            return Duration::ZERO;
        }

        let mut rng = rand::rng();
        let sample = if self.interval_stddev_ms > 0 {
            match Normal::new(
                self.interval_mean_ms as f64,
                self.interval_stddev_ms as f64,
            ) {
                // Ensure minimum of 1ms when mean is non-zero
                Ok(normal) => normal.sample(&mut rng).max(1.0) as u64,
                Err(_) => self.interval_mean_ms,
            }
        } else {
            self.interval_mean_ms
        };

        Duration::from_millis(sample)
    }

    pub fn duplicate_gap(&self) -> Duration {
        Duration::from_millis(self.duplicate_gap_ms)
    }
}

impl Default for WritePacing {
    fn default() -> Self {
        Self::burst()
    }
}

/// Release cadence of the client-side pacer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacerConfig {
    /// Interval between released chunks for every mode except `delay`
    pub normal_interval_ms: u64,
    /// Interval between released chunks in `delay` mode
    pub delay_interval_ms: u64,
}

impl PacerConfig {
    pub fn new(normal_interval_ms: u64, delay_interval_ms: u64) -> Self {
        Self {
            normal_interval_ms,
            delay_interval_ms,
        }
    }

    /// Very short cadence for tests
    pub fn fast() -> Self {
        Self {
            normal_interval_ms: 1,
            delay_interval_ms: 5,
        }
    }

    /// Release interval for a stream mode; zero is bumped to 1ms
    pub fn interval_for(&self, mode: StreamMode) -> Duration {
        let ms = match mode {
            StreamMode::Delay => self.delay_interval_ms,
            _ => self.normal_interval_ms,
        };
        Duration::from_millis(ms.max(1))
    }
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            normal_interval_ms: 30,
            delay_interval_ms: 300,
        }
    }
}
