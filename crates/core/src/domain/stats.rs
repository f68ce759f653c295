//! Running loudness statistics
//!
//! Tracks the mean level and mean absolute deviation of a play session
//! incrementally, without keeping the sample history. The statistics feed
//! the display and the gate's automatic threshold.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// One measurement tick as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Instantaneous level
    pub level: f32,
    /// Mean level so far, including this sample
    pub average_level: f32,
    /// `|level - average_level|` for this sample
    pub deviation: f32,
    /// Mean of all per-sample deviations so far
    pub average_deviation: f32,
}

impl Measurement {
    /// Relative spread of the signal; `None` while the average is zero
    pub fn deviation_per_level(&self) -> Option<f32> {
        if self.average_level == 0.0 {
            None
        } else {
            Some(self.average_deviation / self.average_level)
        }
    }

    /// Threshold that sits `factor` mean deviations below the mean level
    pub fn suggested_threshold(&self, factor: f32) -> f32 {
        self.average_level - factor * self.average_deviation
    }
}

/// Incremental mean and mean-absolute-deviation of loudness
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    count: u64,
    mean_level: f32,
    mean_deviation: f32,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every sample; called when a play session starts
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold one level sample into the statistics
    pub fn record(&mut self, level: f32) -> Measurement {
        let n = self.count as f32;
        self.mean_level = (self.mean_level * n + level) / (n + 1.0);
        let deviation = (level - self.mean_level).abs();
        self.mean_deviation = (self.mean_deviation * n + deviation) / (n + 1.0);
        self.count += 1;

        trace!(
            count = self.count,
            level,
            mean = self.mean_level,
            mean_deviation = self.mean_deviation,
            "Stats updated"
        );

        Measurement {
            level,
            average_level: self.mean_level,
            deviation,
            average_deviation: self.mean_deviation,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean_level(&self) -> f32 {
        self.mean_level
    }

    pub fn mean_deviation(&self) -> f32 {
        self.mean_deviation
    }
}
