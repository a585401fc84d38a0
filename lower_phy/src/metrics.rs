//! Signal Metrics Aggregation

use common::power_to_db;
use interfaces::AmplitudeMetrics;

/// Clipping statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClippingCount {
    /// Number of clipped samples
    pub nof_clipped: u64,
    /// Number of processed samples
    pub nof_processed: u64,
}

impl ClippingCount {
    /// Fraction of processed samples that were clipped
    pub fn ratio(&self) -> f64 {
        if self.nof_processed == 0 {
            return 0.0;
        }
        self.nof_clipped as f64 / self.nof_processed as f64
    }
}

/// Power and clipping metrics of a block of baseband samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasebandMetrics {
    /// Mean sample power
    pub avg_power: f32,
    /// Peak sample power
    pub peak_power: f32,
    /// Clipping statistics, present only when clipping is enabled
    pub clipping: Option<ClippingCount>,
}

impl BasebandMetrics {
    /// Mean power in dB relative to unit power
    pub fn avg_power_db(&self) -> f32 {
        power_to_db(self.avg_power)
    }

    /// Peak to average power ratio in dB
    pub fn papr_db(&self) -> f32 {
        power_to_db(self.peak_power / self.avg_power)
    }
}

/// Metrics of one modulated slot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SlotModulationMetrics {
    /// Aggregate over the units that produced valid power measurements
    pub signal: Option<BasebandMetrics>,
    /// Number of (symbol, port) units that contributed to `signal`
    pub nof_measured_units: usize,
    /// Number of units zero-filled because the executor refused them
    pub nof_dropped_units: usize,
}

/// Accumulates amplitude controller metrics over several blocks
#[derive(Debug, Default)]
pub(crate) struct PowerAccumulator {
    sum_power: f64,
    nof_samples: u64,
    peak_power: f32,
    nof_clipped: u64,
    clipping_enabled: bool,
    nof_blocks: usize,
}

impl PowerAccumulator {
    /// Add the metrics of one block. Blocks without a normal power measurement are ignored.
    pub(crate) fn add(&mut self, metrics: &AmplitudeMetrics) -> bool {
        if !metrics.avg_power.is_normal() || !metrics.peak_power.is_normal() {
            return false;
        }
        self.sum_power += metrics.avg_power as f64 * metrics.nof_processed_samples as f64;
        self.nof_samples += metrics.nof_processed_samples;
        self.peak_power = self.peak_power.max(metrics.peak_power);
        self.nof_clipped += metrics.nof_clipped_samples;
        self.clipping_enabled |= metrics.clipping_enabled;
        self.nof_blocks += 1;
        true
    }

    /// Number of blocks accepted so far
    pub(crate) fn nof_blocks(&self) -> usize {
        self.nof_blocks
    }

    /// Aggregated metrics, or `None` if no valid block was added
    pub(crate) fn finish(&self) -> Option<BasebandMetrics> {
        if self.nof_samples == 0 {
            return None;
        }
        Some(BasebandMetrics {
            avg_power: (self.sum_power / self.nof_samples as f64) as f32,
            peak_power: self.peak_power,
            clipping: self.clipping_enabled.then_some(ClippingCount {
                nof_clipped: self.nof_clipped,
                nof_processed: self.nof_samples,
            }),
        })
    }
}
