//! Amplitude Controller Interface

use num_complex::Complex32;

/// Signal measurements taken by an amplitude controller over one block
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AmplitudeMetrics {
    /// Mean power of the output samples
    pub avg_power: f32,
    /// Peak power of the output samples
    pub peak_power: f32,
    /// Number of samples that were clipped
    pub nof_clipped_samples: u64,
    /// Number of samples processed
    pub nof_processed_samples: u64,
    /// Whether clipping was active while processing
    pub clipping_enabled: bool,
}

/// Scales and limits baseband samples in place
pub trait AmplitudeController: Send + Sync {
    /// Process a block in place and report its metrics
    fn process(&self, samples: &mut [Complex32]) -> AmplitudeMetrics;
}
