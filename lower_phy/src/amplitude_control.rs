//! Amplitude Gain and Clipping
//!
//! Applies a linear gain to baseband samples and optionally limits their magnitude to a
//! ceiling relative to full scale, measuring power before returning.

use crate::config::AmplitudeControlConfig;
use common::{ceiling_from_dbfs, db_to_amplitude};
use interfaces::{AmplitudeController, AmplitudeMetrics};
use num_complex::Complex32;
use tracing::debug;

/// Gain and clipping amplitude controller
#[derive(Debug, Clone)]
pub struct AmplitudeClipper {
    gain: f32,
    ceiling: f32,
    clipping_enabled: bool,
}

impl AmplitudeClipper {
    /// Create a controller from its configuration
    pub fn new(config: &AmplitudeControlConfig) -> Self {
        let gain = db_to_amplitude(config.gain_db);
        let ceiling = ceiling_from_dbfs(config.ceiling_dbfs, config.full_scale_amplitude);
        debug!(
            "Amplitude controller: gain={:.1} dB, ceiling={:.1} dBFS, clipping={}",
            config.gain_db, config.ceiling_dbfs, config.enable_clipping
        );
        Self {
            gain,
            ceiling,
            clipping_enabled: config.enable_clipping,
        }
    }
}

impl AmplitudeController for AmplitudeClipper {
    fn process(&self, samples: &mut [Complex32]) -> AmplitudeMetrics {
        let mut sum_power = 0.0_f64;
        let mut peak_power = 0.0_f32;
        let mut nof_clipped = 0_u64;
        let ceiling_power = self.ceiling * self.ceiling;

        for sample in samples.iter_mut() {
            if self.gain != 1.0 {
                *sample *= self.gain;
            }
            let mut power = sample.norm_sqr();
            if self.clipping_enabled && power > ceiling_power {
                *sample *= self.ceiling / power.sqrt();
                power = ceiling_power;
                nof_clipped += 1;
            }
            sum_power += power as f64;
            peak_power = peak_power.max(power);
        }

        AmplitudeMetrics {
            avg_power: if samples.is_empty() {
                0.0
            } else {
                (sum_power / samples.len() as f64) as f32
            },
            peak_power,
            nof_clipped_samples: nof_clipped,
            nof_processed_samples: samples.len() as u64,
            clipping_enabled: self.clipping_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_controller_only_measures() {
        let clipper = AmplitudeClipper::new(&AmplitudeControlConfig::default());
        let input = vec![Complex32::new(3.0, 4.0), Complex32::new(0.0, 1.0)];
        let mut samples = input.clone();
        let metrics = clipper.process(&mut samples);
        assert_eq!(samples, input);
        assert_eq!(metrics.avg_power, 13.0);
        assert_eq!(metrics.peak_power, 25.0);
        assert_eq!(metrics.nof_clipped_samples, 0);
        assert_eq!(metrics.nof_processed_samples, 2);
        assert!(!metrics.clipping_enabled);
    }

    #[test]
    fn test_clipping_limits_magnitude() {
        let clipper = AmplitudeClipper::new(&AmplitudeControlConfig {
            enable_clipping: true,
            gain_db: 0.0,
            ceiling_dbfs: 0.0,
            full_scale_amplitude: 1.0,
        });
        let mut samples = vec![Complex32::new(3.0, 4.0), Complex32::new(0.5, 0.0)];
        let metrics = clipper.process(&mut samples);
        assert!((samples[0].norm() - 1.0).abs() < 1e-6);
        assert!((samples[0].arg() - Complex32::new(3.0, 4.0).arg()).abs() < 1e-6);
        assert_eq!(samples[1], Complex32::new(0.5, 0.0));
        assert_eq!(metrics.nof_clipped_samples, 1);
        assert!((metrics.peak_power - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_gain_is_applied() {
        let clipper = AmplitudeClipper::new(&AmplitudeControlConfig {
            gain_db: 20.0,
            ..AmplitudeControlConfig::default()
        });
        let mut samples = vec![Complex32::new(0.1, 0.0)];
        clipper.process(&mut samples);
        assert!((samples[0].re - 1.0).abs() < 1e-5);
    }
}
