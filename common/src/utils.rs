//! Common Utilities
//!
//! Power and amplitude unit conversions used by the signal conditioning stages

use tracing::trace;

/// Convert a value in dB to a linear amplitude factor
pub fn db_to_amplitude(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a value in dB to a linear power factor
pub fn db_to_power(db: f32) -> f32 {
    10.0_f32.powf(db / 10.0)
}

/// Convert a linear power to dB. Zero power maps to negative infinity.
pub fn power_to_db(power: f32) -> f32 {
    10.0 * power.log10()
}

/// Convert a linear amplitude to dB
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.log10()
}

/// Amplitude ceiling relative to a full scale amplitude
pub fn ceiling_from_dbfs(ceiling_dbfs: f32, full_scale_amplitude: f32) -> f32 {
    let ceiling = full_scale_amplitude * db_to_amplitude(ceiling_dbfs);
    trace!("Amplitude ceiling {:.3} for {:.1} dBFS", ceiling, ceiling_dbfs);
    ceiling
}
