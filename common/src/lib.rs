//! Common Utilities and Types Library
//!
//! This crate provides shared types and utilities used across the downlink lower PHY.

pub mod types;
pub mod slot_point;
pub mod utils;

use thiserror::Error;

// Re-export commonly used items
pub use types::*;
pub use slot_point::SlotPoint;
pub use utils::*;

/// Errors raised while validating numerology related parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommonError {
    #[error("Sampling rate {srate_hz} Hz is not a multiple of {scs_hz} Hz subcarrier spacing")]
    IncompatibleSamplingRate { srate_hz: u64, scs_hz: u32 },

    #[error("DFT size {0} does not yield integer cyclic prefix lengths")]
    InvalidDftSize(usize),

    #[error("Extended cyclic prefix is only defined for 60 kHz subcarrier spacing")]
    ExtendedCpNotSupported,

    #[error("Bandwidth {bandwidth_mhz} MHz is not defined for {scs_khz} kHz subcarrier spacing")]
    InvalidBandwidth { bandwidth_mhz: u32, scs_khz: u32 },
}
