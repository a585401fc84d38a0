//! Common Types for the 5G NR downlink
//!
//! Defines the numerology related types used throughout the lower PHY

use crate::CommonError;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Number of samples of the reference DFT size used by TS 38.211 cyclic prefix lengths
const REFERENCE_DFT_SIZE: usize = 2048;

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Numerology index (mu)
    pub fn numerology(&self) -> u32 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Subcarrier spacing in kHz
    pub fn to_khz(&self) -> u32 {
        *self as u32
    }

    /// Subcarrier spacing in Hz
    pub fn to_hz(&self) -> u32 {
        self.to_khz() * 1000
    }

    /// Number of slots in one 1 ms subframe
    pub fn nof_slots_per_subframe(&self) -> u32 {
        1 << self.numerology()
    }

    /// Number of slots in one 10 ms frame
    pub fn nof_slots_per_frame(&self) -> u32 {
        10 * self.nof_slots_per_subframe()
    }

    /// Nominal slot duration
    pub fn slot_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000 >> self.numerology())
    }
}

/// Cyclic prefix type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclicPrefix {
    Normal,
    Extended,
}

impl CyclicPrefix {
    /// Number of OFDM symbols in a slot
    pub fn nof_symbols_per_slot(&self) -> usize {
        match self {
            CyclicPrefix::Normal => 14,
            CyclicPrefix::Extended => 12,
        }
    }

    /// Checks that the cyclic prefix lengths are integer numbers of samples for a DFT size
    pub fn validate(&self, scs: SubcarrierSpacing, dft_size: usize) -> Result<(), CommonError> {
        if *self == CyclicPrefix::Extended && scs != SubcarrierSpacing::Scs60 {
            return Err(CommonError::ExtendedCpNotSupported);
        }
        // 144 * N / 2048 is an integer only when N is a multiple of 128.
        if dft_size == 0 || dft_size % 128 != 0 {
            return Err(CommonError::InvalidDftSize(dft_size));
        }
        Ok(())
    }

    /// Cyclic prefix length in samples for a symbol given its index within the subframe
    ///
    /// Normal CP adds `16 * kappa` to the first symbol of every half subframe, which does
    /// not scale with the numerology.
    pub fn length(&self, symbol_in_subframe: usize, scs: SubcarrierSpacing, dft_size: usize) -> usize {
        match self {
            CyclicPrefix::Normal => {
                let mu = scs.numerology();
                let base = (144 * dft_size) / REFERENCE_DFT_SIZE;
                if symbol_in_subframe % (7 << mu) == 0 {
                    base + ((16 * dft_size) << mu) / REFERENCE_DFT_SIZE
                } else {
                    base
                }
            }
            CyclicPrefix::Extended => (512 * dft_size) / REFERENCE_DFT_SIZE,
        }
    }
}

/// Bandwidth values in MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    /// 5 MHz
    Bw5,
    /// 10 MHz
    Bw10,
    /// 15 MHz
    Bw15,
    /// 20 MHz
    Bw20,
    /// 25 MHz
    Bw25,
    /// 30 MHz
    Bw30,
    /// 40 MHz
    Bw40,
    /// 50 MHz
    Bw50,
    /// 60 MHz
    Bw60,
    /// 80 MHz
    Bw80,
    /// 100 MHz
    Bw100,
}

impl Bandwidth {
    /// Parse a channel bandwidth in MHz
    pub fn from_mhz(mhz: u32) -> Option<Self> {
        let bw = match mhz {
            5 => Bandwidth::Bw5,
            10 => Bandwidth::Bw10,
            15 => Bandwidth::Bw15,
            20 => Bandwidth::Bw20,
            25 => Bandwidth::Bw25,
            30 => Bandwidth::Bw30,
            40 => Bandwidth::Bw40,
            50 => Bandwidth::Bw50,
            60 => Bandwidth::Bw60,
            80 => Bandwidth::Bw80,
            100 => Bandwidth::Bw100,
            _ => return None,
        };
        Some(bw)
    }

    /// Get bandwidth in MHz
    pub fn as_mhz(&self) -> u32 {
        self.as_hz() / 1_000_000
    }

    /// Get bandwidth in Hz
    pub fn as_hz(&self) -> u32 {
        match self {
            Bandwidth::Bw5 => 5_000_000,
            Bandwidth::Bw10 => 10_000_000,
            Bandwidth::Bw15 => 15_000_000,
            Bandwidth::Bw20 => 20_000_000,
            Bandwidth::Bw25 => 25_000_000,
            Bandwidth::Bw30 => 30_000_000,
            Bandwidth::Bw40 => 40_000_000,
            Bandwidth::Bw50 => 50_000_000,
            Bandwidth::Bw60 => 60_000_000,
            Bandwidth::Bw80 => 80_000_000,
            Bandwidth::Bw100 => 100_000_000,
        }
    }

    /// Maximum transmission bandwidth in resource blocks (TS 38.101-1 Table 5.3.2-1)
    pub fn nof_prb(&self, scs: SubcarrierSpacing) -> Result<u16, CommonError> {
        let nof_prb = match (scs, self) {
            (SubcarrierSpacing::Scs15, Bandwidth::Bw5) => Some(25),
            (SubcarrierSpacing::Scs15, Bandwidth::Bw10) => Some(52),
            (SubcarrierSpacing::Scs15, Bandwidth::Bw15) => Some(79),
            (SubcarrierSpacing::Scs15, Bandwidth::Bw20) => Some(106),
            (SubcarrierSpacing::Scs15, Bandwidth::Bw25) => Some(133),
            (SubcarrierSpacing::Scs15, Bandwidth::Bw30) => Some(160),
            (SubcarrierSpacing::Scs15, Bandwidth::Bw40) => Some(216),
            (SubcarrierSpacing::Scs15, Bandwidth::Bw50) => Some(270),
            (SubcarrierSpacing::Scs30, Bandwidth::Bw5) => Some(11),
            (SubcarrierSpacing::Scs30, Bandwidth::Bw10) => Some(24),
            (SubcarrierSpacing::Scs30, Bandwidth::Bw15) => Some(38),
            (SubcarrierSpacing::Scs30, Bandwidth::Bw20) => Some(51),
            (SubcarrierSpacing::Scs30, Bandwidth::Bw25) => Some(65),
            (SubcarrierSpacing::Scs30, Bandwidth::Bw30) => Some(78),
            (SubcarrierSpacing::Scs30, Bandwidth::Bw40) => Some(106),
            (SubcarrierSpacing::Scs30, Bandwidth::Bw50) => Some(133),
            (SubcarrierSpacing::Scs30, Bandwidth::Bw60) => Some(162),
            (SubcarrierSpacing::Scs30, Bandwidth::Bw80) => Some(217),
            (SubcarrierSpacing::Scs30, Bandwidth::Bw100) => Some(273),
            (SubcarrierSpacing::Scs60, Bandwidth::Bw10) => Some(11),
            (SubcarrierSpacing::Scs60, Bandwidth::Bw15) => Some(18),
            (SubcarrierSpacing::Scs60, Bandwidth::Bw20) => Some(24),
            (SubcarrierSpacing::Scs60, Bandwidth::Bw25) => Some(31),
            (SubcarrierSpacing::Scs60, Bandwidth::Bw30) => Some(38),
            (SubcarrierSpacing::Scs60, Bandwidth::Bw40) => Some(51),
            (SubcarrierSpacing::Scs60, Bandwidth::Bw50) => Some(65),
            (SubcarrierSpacing::Scs60, Bandwidth::Bw60) => Some(79),
            (SubcarrierSpacing::Scs60, Bandwidth::Bw80) => Some(107),
            (SubcarrierSpacing::Scs60, Bandwidth::Bw100) => Some(135),
            _ => None,
        };
        nof_prb.ok_or(CommonError::InvalidBandwidth {
            bandwidth_mhz: self.as_mhz(),
            scs_khz: scs.to_khz(),
        })
    }
}

/// Baseband sampling rate, kept in integer Hz so sample counts never round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplingRate(u64);

impl SamplingRate {
    /// Create a sampling rate from Hz
    pub fn from_hz(hz: u64) -> Self {
        Self(hz)
    }

    /// Create a sampling rate from MHz, rounded to the nearest Hz
    pub fn from_mhz(mhz: f64) -> Self {
        Self((mhz * 1e6).round() as u64)
    }

    /// Sampling rate in Hz
    pub fn to_hz(&self) -> u64 {
        self.0
    }

    /// Sampling rate in MHz
    pub fn to_mhz(&self) -> f64 {
        self.0 as f64 / 1e6
    }

    /// Number of samples in one 1 ms subframe
    pub fn samples_per_subframe(&self) -> usize {
        (self.0 / 1000) as usize
    }

    /// DFT size for a subcarrier spacing
    pub fn dft_size(&self, scs: SubcarrierSpacing) -> Result<usize, CommonError> {
        let scs_hz = scs.to_hz();
        if self.0 == 0 || self.0 % scs_hz as u64 != 0 {
            return Err(CommonError::IncompatibleSamplingRate {
                srate_hz: self.0,
                scs_hz,
            });
        }
        Ok((self.0 / scs_hz as u64) as usize)
    }
}

impl fmt::Display for SamplingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} MHz", self.to_mhz())
    }
}
