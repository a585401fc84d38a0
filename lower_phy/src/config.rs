//! Downlink Lower PHY Configuration

use crate::LowerPhyError;
use common::slot_point::NOF_SFNS;
use common::{CyclicPrefix, SamplingRate, SubcarrierSpacing};
use tracing::debug;

/// Default number of slots the TTI boundary is notified in advance
pub const DEFAULT_NOF_SLOT_TTI_IN_ADVANCE: u32 = 2;

/// Default capacity of the CFO command queue
pub const DEFAULT_CFO_QUEUE_SIZE: usize = 128;

/// Amplitude controller configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeControlConfig {
    /// Limit the sample magnitude to the ceiling
    pub enable_clipping: bool,
    /// Gain applied before clipping, in dB
    pub gain_db: f32,
    /// Clipping ceiling relative to full scale, in dBFS
    pub ceiling_dbfs: f32,
    /// Amplitude considered full scale
    pub full_scale_amplitude: f32,
}

impl Default for AmplitudeControlConfig {
    fn default() -> Self {
        Self {
            enable_clipping: false,
            gain_db: 0.0,
            ceiling_dbfs: -0.1,
            full_scale_amplitude: 1.0,
        }
    }
}

/// OFDM modulator configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfdmModulatorConfig {
    /// Number of subcarriers of the resource grid
    pub nof_subcarriers: usize,
    /// Scaling applied to the inverse DFT output
    pub scale: f32,
    /// Carrier center frequency used for phase compensation
    pub center_freq_hz: f64,
}

/// Downlink processor configuration
#[derive(Debug, Clone)]
pub struct DownlinkProcessorConfig {
    /// Radio sector identifier
    pub sector_id: u32,
    /// Subcarrier spacing
    pub scs: SubcarrierSpacing,
    /// Cyclic prefix
    pub cyclic_prefix: CyclicPrefix,
    /// Baseband sampling rate
    pub srate: SamplingRate,
    /// Number of transmit antenna ports
    pub nof_tx_ports: usize,
    /// Number of slots the TTI boundary is notified ahead of the slot
    pub nof_slot_tti_in_advance: u32,
    /// Number of slots ahead of the slot being transmitted that a slot is dispatched for modulation
    pub modulation_lead_slots: u32,
    /// Number of slot modulators, which bounds the slots being modulated at once
    pub nof_modulators: usize,
    /// Number of entries of the resource grid request pool
    pub request_pool_size: usize,
    /// Capacity of the CFO command queue
    pub cfo_queue_size: usize,
    /// Largest accepted transmit time offset magnitude, in samples
    pub max_tx_time_offset: u64,
    /// OFDM modulator parameters
    pub ofdm: OfdmModulatorConfig,
    /// Amplitude control applied by the modulation tasks
    pub modulation_amplitude: AmplitudeControlConfig,
    /// Amplitude control applied after CFO correction
    pub baseband_amplitude: AmplitudeControlConfig,
}

impl DownlinkProcessorConfig {
    /// Create a configuration with default pipeline sizing
    pub fn new(
        scs: SubcarrierSpacing,
        cyclic_prefix: CyclicPrefix,
        srate: SamplingRate,
        nof_tx_ports: usize,
        nof_subcarriers: usize,
    ) -> Self {
        Self {
            sector_id: 0,
            scs,
            cyclic_prefix,
            srate,
            nof_tx_ports,
            nof_slot_tti_in_advance: DEFAULT_NOF_SLOT_TTI_IN_ADVANCE,
            modulation_lead_slots: 1,
            nof_modulators: 4,
            request_pool_size: 16,
            cfo_queue_size: DEFAULT_CFO_QUEUE_SIZE,
            max_tx_time_offset: srate.samples_per_subframe() as u64,
            ofdm: OfdmModulatorConfig {
                nof_subcarriers,
                scale: 1.0 / (nof_subcarriers.max(1) as f32).sqrt(),
                center_freq_hz: 0.0,
            },
            modulation_amplitude: AmplitudeControlConfig::default(),
            baseband_amplitude: AmplitudeControlConfig::default(),
        }
    }

    /// DFT size implied by the sampling rate and subcarrier spacing
    pub fn dft_size(&self) -> Result<usize, LowerPhyError> {
        Ok(self.srate.dft_size(self.scs)?)
    }

    /// Number of OFDM symbols per slot
    pub fn nof_symbols_per_slot(&self) -> usize {
        self.cyclic_prefix.nof_symbols_per_slot()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), LowerPhyError> {
        let dft_size = self.dft_size()?;
        self.cyclic_prefix.validate(self.scs, dft_size)?;

        if self.nof_tx_ports == 0 {
            return Err(LowerPhyError::InvalidConfiguration(
                "at least one transmit port is required".to_string(),
            ));
        }
        if self.ofdm.nof_subcarriers == 0 || self.ofdm.nof_subcarriers > dft_size {
            return Err(LowerPhyError::InvalidConfiguration(format!(
                "{} subcarriers do not fit a DFT of size {}",
                self.ofdm.nof_subcarriers, dft_size
            )));
        }
        if !self.ofdm.scale.is_finite() || !self.ofdm.center_freq_hz.is_finite() {
            return Err(LowerPhyError::InvalidConfiguration(
                "OFDM scale and center frequency must be finite".to_string(),
            ));
        }
        if self.modulation_lead_slots > self.nof_slot_tti_in_advance {
            return Err(LowerPhyError::InvalidConfiguration(format!(
                "modulation lead of {} slots exceeds the TTI advance of {} slots",
                self.modulation_lead_slots, self.nof_slot_tti_in_advance
            )));
        }
        if self.nof_modulators <= self.modulation_lead_slots as usize {
            return Err(LowerPhyError::InvalidConfiguration(format!(
                "{} modulators cannot cover a modulation lead of {} slots",
                self.nof_modulators, self.modulation_lead_slots
            )));
        }
        if self.request_pool_size <= self.nof_slot_tti_in_advance as usize
            || self.request_pool_size < self.nof_modulators
        {
            return Err(LowerPhyError::InvalidConfiguration(format!(
                "request pool of {} entries is too small",
                self.request_pool_size
            )));
        }
        // Slot-indexed tables must not alias consecutive slots when the slot counter wraps.
        let nof_slots_per_cycle = (NOF_SFNS * self.scs.nof_slots_per_frame()) as usize;
        for (name, size) in [("modulator", self.nof_modulators), ("request pool", self.request_pool_size)] {
            if nof_slots_per_cycle % size != 0 {
                return Err(LowerPhyError::InvalidConfiguration(format!(
                    "{} count {} does not divide the {} slot cycle",
                    name, size, nof_slots_per_cycle
                )));
            }
        }
        if self.cfo_queue_size == 0 {
            return Err(LowerPhyError::InvalidConfiguration(
                "CFO command queue needs at least one entry".to_string(),
            ));
        }

        debug!(
            "Validated downlink config: scs={}kHz, cp={:?}, srate={}, dft_size={}, ports={}",
            self.scs.to_khz(),
            self.cyclic_prefix,
            self.srate,
            dft_size,
            self.nof_tx_ports
        );
        Ok(())
    }
}
