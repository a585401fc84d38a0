//! OFDM Symbol Modulation for 5G NR downlink
//!
//! Implements OFDM baseband signal generation according to 3GPP TS 38.211 section 5.3.1
//! using rustfft for the inverse DFT. The resource grid is mapped around DC, the inverse
//! DFT output is scaled, phase compensated for the carrier center frequency (section 5.4)
//! and prefixed with its cyclic prefix.

use crate::config::DownlinkProcessorConfig;
use crate::LowerPhyError;
use interfaces::{OfdmSymbolModulator, ResourceGridReader};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// OFDM modulator for downlink
pub struct FftOfdmModulator {
    /// DFT size
    dft_size: usize,
    /// Number of subcarriers of the resource grid
    nof_subcarriers: usize,
    /// Number of symbols per slot
    nof_symbols_per_slot: usize,
    /// Sampling rate in Hz
    srate_hz: f64,
    /// Inverse DFT plan, shared by every caller
    ifft: Arc<dyn Fft<f32>>,
    /// Output scaling
    scale: f32,
    /// Cyclic prefix length of every symbol of a subframe
    cp_lengths: Vec<usize>,
    /// Start of the useful part of every symbol, in samples from the subframe start
    useful_starts: Vec<u64>,
    /// Center frequency in Hz, stored as f64 bits
    center_freq_hz: AtomicU64,
}

impl FftOfdmModulator {
    /// Create a new OFDM modulator
    pub fn new(config: &DownlinkProcessorConfig) -> Result<Self, LowerPhyError> {
        let dft_size = config.dft_size()?;
        config.cyclic_prefix.validate(config.scs, dft_size)?;

        let nof_symbols_per_subframe =
            config.nof_symbols_per_slot() * config.scs.nof_slots_per_subframe() as usize;
        let cp_lengths: Vec<usize> = (0..nof_symbols_per_subframe)
            .map(|l| config.cyclic_prefix.length(l, config.scs, dft_size))
            .collect();

        let mut useful_starts = Vec::with_capacity(nof_symbols_per_subframe);
        let mut symbol_start = 0_u64;
        for &cp_len in &cp_lengths {
            useful_starts.push(symbol_start + cp_len as u64);
            symbol_start += (dft_size + cp_len) as u64;
        }

        let ifft = FftPlanner::new().plan_fft_inverse(dft_size);
        debug!(
            "Created OFDM modulator: dft_size={}, nof_subcarriers={}, scale={:.4}",
            dft_size, config.ofdm.nof_subcarriers, config.ofdm.scale
        );

        Ok(Self {
            dft_size,
            nof_subcarriers: config.ofdm.nof_subcarriers,
            nof_symbols_per_slot: config.nof_symbols_per_slot(),
            srate_hz: config.srate.to_hz() as f64,
            ifft,
            scale: config.ofdm.scale,
            cp_lengths,
            useful_starts,
            center_freq_hz: AtomicU64::new(config.ofdm.center_freq_hz.to_bits()),
        })
    }

    /// Current center frequency in Hz
    pub fn center_frequency(&self) -> f64 {
        f64::from_bits(self.center_freq_hz.load(Ordering::Relaxed))
    }

    /// Combined scaling and center frequency phase compensation of a symbol
    fn symbol_factor(&self, symbol_in_subframe: usize) -> Complex32 {
        let center_freq_hz = self.center_frequency();
        if center_freq_hz == 0.0 {
            return Complex32::new(self.scale, 0.0);
        }
        let t = self.useful_starts[symbol_in_subframe] as f64 / self.srate_hz;
        let cycles = (center_freq_hz * t).fract();
        Complex32::from_polar(self.scale, (-2.0 * PI * cycles) as f32)
    }
}

impl OfdmSymbolModulator for FftOfdmModulator {
    fn nof_subcarriers(&self) -> usize {
        self.nof_subcarriers
    }

    fn symbol_size(&self, symbol_in_subframe: usize) -> usize {
        self.dft_size + self.cp_lengths[symbol_in_subframe % self.cp_lengths.len()]
    }

    fn modulate(
        &self,
        output: &mut [Complex32],
        grid: &dyn ResourceGridReader,
        port: usize,
        symbol_in_subframe: usize,
    ) {
        let symbol_in_subframe = symbol_in_subframe % self.cp_lengths.len();
        let cp_len = self.cp_lengths[symbol_in_subframe];
        assert_eq!(output.len(), self.dft_size + cp_len, "output does not match the symbol size");
        assert_eq!(grid.nof_subc(), self.nof_subcarriers, "grid bandwidth mismatch");

        // The useful part of the output doubles as the inverse DFT buffer.
        let useful = &mut output[cp_len..];
        useful.fill(Complex32::new(0.0, 0.0));

        // Lower half of the grid maps to negative frequencies, at the end of the DFT input.
        let half = self.nof_subcarriers / 2;
        let symbol_in_slot = symbol_in_subframe % self.nof_symbols_per_slot;
        for (k, re) in grid.symbol(port, symbol_in_slot).iter().enumerate() {
            useful[(k + self.dft_size - half) % self.dft_size] = *re;
        }

        let mut scratch = vec![Complex32::new(0.0, 0.0); self.ifft.get_inplace_scratch_len()];
        self.ifft.process_with_scratch(useful, &mut scratch);

        let factor = self.symbol_factor(symbol_in_subframe);
        useful.iter_mut().for_each(|sample| *sample *= factor);

        output.copy_within(self.dft_size..self.dft_size + cp_len, 0);
    }

    fn set_center_frequency(&self, center_freq_hz: f64) -> bool {
        if !center_freq_hz.is_finite() || center_freq_hz < 0.0 {
            warn!("Rejected center frequency {} Hz", center_freq_hz);
            return false;
        }
        self.center_freq_hz.store(center_freq_hz.to_bits(), Ordering::Relaxed);
        debug!("OFDM modulator center frequency set to {:.3} MHz", center_freq_hz / 1e6);
        true
    }
}
