//! Timestamp to symbol mapping
//!
//! Symbols within a subframe do not all have the same length, so positions are resolved
//! through a table of symbol start offsets computed once from the OFDM modulator.

use crate::LowerPhyError;
use common::slot_point::{NOF_SFNS, NOF_SUBFRAMES_PER_FRAME};
use common::{SlotPoint, SubcarrierSpacing};
use interfaces::{BasebandTimestamp, OfdmSymbolModulator};

/// Location of a sample within the frame structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolPosition {
    /// Slot containing the sample
    pub slot: SlotPoint,
    /// Symbol index within the slot
    pub symbol_in_slot: usize,
    /// Symbol index within the subframe
    pub symbol_in_subframe: usize,
    /// Sample offset from the start of the symbol
    pub sample_in_symbol: usize,
    /// Number of samples of the symbol, cyclic prefix included
    pub symbol_size: usize,
    /// Timestamp of the first sample of the symbol
    pub symbol_start: BasebandTimestamp,
}

impl SymbolPosition {
    /// Returns true if the sample is the first one of a slot
    pub fn is_slot_boundary(&self) -> bool {
        self.symbol_in_slot == 0 && self.sample_in_symbol == 0
    }
}

/// Symbol sizes and offsets of one subframe
#[derive(Debug, Clone)]
pub struct SymbolSizeTable {
    scs: SubcarrierSpacing,
    nof_symbols_per_slot: usize,
    sizes: Vec<usize>,
    /// Offset of every symbol from the subframe start
    starts: Vec<usize>,
    samples_per_subframe: usize,
}

impl SymbolSizeTable {
    /// Build the table from the symbol sizes reported by `ofdm`
    ///
    /// Fails if the symbols do not add up to `samples_per_subframe`.
    pub fn new(
        scs: SubcarrierSpacing,
        nof_symbols_per_slot: usize,
        samples_per_subframe: usize,
        ofdm: &dyn OfdmSymbolModulator,
    ) -> Result<Self, LowerPhyError> {
        let nof_symbols = nof_symbols_per_slot * scs.nof_slots_per_subframe() as usize;
        let sizes: Vec<usize> = (0..nof_symbols).map(|l| ofdm.symbol_size(l)).collect();

        let mut starts = Vec::with_capacity(nof_symbols);
        let mut total = 0;
        for size in &sizes {
            starts.push(total);
            total += size;
        }
        if total != samples_per_subframe || sizes.contains(&0) {
            return Err(LowerPhyError::InvalidConfiguration(format!(
                "symbols span {} samples, subframe has {}",
                total, samples_per_subframe
            )));
        }

        Ok(Self {
            scs,
            nof_symbols_per_slot,
            sizes,
            starts,
            samples_per_subframe,
        })
    }

    /// Number of samples of one subframe
    pub fn samples_per_subframe(&self) -> usize {
        self.samples_per_subframe
    }

    /// Largest symbol size
    pub fn max_symbol_size(&self) -> usize {
        self.sizes.iter().copied().max().unwrap_or(0)
    }

    /// Resolve the position of the sample at `timestamp`
    pub fn locate(&self, timestamp: BasebandTimestamp) -> SymbolPosition {
        let samples_per_subframe = self.samples_per_subframe as u64;
        let subframe = timestamp / samples_per_subframe;
        let sample_in_subframe = (timestamp % samples_per_subframe) as usize;

        let symbol_in_subframe = self.starts.partition_point(|&start| start <= sample_in_subframe) - 1;
        let sample_in_symbol = sample_in_subframe - self.starts[symbol_in_subframe];

        let subframe_in_cycle = (subframe % (NOF_SFNS * NOF_SUBFRAMES_PER_FRAME) as u64) as u32;
        let slot_in_subframe = (symbol_in_subframe / self.nof_symbols_per_slot) as u32;
        let slot = SlotPoint::from_system_slot(
            self.scs,
            subframe_in_cycle * self.scs.nof_slots_per_subframe() + slot_in_subframe,
        );

        SymbolPosition {
            slot,
            symbol_in_slot: symbol_in_subframe % self.nof_symbols_per_slot,
            symbol_in_subframe,
            sample_in_symbol,
            symbol_size: self.sizes[symbol_in_subframe],
            symbol_start: timestamp - sample_in_symbol as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownlinkProcessorConfig;
    use crate::ofdm::FftOfdmModulator;
    use common::{CyclicPrefix, SamplingRate};

    fn table(scs: SubcarrierSpacing, srate_mhz: f64) -> SymbolSizeTable {
        let srate = SamplingRate::from_mhz(srate_mhz);
        let config = DownlinkProcessorConfig::new(scs, CyclicPrefix::Normal, srate, 1, 12);
        let ofdm = FftOfdmModulator::new(&config).unwrap();
        SymbolSizeTable::new(scs, 14, srate.samples_per_subframe(), &ofdm).unwrap()
    }

    #[test]
    fn test_locate_within_subframe() {
        // 1.92 MHz at 15 kHz: symbols 0 and 7 are 138 samples, the rest 137.
        let table = table(SubcarrierSpacing::Scs15, 1.92);
        assert_eq!(table.max_symbol_size(), 138);

        let position = table.locate(0);
        assert!(position.is_slot_boundary());
        assert_eq!(position.symbol_size, 138);

        let position = table.locate(138);
        assert_eq!(position.symbol_in_slot, 1);
        assert_eq!(position.sample_in_symbol, 0);

        let position = table.locate(138 + 137 * 6 + 5);
        assert_eq!(position.symbol_in_slot, 7);
        assert_eq!(position.sample_in_symbol, 5);
        assert_eq!(position.symbol_size, 138);
        assert_eq!(position.symbol_start, 138 + 137 * 6);

        let position = table.locate(1919);
        assert_eq!(position.symbol_in_slot, 13);
        assert_eq!(position.sample_in_symbol, 136);
    }

    #[test]
    fn test_locate_slots_and_wrap() {
        let table = table(SubcarrierSpacing::Scs30, 3.84);
        // Two slots of 1920 samples per subframe.
        let position = table.locate(3840 * 5 + 1920);
        assert!(position.is_slot_boundary());
        assert_eq!(position.slot.system_slot(), 11);
        assert_eq!(position.symbol_in_subframe, 14);

        // The slot counter wraps after 1024 frames.
        let position = table.locate(3840 * 10240 + 1920);
        assert_eq!(position.slot.system_slot(), 1);
    }

    #[test]
    fn test_mismatched_subframe_is_rejected() {
        let srate = SamplingRate::from_mhz(1.92);
        let config = DownlinkProcessorConfig::new(SubcarrierSpacing::Scs15, CyclicPrefix::Normal, srate, 1, 12);
        let ofdm = FftOfdmModulator::new(&config).unwrap();
        assert!(SymbolSizeTable::new(SubcarrierSpacing::Scs15, 14, 2000, &ofdm).is_err());
    }
}
