//! Per-slot baseband storage written by the modulation tasks

use interfaces::{AmplitudeMetrics, BasebandWriter};
use num_complex::Complex32;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Output of the modulation of one symbol on one port
#[derive(Debug, Default)]
pub(crate) struct ModulationUnit {
    pub(crate) samples: Vec<Complex32>,
    /// Amplitude controller measurement, absent when the unit was not modulated
    pub(crate) metrics: Option<AmplitudeMetrics>,
}

/// Baseband samples of every symbol and port of one slot
///
/// Each (symbol, port) unit is written by exactly one task, so the unit locks are never
/// contended while a slot is being modulated.
#[derive(Debug)]
pub struct SlotBuffer {
    nof_ports: usize,
    nof_symbols: usize,
    units: Vec<Mutex<ModulationUnit>>,
}

impl SlotBuffer {
    /// Create a buffer able to hold symbols of up to `max_symbol_size` samples
    pub fn new(nof_ports: usize, nof_symbols: usize, max_symbol_size: usize) -> Self {
        let units = (0..nof_ports * nof_symbols)
            .map(|_| {
                Mutex::new(ModulationUnit {
                    samples: Vec::with_capacity(max_symbol_size),
                    metrics: None,
                })
            })
            .collect();
        Self {
            nof_ports,
            nof_symbols,
            units,
        }
    }

    /// Number of antenna ports
    pub fn nof_ports(&self) -> usize {
        self.nof_ports
    }

    /// Number of symbols
    pub fn nof_symbols(&self) -> usize {
        self.nof_symbols
    }

    pub(crate) fn unit(&self, symbol: usize, port: usize) -> MutexGuard<'_, ModulationUnit> {
        assert!(symbol < self.nof_symbols && port < self.nof_ports, "unit out of bounds");
        self.units[symbol * self.nof_ports + port]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Size every symbol for the next slot and forget previous measurements
    pub(crate) fn prepare(&self, symbol_size: impl Fn(usize) -> usize) {
        for symbol in 0..self.nof_symbols {
            let size = symbol_size(symbol);
            for port in 0..self.nof_ports {
                let mut unit = self.unit(symbol, port);
                unit.samples.resize(size, Complex32::new(0.0, 0.0));
                unit.metrics = None;
            }
        }
    }

    /// Zero one unit, used when its modulation could not be scheduled
    pub(crate) fn silence_unit(&self, symbol: usize, port: usize) {
        let mut unit = self.unit(symbol, port);
        unit.samples.fill(Complex32::new(0.0, 0.0));
        unit.metrics = None;
    }

    /// Number of samples of a symbol
    pub fn symbol_size(&self, symbol: usize) -> usize {
        self.unit(symbol, 0).samples.len()
    }

    /// Copy every port of `symbol` into `writer`, one port per channel
    ///
    /// Returns false if the writer does not span exactly one symbol.
    pub fn copy_symbol(&self, symbol: usize, writer: &mut BasebandWriter<'_>) -> bool {
        assert_eq!(writer.nof_channels(), self.nof_ports, "channel count mismatch");
        for port in 0..self.nof_ports {
            let unit = self.unit(symbol, port);
            if unit.samples.len() != writer.nof_samples() {
                warn!(
                    "Symbol {} holds {} samples, destination expects {}",
                    symbol,
                    unit.samples.len(),
                    writer.nof_samples()
                );
                return false;
            }
            writer.channel_mut(port).copy_from_slice(&unit.samples);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interfaces::BasebandBuffer;

    #[test]
    fn test_prepare_and_copy() {
        let buffer = SlotBuffer::new(2, 14, 160);
        buffer.prepare(|symbol| if symbol == 0 { 138 } else { 137 });
        assert_eq!(buffer.symbol_size(0), 138);
        assert_eq!(buffer.symbol_size(5), 137);

        buffer.unit(3, 1).samples.fill(Complex32::new(0.5, -0.5));

        let mut destination = BasebandBuffer::new(2, 200);
        assert!(buffer.copy_symbol(3, &mut destination.writer(10..147)));
        assert_eq!(destination.channel(1)[10], Complex32::new(0.5, -0.5));
        assert_eq!(destination.channel(1)[9], Complex32::new(0.0, 0.0));
        assert_eq!(destination.channel(0)[10], Complex32::new(0.0, 0.0));

        assert!(!buffer.copy_symbol(3, &mut destination.writer(0..10)));
    }

    #[test]
    fn test_silence_unit() {
        let buffer = SlotBuffer::new(1, 12, 64);
        buffer.prepare(|_| 64);
        {
            let mut unit = buffer.unit(2, 0);
            unit.samples.fill(Complex32::new(1.0, 0.0));
            unit.metrics = Some(AmplitudeMetrics::default());
        }
        buffer.silence_unit(2, 0);
        let unit = buffer.unit(2, 0);
        assert!(unit.samples.iter().all(|s| s.norm() == 0.0));
        assert!(unit.metrics.is_none());
    }

    #[test]
    #[should_panic(expected = "channel count mismatch")]
    fn test_copy_rejects_channel_mismatch() {
        let buffer = SlotBuffer::new(2, 14, 16);
        buffer.prepare(|_| 16);
        let mut destination = BasebandBuffer::new(1, 16);
        buffer.copy_symbol(0, &mut destination.writer(0..16));
    }
}
