//! OFDM Symbol Modulator Interface

use crate::resource_grid::ResourceGridReader;
use num_complex::Complex32;

/// Converts one resource grid symbol of one port into time-domain baseband samples
///
/// Implementations must be callable concurrently from different threads with different
/// arguments; the output only depends on the inputs and the configured center frequency.
pub trait OfdmSymbolModulator: Send + Sync {
    /// Number of subcarriers a resource grid must have to be modulated
    fn nof_subcarriers(&self) -> usize;

    /// Number of samples, cyclic prefix included, of a symbol given its index within the subframe
    fn symbol_size(&self, symbol_in_subframe: usize) -> usize;

    /// Modulate a symbol into `output`, which must be exactly `symbol_size` samples long
    fn modulate(
        &self,
        output: &mut [Complex32],
        grid: &dyn ResourceGridReader,
        port: usize,
        symbol_in_subframe: usize,
    );

    /// Change the carrier center frequency used for phase compensation
    fn set_center_frequency(&self, center_freq_hz: f64) -> bool;
}
