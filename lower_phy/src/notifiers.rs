//! Notifications exposed to the layers above the lower PHY

use crate::metrics::{BasebandMetrics, SlotModulationMetrics};
use common::SlotPoint;
use interfaces::ResourceGridContext;
use std::time::Instant;

/// Timing information carried by a TTI boundary notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowerPhyTimingContext {
    /// Slot the upper layers should prepare next
    pub slot: SlotPoint,
    /// Real time at which that slot starts being transmitted
    pub time_point: Instant,
}

/// Receives slot timing from the downlink baseband processor
pub trait DownlinkTimingNotifier: Send + Sync {
    /// A new slot boundary was reached; `context.slot` is already offset by the TTI advance
    fn on_tti_boundary(&self, context: &LowerPhyTimingContext);
}

/// Receives conditioned signal metrics from the downlink baseband processor
pub trait BasebandMetricsNotifier: Send + Sync {
    /// Metrics of the last processed symbol across every port
    fn on_new_metrics(&self, metrics: &BasebandMetrics);
}

/// Receives events from the PDxCH processor
pub trait PdxchProcessorNotifier: Send + Sync {
    /// A slot was needed but no resource grid request was available for it in time
    fn on_pdxch_request_late(&self, context: &ResourceGridContext);

    /// Some symbol and port units of a slot were transmitted as silence because the
    /// executor refused them
    fn on_pdxch_modulation_overload(&self, _context: &ResourceGridContext, _nof_dropped_units: usize) {}

    /// A slot finished modulating
    fn on_pdxch_slot_modulated(&self, _context: &ResourceGridContext, _metrics: &SlotModulationMetrics) {}
}
