//! PDxCH Processor
//!
//! Composes the resource grid handoff, the pool of slot modulators and the retrieval of
//! modulated symbols by the baseband processor.
//!
//! Resource grids are handed over through a slot-indexed request pool. When the baseband
//! reaches a slot it takes the request out of the pool and dispatches it to the modulator
//! owning that slot. Completed slots are published in a second slot-indexed table from
//! which symbols are copied into the outgoing baseband buffer.

pub mod modulator;
pub mod slot_buffer;

use crate::config::DownlinkProcessorConfig;
use crate::notifiers::PdxchProcessorNotifier;
use crate::metrics::SlotModulationMetrics;
use crate::resource_request_pool::ResourceRequestPool;
use common::SlotPoint;
use interfaces::{
    AmplitudeController, BasebandWriter, OfdmSymbolModulator, ResourceGridContext,
    ResourceGridReader, SharedResourceGrid, TaskExecutor,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, trace, warn};

pub use modulator::{ModulationNotifier, PdxchBasebandModulator};
pub use slot_buffer::SlotBuffer;

/// Slot the baseband needs next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotContext {
    pub slot: SlotPoint,
    pub sector: u32,
}

/// Symbol the baseband needs next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolContext {
    pub slot: SlotPoint,
    /// Symbol index within the slot
    pub symbol: usize,
    pub sector: u32,
}

/// Outcome of `process_slot`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdxchSlotResult {
    /// The slot was handed to a modulator
    Dispatched,
    /// A request was found but its grid carries nothing to transmit
    Empty,
    /// No request for the slot was available in time
    Late,
    /// The request could not be dispatched (modulator busy or unusable grid)
    Rejected,
    /// The processor was stopped
    Stopped,
}

/// Accepts resource grids from the upper layers
pub trait PdxchRequestHandler: Send + Sync {
    /// Queue `grid` for transmission in `context.slot`
    fn handle_request(&self, grid: SharedResourceGrid, context: ResourceGridContext);
}

/// Slot and symbol access used by the baseband processor
pub trait PdxchBaseband: Send + Sync {
    /// Start producing the samples of a slot
    fn process_slot(&self, context: &SlotContext) -> PdxchSlotResult;

    /// Copy one modulated symbol, every port, into `writer`
    ///
    /// Returns false if the symbol is not available.
    fn read_symbol(&self, writer: &mut BasebandWriter<'_>, context: &SymbolContext) -> bool;
}

/// Carrier center frequency control
pub trait CenterFrequencyController: Send + Sync {
    fn set_center_frequency(&self, center_freq_hz: f64) -> bool;
}

/// Pending resource grid
struct PdxchRequest {
    context: ResourceGridContext,
    grid: SharedResourceGrid,
}

/// Modulated slot ready for reading
struct ModulatedSlot {
    context: ResourceGridContext,
    buffer: Arc<SlotBuffer>,
}

/// Collects completed slots from the modulators and forwards their events upward
struct ModulationSink {
    ready: ResourceRequestPool<Option<ModulatedSlot>>,
    notifier: OnceLock<Arc<dyn PdxchProcessorNotifier>>,
}

impl ModulationSink {
    fn notifier(&self) -> Option<&Arc<dyn PdxchProcessorNotifier>> {
        self.notifier.get()
    }
}

impl ModulationNotifier for ModulationSink {
    fn on_modulation_completion(
        &self,
        context: &ResourceGridContext,
        buffer: Arc<SlotBuffer>,
        metrics: SlotModulationMetrics,
    ) {
        self.ready.exchange(
            context.slot,
            Some(ModulatedSlot {
                context: *context,
                buffer,
            }),
        );

        if let Some(notifier) = self.notifier() {
            if metrics.nof_dropped_units > 0 {
                notifier.on_pdxch_modulation_overload(context, metrics.nof_dropped_units);
            }
            notifier.on_pdxch_slot_modulated(context, &metrics);
        }
    }
}

/// PDxCH processor
pub struct PdxchProcessor {
    requests: ResourceRequestPool<Option<PdxchRequest>>,
    modulators: Vec<PdxchBasebandModulator>,
    buffers: Vec<Arc<SlotBuffer>>,
    sink: Arc<ModulationSink>,
    ofdm: Arc<dyn OfdmSymbolModulator>,
    closed: AtomicBool,
}

impl PdxchProcessor {
    /// Create a processor with `config.nof_modulators` modulators sharing `executor`
    pub fn new(
        config: &DownlinkProcessorConfig,
        ofdm: Arc<dyn OfdmSymbolModulator>,
        amplitude: Arc<dyn AmplitudeController>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let nof_symbols_per_slot = config.nof_symbols_per_slot();
        let nof_symbols_per_subframe =
            nof_symbols_per_slot * config.scs.nof_slots_per_subframe() as usize;
        let max_symbol_size = (0..nof_symbols_per_subframe)
            .map(|symbol| ofdm.symbol_size(symbol))
            .max()
            .unwrap_or(0);

        let sink = Arc::new(ModulationSink {
            ready: ResourceRequestPool::new(config.request_pool_size),
            notifier: OnceLock::new(),
        });

        let modulators = (0..config.nof_modulators)
            .map(|_| {
                PdxchBasebandModulator::new(
                    nof_symbols_per_slot,
                    Arc::clone(&ofdm),
                    Arc::clone(&amplitude),
                    Arc::clone(&executor),
                    sink.clone(),
                )
            })
            .collect();
        let buffers = (0..config.nof_modulators)
            .map(|_| Arc::new(SlotBuffer::new(config.nof_tx_ports, nof_symbols_per_slot, max_symbol_size)))
            .collect();

        info!(
            "Created PDxCH processor: {} modulators, {} ports, request pool of {}",
            config.nof_modulators, config.nof_tx_ports, config.request_pool_size
        );

        Self {
            requests: ResourceRequestPool::new(config.request_pool_size),
            modulators,
            buffers,
            sink,
            ofdm,
            closed: AtomicBool::new(false),
        }
    }

    /// Set the receiver of late, overload and completion events
    pub fn connect(&self, notifier: Arc<dyn PdxchProcessorNotifier>) {
        if self.sink.notifier.set(notifier).is_err() {
            warn!("PDxCH processor notifier already connected");
        }
    }

    /// Refuse new requests and wait until no modulation task is running
    pub fn stop(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for modulator in &self.modulators {
            modulator.wait_for_completion();
        }
        self.requests.clear();
        self.sink.ready.clear();
        debug!("PDxCH processor stopped");
    }

    fn notify_late(&self, context: &ResourceGridContext) {
        warn!("Slot {}: resource grid request late", context.slot);
        if let Some(notifier) = self.sink.notifier() {
            notifier.on_pdxch_request_late(context);
        }
    }

    fn modulator_index(&self, slot: SlotPoint) -> usize {
        slot.system_slot() as usize % self.modulators.len()
    }
}

impl PdxchRequestHandler for PdxchProcessor {
    fn handle_request(&self, grid: SharedResourceGrid, context: ResourceGridContext) {
        if self.closed.load(Ordering::Acquire) {
            debug!("Slot {}: PDxCH processor stopped, dropping request", context.slot);
            return;
        }

        let displaced = self.requests.exchange(context.slot, Some(PdxchRequest { context, grid }));
        if let Some(displaced) = displaced {
            warn!(
                "Slot {}: request replaced by a request for slot {}",
                displaced.context.slot, context.slot
            );
        }
    }
}

impl PdxchBaseband for PdxchProcessor {
    fn process_slot(&self, context: &SlotContext) -> PdxchSlotResult {
        if self.closed.load(Ordering::Acquire) {
            return PdxchSlotResult::Stopped;
        }
        let grid_context = ResourceGridContext {
            slot: context.slot,
            sector: context.sector,
        };

        // Results left over from the slot that aliased this entry must not be read.
        self.sink.ready.exchange(context.slot, None);

        // Requests for a later slot sharing the entry stay in place.
        let request = self.requests.with_entry(context.slot, |entry| {
            if entry.as_ref().is_some_and(|request| request.context.slot > context.slot) {
                None
            } else {
                entry.take()
            }
        });

        let Some(PdxchRequest { context: request_context, grid }) = request else {
            self.notify_late(&grid_context);
            return PdxchSlotResult::Late;
        };
        if request_context.slot != context.slot {
            debug!("Slot {}: discarding stale request", request_context.slot);
            self.notify_late(&grid_context);
            return PdxchSlotResult::Late;
        }

        let Some(reader) = grid.reader() else {
            warn!("Slot {}: request carries no resource grid", context.slot);
            return PdxchSlotResult::Rejected;
        };
        if reader.nof_subc() != self.ofdm.nof_subcarriers() {
            warn!(
                "Slot {}: resource grid of {} subcarriers, expected {}",
                context.slot,
                reader.nof_subc(),
                self.ofdm.nof_subcarriers()
            );
            return PdxchSlotResult::Rejected;
        }
        if reader.is_empty() {
            trace!("Slot {}: empty resource grid", context.slot);
            return PdxchSlotResult::Empty;
        }

        let index = self.modulator_index(context.slot);
        let buffer = Arc::clone(&self.buffers[index]);
        let nof_units = buffer.nof_symbols() * buffer.nof_ports();
        if !self.modulators[index].handle_request(buffer, grid, request_context) {
            warn!("Slot {}: modulator {} could not take the slot", context.slot, index);
            if let Some(notifier) = self.sink.notifier() {
                notifier.on_pdxch_modulation_overload(&request_context, nof_units);
            }
            return PdxchSlotResult::Rejected;
        }

        trace!("Slot {}: dispatched to modulator {}", context.slot, index);
        PdxchSlotResult::Dispatched
    }

    fn read_symbol(&self, writer: &mut BasebandWriter<'_>, context: &SymbolContext) -> bool {
        let buffer = self.sink.ready.with_entry(context.slot, |entry| {
            entry
                .as_ref()
                .filter(|ready| ready.context.slot == context.slot)
                .map(|ready| Arc::clone(&ready.buffer))
        });
        match buffer {
            Some(buffer) => buffer.copy_symbol(context.symbol, writer),
            None => false,
        }
    }
}

impl CenterFrequencyController for PdxchProcessor {
    fn set_center_frequency(&self, center_freq_hz: f64) -> bool {
        self.ofdm.set_center_frequency(center_freq_hz)
    }
}

impl Drop for PdxchProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}
