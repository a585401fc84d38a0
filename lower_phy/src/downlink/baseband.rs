//! Downlink Baseband Processor
//!
//! Produces the transmit sample stream requested by the radio, one buffer at a time. Every
//! buffer is described by the timestamp of its first sample. The processor aligns to the
//! first slot boundary it sees, announces slots ahead of time, dispatches slots for
//! modulation and copies the modulated symbols into the buffer, through an internal
//! single-symbol stage when a symbol straddles the buffer edges.
//!
//! The processor never fails: samples without modulated data are transmitted as zeros and
//! excluded from the transmit window reported in the metadata.

use super::symbol_sizes::{SymbolPosition, SymbolSizeTable};
use crate::cfo::{CfoController, CfoProcessor};
use crate::config::DownlinkProcessorConfig;
use crate::metrics::PowerAccumulator;
use crate::notifiers::{BasebandMetricsNotifier, DownlinkTimingNotifier, LowerPhyTimingContext};
use crate::pdxch::{PdxchBaseband, PdxchSlotResult, SlotContext, SymbolContext};
use common::SlotPoint;
use interfaces::{
    AmplitudeController, BasebandBuffer, BasebandTimestamp, BasebandWriter, TransmitMetadata,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Sets the signed sample offset applied to every requested timestamp
#[derive(Debug, Clone)]
pub struct TxTimeOffsetController {
    offset: Arc<AtomicI64>,
    max_offset: u64,
}

impl TxTimeOffsetController {
    /// Set the offset in samples. Offsets larger than the configured bound are rejected.
    pub fn set_tx_time_offset(&self, offset: i64) -> bool {
        if offset.unsigned_abs() > self.max_offset {
            warn!(
                "Transmit time offset of {} samples exceeds the limit of {}",
                offset, self.max_offset
            );
            return false;
        }
        self.offset.store(offset, Ordering::Relaxed);
        debug!("Transmit time offset set to {} samples", offset);
        true
    }

    /// Current offset in samples
    pub fn tx_time_offset(&self) -> i64 {
        self.offset.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// Waiting for the first slot boundary
    Aligning,
    Streaming {
        /// Last slot whose boundary was handled
        last_boundary: SlotPoint,
        /// First slot announced to the upper layers
        first_announced: SlotPoint,
    },
}

/// Builds the transmit window of one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxWindow {
    /// Nothing processed yet
    Idle { had_gap: bool },
    Open { start: Option<usize> },
    /// The first gap after processed samples ends the window for the rest of the buffer
    Closed { start: Option<usize>, end: usize },
}

impl TxWindow {
    fn new() -> Self {
        Self::Idle { had_gap: false }
    }

    fn record(&mut self, offset: usize, processed: bool) {
        *self = match (*self, processed) {
            (Self::Idle { had_gap }, true) => Self::Open {
                start: had_gap.then_some(offset),
            },
            (Self::Idle { .. }, false) => Self::Idle { had_gap: true },
            (Self::Open { start }, false) => Self::Closed { start, end: offset },
            (window, _) => window,
        };
    }

    fn metadata(&self) -> TransmitMetadata {
        match *self {
            Self::Idle { .. } => TransmitMetadata::empty(),
            Self::Open { start } => TransmitMetadata {
                is_empty: false,
                tx_start: start,
                tx_end: None,
            },
            Self::Closed { start, end } => TransmitMetadata {
                is_empty: false,
                tx_start: start,
                tx_end: Some(end),
            },
        }
    }
}

/// Single symbol held back because it did not fit the destination buffer
struct SymbolStage {
    buffer: BasebandBuffer,
    start: BasebandTimestamp,
    len: usize,
    processed: bool,
}

impl SymbolStage {
    fn covers(&self, timestamp: BasebandTimestamp) -> bool {
        self.len > 0 && timestamp >= self.start && timestamp < self.start + self.len as u64
    }

    /// Copy staged samples from `timestamp` into `destination` at `offset`
    fn drain(&self, timestamp: BasebandTimestamp, destination: &mut BasebandBuffer, offset: usize) -> usize {
        let first = (timestamp - self.start) as usize;
        let count = (self.len - first).min(destination.nof_samples() - offset);
        if self.processed {
            destination
                .writer(offset..offset + count)
                .copy_from(&self.buffer.reader(first..first + count));
        }
        count
    }
}

/// Reads, conditions and measures modulated symbols
struct SymbolProducer {
    sector: u32,
    pdxch: Arc<dyn PdxchBaseband>,
    amplitude: Arc<dyn AmplitudeController>,
    cfo: CfoProcessor,
    metrics_notifier: Option<Arc<dyn BasebandMetricsNotifier>>,
}

impl SymbolProducer {
    /// Write the symbol at `position` into `writer`. Returns false if it was not available.
    fn produce(&mut self, writer: &mut BasebandWriter<'_>, position: &SymbolPosition) -> bool {
        if position.symbol_in_slot == 0 {
            self.cfo.advance_to_next_symbol(position.symbol_start);
        }

        let context = SymbolContext {
            slot: position.slot,
            symbol: position.symbol_in_slot,
            sector: self.sector,
        };
        let available = self.pdxch.read_symbol(writer, &context);

        if available {
            let mut accumulator = PowerAccumulator::default();
            for channel in 0..writer.nof_channels() {
                let samples = writer.channel_mut(channel);
                self.cfo.apply(samples);
                accumulator.add(&self.amplitude.process(samples));
            }
            if let (Some(notifier), Some(metrics)) = (&self.metrics_notifier, accumulator.finish()) {
                notifier.on_new_metrics(&metrics);
            }
        } else {
            trace!("Slot {} symbol {}: not available", position.slot, position.symbol_in_slot);
        }

        self.cfo.advance(position.symbol_size);
        available
    }
}

/// Downlink baseband processor
pub struct DownlinkProcessorBaseband {
    sector: u32,
    nof_tx_ports: usize,
    nof_slot_tti_in_advance: u32,
    modulation_lead_slots: u32,
    slot_duration: Duration,
    symbols: SymbolSizeTable,
    tx_time_offset: Arc<AtomicI64>,
    timing_notifier: Option<Arc<dyn DownlinkTimingNotifier>>,
    state: StreamState,
    producer: SymbolProducer,
    stage: SymbolStage,
}

impl DownlinkProcessorBaseband {
    /// Create a baseband processor reading symbols from `pdxch`
    ///
    /// Also returns the controllers of its CFO and transmit time offset.
    pub fn new(
        config: &DownlinkProcessorConfig,
        symbols: SymbolSizeTable,
        pdxch: Arc<dyn PdxchBaseband>,
        amplitude: Arc<dyn AmplitudeController>,
    ) -> (Self, CfoController, TxTimeOffsetController) {
        let (cfo, cfo_controller) =
            CfoProcessor::new(config.srate.to_hz() as f64, config.cfo_queue_size);
        let tx_time_offset = Arc::new(AtomicI64::new(0));
        let stage = SymbolStage {
            buffer: BasebandBuffer::new(config.nof_tx_ports, symbols.max_symbol_size()),
            start: 0,
            len: 0,
            processed: false,
        };

        let baseband = Self {
            sector: config.sector_id,
            nof_tx_ports: config.nof_tx_ports,
            nof_slot_tti_in_advance: config.nof_slot_tti_in_advance,
            modulation_lead_slots: config.modulation_lead_slots,
            slot_duration: config.scs.slot_duration(),
            symbols,
            tx_time_offset: Arc::clone(&tx_time_offset),
            timing_notifier: None,
            state: StreamState::Aligning,
            producer: SymbolProducer {
                sector: config.sector_id,
                pdxch,
                amplitude,
                cfo,
                metrics_notifier: None,
            },
            stage,
        };
        let tx_controller = TxTimeOffsetController {
            offset: tx_time_offset,
            max_offset: config.max_tx_time_offset,
        };
        (baseband, cfo_controller, tx_controller)
    }

    /// Set the receivers of slot timing and signal metrics
    pub fn connect(
        &mut self,
        timing: Option<Arc<dyn DownlinkTimingNotifier>>,
        metrics: Option<Arc<dyn BasebandMetricsNotifier>>,
    ) {
        self.timing_notifier = timing;
        self.producer.metrics_notifier = metrics;
    }

    /// Fill `buffer` with the samples starting at `timestamp`
    pub fn process(&mut self, buffer: &mut BasebandBuffer, timestamp: BasebandTimestamp) -> TransmitMetadata {
        assert_eq!(buffer.nof_channels(), self.nof_tx_ports, "channel count mismatch");
        let nof_samples = buffer.nof_samples();
        let start = timestamp.saturating_add_signed(self.tx_time_offset.load(Ordering::Relaxed));

        let mut window = TxWindow::new();
        let mut cursor = 0;
        while cursor < nof_samples {
            let now = start + cursor as u64;

            if self.stage.covers(now) {
                let count = self.stage.drain(now, buffer, cursor);
                window.record(cursor, self.stage.processed);
                cursor += count;
                continue;
            }

            let position = self.symbols.locate(now);
            if position.is_slot_boundary() {
                self.handle_slot_boundary(position.slot);
            }

            let remaining = nof_samples - cursor;
            if self.state == StreamState::Aligning {
                let count = (position.symbol_size - position.sample_in_symbol).min(remaining);
                window.record(cursor, false);
                cursor += count;
                continue;
            }

            if position.sample_in_symbol == 0 && position.symbol_size <= remaining {
                let range = cursor..cursor + position.symbol_size;
                let processed = self.producer.produce(&mut buffer.writer(range), &position);
                window.record(cursor, processed);
                cursor += position.symbol_size;
            } else {
                let size = position.symbol_size;
                self.stage.processed = self.producer.produce(&mut self.stage.buffer.writer(0..size), &position);
                self.stage.start = position.symbol_start;
                self.stage.len = size;
            }
        }

        let metadata = window.metadata();
        let active = metadata.active_range(nof_samples);
        if active.is_empty() {
            buffer.zero_range(0..nof_samples);
        } else {
            buffer.zero_range(0..active.start);
            buffer.zero_range(active.end..nof_samples);
        }
        metadata
    }

    fn handle_slot_boundary(&mut self, slot: SlotPoint) {
        let first_announced = match self.state {
            StreamState::Aligning => {
                let first_announced = slot + self.nof_slot_tti_in_advance;
                debug!("Aligned to slot {}, first announced slot {}", slot, first_announced);
                first_announced
            }
            StreamState::Streaming { last_boundary, first_announced } => {
                if slot <= last_boundary {
                    return;
                }
                first_announced
            }
        };
        self.state = StreamState::Streaming {
            last_boundary: slot,
            first_announced,
        };

        if let Some(notifier) = &self.timing_notifier {
            notifier.on_tti_boundary(&LowerPhyTimingContext {
                slot: slot + self.nof_slot_tti_in_advance,
                time_point: Instant::now() + self.slot_duration * self.nof_slot_tti_in_advance,
            });
        }

        // Slots before the first announced one were never offered to the upper layers.
        let modulated_slot = slot + self.modulation_lead_slots;
        if modulated_slot >= first_announced {
            let result = self.producer.pdxch.process_slot(&SlotContext {
                slot: modulated_slot,
                sector: self.sector,
            });
            if result != PdxchSlotResult::Dispatched {
                trace!("Slot {}: {:?}", modulated_slot, result);
            }
        }
    }
}
