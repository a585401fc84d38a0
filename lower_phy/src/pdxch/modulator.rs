//! PDxCH Slot Modulator
//!
//! Modulates every symbol and port of one slot as independent executor tasks. The
//! modulator state is a single atomic counter: zero when idle, otherwise the busy flag plus
//! the number of tasks still running. The task that brings the counter down to the bare
//! busy flag completes the slot and returns the modulator to idle.

use super::slot_buffer::SlotBuffer;
use crate::metrics::{PowerAccumulator, SlotModulationMetrics};
use interfaces::{
    AmplitudeController, OfdmSymbolModulator, ResourceGridContext, ResourceGridReader,
    SharedResourceGrid, TaskExecutor,
};
use num_complex::Complex32;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

const IDLE: u32 = 0;
const BUSY: u32 = 1 << 31;

/// Poll period of `wait_for_completion`
const COMPLETION_POLL_PERIOD: Duration = Duration::from_micros(100);

/// Receives modulated slots
pub trait ModulationNotifier: Send + Sync {
    /// Every unit of the slot described by `context` has been written into `buffer`
    fn on_modulation_completion(
        &self,
        context: &ResourceGridContext,
        buffer: Arc<SlotBuffer>,
        metrics: SlotModulationMetrics,
    );
}

/// Slot being modulated
struct InFlight {
    context: ResourceGridContext,
    grid: SharedResourceGrid,
    buffer: Arc<SlotBuffer>,
}

struct ModulatorShared {
    state: AtomicU32,
    nof_symbols_per_slot: usize,
    ofdm: Arc<dyn OfdmSymbolModulator>,
    amplitude: Arc<dyn AmplitudeController>,
    executor: Arc<dyn TaskExecutor>,
    notifier: Arc<dyn ModulationNotifier>,
    in_flight: Mutex<Option<InFlight>>,
    nof_dropped_units: AtomicUsize,
}

/// Asynchronous modulator of one slot at a time
pub struct PdxchBasebandModulator {
    shared: Arc<ModulatorShared>,
}

impl PdxchBasebandModulator {
    /// Create an idle modulator
    pub fn new(
        nof_symbols_per_slot: usize,
        ofdm: Arc<dyn OfdmSymbolModulator>,
        amplitude: Arc<dyn AmplitudeController>,
        executor: Arc<dyn TaskExecutor>,
        notifier: Arc<dyn ModulationNotifier>,
    ) -> Self {
        Self {
            shared: Arc::new(ModulatorShared {
                state: AtomicU32::new(IDLE),
                nof_symbols_per_slot,
                ofdm,
                amplitude,
                executor,
                notifier,
                in_flight: Mutex::new(None),
                nof_dropped_units: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns true if no slot is being modulated
    pub fn is_idle(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == IDLE
    }

    /// Start modulating a slot into `buffer`
    ///
    /// Returns false without side effects if the buffer or the grid cannot be used, or if
    /// a slot is already being modulated.
    pub fn handle_request(
        &self,
        buffer: Arc<SlotBuffer>,
        grid: SharedResourceGrid,
        context: ResourceGridContext,
    ) -> bool {
        let shared = &self.shared;
        let Some(reader) = grid.reader() else {
            warn!("Slot {}: invalid resource grid", context.slot);
            return false;
        };
        if buffer.nof_symbols() != shared.nof_symbols_per_slot
            || buffer.nof_ports() == 0
            || reader.nof_ports() < buffer.nof_ports()
            || reader.nof_symbols() < buffer.nof_symbols()
        {
            warn!(
                "Slot {}: buffer of {} symbols x {} ports does not fit the request",
                context.slot,
                buffer.nof_symbols(),
                buffer.nof_ports()
            );
            return false;
        }
        if reader.nof_subc() != shared.ofdm.nof_subcarriers() {
            warn!(
                "Slot {}: resource grid of {} subcarriers, modulator expects {}",
                context.slot,
                reader.nof_subc(),
                shared.ofdm.nof_subcarriers()
            );
            return false;
        }

        let nof_tasks = (buffer.nof_symbols() * buffer.nof_ports()) as u32;
        if shared
            .state
            .compare_exchange(IDLE, BUSY + nof_tasks, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let first_symbol =
            context.slot.slot_in_subframe() as usize * shared.nof_symbols_per_slot;
        buffer.prepare(|symbol| shared.ofdm.symbol_size(first_symbol + symbol));
        shared.nof_dropped_units.store(0, Ordering::Relaxed);
        *shared.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = Some(InFlight {
            context,
            grid: grid.clone(),
            buffer: Arc::clone(&buffer),
        });
        trace!("Slot {}: dispatching {} modulation tasks", context.slot, nof_tasks);

        for symbol in 0..buffer.nof_symbols() {
            for port in 0..buffer.nof_ports() {
                let mut unit = UnitTask {
                    shared: Arc::clone(shared),
                    buffer: Arc::clone(&buffer),
                    grid: grid.clone(),
                    symbol,
                    port,
                    symbol_in_subframe: first_symbol + symbol,
                    modulated: false,
                };
                // A refused task is dropped by the executor, which silences its unit.
                let accepted = shared.executor.defer(Box::new(move || unit.run()));
                if !accepted {
                    warn!(
                        "Slot {}: executor refused symbol {} port {}, transmitting silence",
                        context.slot, symbol, port
                    );
                }
            }
        }
        true
    }

    /// Block until the modulator is idle
    pub fn wait_for_completion(&self) {
        while !self.is_idle() {
            std::thread::sleep(COMPLETION_POLL_PERIOD);
        }
    }
}

/// Modulation of one (symbol, port) unit
///
/// The unit counts as complete when the task is dropped, whether it ran, panicked or was
/// discarded by the executor. Units that were not modulated are transmitted as silence.
struct UnitTask {
    shared: Arc<ModulatorShared>,
    buffer: Arc<SlotBuffer>,
    grid: SharedResourceGrid,
    symbol: usize,
    port: usize,
    symbol_in_subframe: usize,
    modulated: bool,
}

impl UnitTask {
    fn run(&mut self) {
        self.shared
            .modulate_unit(&self.grid, &self.buffer, self.symbol, self.port, self.symbol_in_subframe);
        self.modulated = true;
    }
}

impl Drop for UnitTask {
    fn drop(&mut self) {
        self.grid.release();
        if !self.modulated {
            self.buffer.silence_unit(self.symbol, self.port);
            self.shared.nof_dropped_units.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.complete_unit();
    }
}

impl ModulatorShared {
    fn modulate_unit(
        &self,
        grid: &SharedResourceGrid,
        buffer: &SlotBuffer,
        symbol: usize,
        port: usize,
        symbol_in_subframe: usize,
    ) {
        let mut unit = buffer.unit(symbol, port);
        match grid.reader() {
            Some(reader) => {
                self.ofdm.modulate(&mut unit.samples, reader, port, symbol_in_subframe);
                unit.metrics = Some(self.amplitude.process(&mut unit.samples));
            }
            None => unit.samples.fill(Complex32::new(0.0, 0.0)),
        }
    }

    fn complete_unit(&self) {
        let previous = self.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > BUSY, "task completed on an idle modulator");
        if previous == BUSY + 1 {
            self.finish_slot();
        }
    }

    fn finish_slot(&self) {
        let in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(InFlight { context, mut grid, buffer }) = in_flight {
            grid.release();

            let mut accumulator = PowerAccumulator::default();
            for symbol in 0..buffer.nof_symbols() {
                for port in 0..buffer.nof_ports() {
                    if let Some(metrics) = buffer.unit(symbol, port).metrics {
                        accumulator.add(&metrics);
                    }
                }
            }
            let metrics = SlotModulationMetrics {
                signal: accumulator.finish(),
                nof_measured_units: accumulator.nof_blocks(),
                nof_dropped_units: self.nof_dropped_units.load(Ordering::Relaxed),
            };
            debug!(
                "Slot {} modulated: measured={}, dropped={}",
                context.slot, metrics.nof_measured_units, metrics.nof_dropped_units
            );
            self.notifier.on_modulation_completion(&context, buffer, metrics);
        }

        self.state.store(IDLE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amplitude_control::AmplitudeClipper;
    use crate::config::{AmplitudeControlConfig, DownlinkProcessorConfig};
    use crate::executor::InlineTaskExecutor;
    use crate::ofdm::FftOfdmModulator;
    use common::{CyclicPrefix, SamplingRate, SlotPoint, SubcarrierSpacing};
    use interfaces::{ResourceGrid, Task};
    use rand::seq::SliceRandom;

    const NOF_SUBC: usize = 72;

    /// Holds tasks until the test runs them
    #[derive(Default)]
    struct CollectingExecutor {
        tasks: Mutex<Vec<Task>>,
    }

    impl CollectingExecutor {
        fn take(&self) -> Vec<Task> {
            std::mem::take(&mut *self.tasks.lock().unwrap())
        }
    }

    impl TaskExecutor for CollectingExecutor {
        fn defer(&self, task: Task) -> bool {
            self.tasks.lock().unwrap().push(task);
            true
        }
    }

    /// Accepts only the first `capacity` tasks, running them inline
    struct LimitedExecutor {
        capacity: AtomicUsize,
    }

    impl TaskExecutor for LimitedExecutor {
        fn defer(&self, task: Task) -> bool {
            let accepted = self
                .capacity
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
                .is_ok();
            if accepted {
                task();
            }
            accepted
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        completions: Mutex<Vec<(ResourceGridContext, SlotModulationMetrics)>>,
    }

    impl ModulationNotifier for RecordingNotifier {
        fn on_modulation_completion(
            &self,
            context: &ResourceGridContext,
            _buffer: Arc<SlotBuffer>,
            metrics: SlotModulationMetrics,
        ) {
            self.completions.lock().unwrap().push((*context, metrics));
        }
    }

    fn ofdm() -> Arc<FftOfdmModulator> {
        let config = DownlinkProcessorConfig::new(
            SubcarrierSpacing::Scs15,
            CyclicPrefix::Normal,
            SamplingRate::from_mhz(1.92),
            2,
            NOF_SUBC,
        );
        Arc::new(FftOfdmModulator::new(&config).unwrap())
    }

    fn modulator(
        executor: Arc<dyn TaskExecutor>,
        notifier: Arc<RecordingNotifier>,
    ) -> PdxchBasebandModulator {
        PdxchBasebandModulator::new(
            14,
            ofdm(),
            Arc::new(AmplitudeClipper::new(&AmplitudeControlConfig::default())),
            executor,
            notifier,
        )
    }

    fn grid() -> SharedResourceGrid {
        let mut grid = ResourceGrid::new(2, 14, NOF_SUBC);
        for symbol in 0..14 {
            grid.put(0, symbol, 0, &[Complex32::new(1.0, 0.0); NOF_SUBC]).unwrap();
            grid.put(1, symbol, 0, &[Complex32::new(0.0, 1.0); NOF_SUBC]).unwrap();
        }
        SharedResourceGrid::from_grid(grid)
    }

    fn context(slot_index: u32) -> ResourceGridContext {
        ResourceGridContext {
            slot: SlotPoint::new(SubcarrierSpacing::Scs15, 0, slot_index),
            sector: 0,
        }
    }

    #[test]
    fn test_inline_modulation_matches_ofdm() {
        let notifier = Arc::new(RecordingNotifier::default());
        let modulator = modulator(Arc::new(InlineTaskExecutor), Arc::clone(&notifier));
        let buffer = Arc::new(SlotBuffer::new(2, 14, 160));
        let grid = grid();

        assert!(modulator.handle_request(Arc::clone(&buffer), grid.clone(), context(1)));
        assert!(modulator.is_idle());
        // Only the caller's handle remains once the slot completed.
        assert_eq!(grid.ref_count(), 1);

        let ofdm = ofdm();
        let mut expected = vec![Complex32::new(0.0, 0.0); ofdm.symbol_size(7)];
        ofdm.modulate(&mut expected, grid.reader().unwrap(), 1, 7);
        assert_eq!(buffer.unit(7, 1).samples, expected);

        let completions = notifier.completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].0, context(1));
        assert_eq!(completions[0].1.nof_measured_units, 28);
        assert_eq!(completions[0].1.nof_dropped_units, 0);
        assert!(completions[0].1.signal.is_some());
    }

    #[test]
    fn test_busy_modulator_rejects_request() {
        let executor = Arc::new(CollectingExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let modulator = modulator(executor.clone(), Arc::clone(&notifier));

        assert!(modulator.handle_request(Arc::new(SlotBuffer::new(2, 14, 160)), grid(), context(0)));
        assert!(!modulator.is_idle());
        assert!(!modulator.handle_request(Arc::new(SlotBuffer::new(2, 14, 160)), grid(), context(1)));

        for task in executor.take() {
            task();
        }
        assert!(modulator.is_idle());
        assert_eq!(notifier.completions.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        let notifier = Arc::new(RecordingNotifier::default());
        let modulator = modulator(Arc::new(InlineTaskExecutor), Arc::clone(&notifier));

        let buffer = Arc::new(SlotBuffer::new(2, 14, 160));
        assert!(!modulator.handle_request(Arc::clone(&buffer), SharedResourceGrid::default(), context(0)));
        assert!(!modulator.handle_request(Arc::new(SlotBuffer::new(2, 12, 160)), grid(), context(0)));
        assert!(!modulator.handle_request(Arc::new(SlotBuffer::new(3, 14, 160)), grid(), context(0)));
        assert!(modulator.is_idle());
        assert!(notifier.completions.lock().unwrap().is_empty());
    }

    #[test]
    fn test_grid_bandwidth_mismatch_is_rejected() {
        let executor = Arc::new(CollectingExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let modulator = modulator(executor.clone(), Arc::clone(&notifier));

        let narrow = SharedResourceGrid::from_grid(ResourceGrid::new(2, 14, 48));
        assert!(!modulator.handle_request(Arc::new(SlotBuffer::new(2, 14, 160)), narrow.clone(), context(0)));
        assert!(modulator.is_idle());
        assert!(executor.take().is_empty());
        assert_eq!(narrow.ref_count(), 1);

        // The modulator remains usable.
        assert!(modulator.handle_request(Arc::new(SlotBuffer::new(2, 14, 160)), grid(), context(4)));
        executor.take().into_iter().for_each(|task| task());
        assert!(modulator.is_idle());
        assert_eq!(notifier.completions.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_discarded_tasks_complete_the_slot() {
        let executor = Arc::new(CollectingExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let modulator = modulator(executor.clone(), Arc::clone(&notifier));
        let buffer = Arc::new(SlotBuffer::new(2, 14, 160));
        let grid = grid();

        assert!(modulator.handle_request(Arc::clone(&buffer), grid.clone(), context(3)));
        let mut tasks = executor.take();
        let discarded = tasks.split_off(20);
        tasks.into_iter().for_each(|task| task());
        assert!(!modulator.is_idle());

        drop(discarded);
        assert!(modulator.is_idle());
        assert_eq!(grid.ref_count(), 1);
        // Tasks are queued symbol by symbol, so symbols 10 to 13 were discarded.
        assert!(buffer.unit(12, 0).samples.iter().all(|s| s.norm() == 0.0));
        assert!(buffer.unit(9, 1).samples.iter().any(|s| s.norm() > 0.0));

        let completions = notifier.completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].1.nof_measured_units, 20);
        assert_eq!(completions[0].1.nof_dropped_units, 8);
    }

    /// Fails on one symbol of the subframe
    struct FailingOfdm {
        inner: Arc<FftOfdmModulator>,
        failing_symbol: usize,
    }

    impl OfdmSymbolModulator for FailingOfdm {
        fn nof_subcarriers(&self) -> usize {
            self.inner.nof_subcarriers()
        }

        fn symbol_size(&self, symbol_in_subframe: usize) -> usize {
            self.inner.symbol_size(symbol_in_subframe)
        }

        fn modulate(
            &self,
            output: &mut [Complex32],
            grid: &dyn ResourceGridReader,
            port: usize,
            symbol_in_subframe: usize,
        ) {
            assert_ne!(symbol_in_subframe, self.failing_symbol, "modulation failed");
            self.inner.modulate(output, grid, port, symbol_in_subframe);
        }

        fn set_center_frequency(&self, center_freq_hz: f64) -> bool {
            self.inner.set_center_frequency(center_freq_hz)
        }
    }

    /// Runs tasks inline and contains their panics
    struct CatchingExecutor;

    impl TaskExecutor for CatchingExecutor {
        fn defer(&self, task: Task) -> bool {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
            true
        }
    }

    #[test]
    fn test_panicking_task_completes_the_slot() {
        let notifier = Arc::new(RecordingNotifier::default());
        let modulator = PdxchBasebandModulator::new(
            14,
            Arc::new(FailingOfdm {
                inner: ofdm(),
                failing_symbol: 3,
            }),
            Arc::new(AmplitudeClipper::new(&AmplitudeControlConfig::default())),
            Arc::new(CatchingExecutor),
            notifier.clone(),
        );
        let buffer = Arc::new(SlotBuffer::new(2, 14, 160));
        let grid = grid();

        assert!(modulator.handle_request(Arc::clone(&buffer), grid.clone(), context(0)));
        assert!(modulator.is_idle());
        assert_eq!(grid.ref_count(), 1);
        assert!(buffer.unit(3, 1).samples.iter().all(|s| s.norm() == 0.0));

        let completions = notifier.completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].1.nof_measured_units, 26);
        assert_eq!(completions[0].1.nof_dropped_units, 2);

        // The next slot is accepted.
        drop(completions);
        assert!(modulator.handle_request(Arc::clone(&buffer), grid.clone(), context(1)));
        assert_eq!(notifier.completions.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_exactly_once_completion_under_random_order() {
        for round in 0..20u32 {
            let executor = Arc::new(CollectingExecutor::default());
            let notifier = Arc::new(RecordingNotifier::default());
            let modulator = modulator(executor.clone(), Arc::clone(&notifier));
            let grid = grid();

            assert!(modulator.handle_request(
                Arc::new(SlotBuffer::new(2, 14, 160)),
                grid.clone(),
                context(round % 10)
            ));

            let mut tasks = executor.take();
            assert_eq!(tasks.len(), 28);
            tasks.shuffle(&mut rand::thread_rng());

            let mut batches: Vec<Vec<Task>> = (0..4).map(|_| Vec::new()).collect();
            for (i, task) in tasks.into_iter().enumerate() {
                batches[i % 4].push(task);
            }
            let handles: Vec<_> = batches
                .into_iter()
                .map(|batch| {
                    std::thread::spawn(move || {
                        for task in batch {
                            task();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            modulator.wait_for_completion();
            assert_eq!(notifier.completions.lock().unwrap().len(), 1);
            assert_eq!(grid.ref_count(), 1);
        }
    }

    #[test]
    fn test_refused_units_are_silenced() {
        let executor = Arc::new(LimitedExecutor {
            capacity: AtomicUsize::new(10),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let modulator = modulator(executor, Arc::clone(&notifier));
        let buffer = Arc::new(SlotBuffer::new(2, 14, 160));

        assert!(modulator.handle_request(Arc::clone(&buffer), grid(), context(2)));
        assert!(modulator.is_idle());

        // Units are dispatched symbol by symbol, so the last refused unit is symbol 13 port 1.
        assert!(buffer.unit(13, 1).samples.iter().all(|s| s.norm() == 0.0));
        assert!(buffer.unit(0, 0).samples.iter().any(|s| s.norm() > 0.0));

        let completions = notifier.completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].1.nof_measured_units, 10);
        assert_eq!(completions[0].1.nof_dropped_units, 18);
    }
}
