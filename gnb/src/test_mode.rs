//! Standalone downlink test run
//!
//! Stands in for the upper PHY and the radio: random QPSK resource grids are produced on
//! every TTI boundary and the baseband is pulled buffer by buffer, optionally dumped to a
//! file.

use crate::config::TestModeConfig;
use anyhow::{Context, Result};
use interfaces::{BasebandBuffer, ResourceGridContext, ResourceGridPool};
use lower_phy::{
    BasebandMetrics, BasebandMetricsNotifier, DownlinkProcessor, DownlinkProcessorConfig,
    DownlinkTimingNotifier, LowerPhyTimingContext, PdxchProcessorNotifier, PdxchRequestHandler,
    SlotModulationMetrics,
};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Produces a random QPSK resource grid for every announced slot
pub struct GridGenerator {
    pool: ResourceGridPool,
    handler: Arc<dyn PdxchRequestHandler>,
    sector: u32,
    nof_ports: usize,
    nof_symbols: usize,
    first_subc: usize,
    nof_loaded_subc: usize,
    rng: Mutex<StdRng>,
    nof_grids: AtomicU64,
    nof_pool_exhausted: AtomicU64,
}

impl GridGenerator {
    /// Create a generator filling `load` of the subcarriers, centered in the grid
    pub fn new(
        config: &DownlinkProcessorConfig,
        handler: Arc<dyn PdxchRequestHandler>,
        load: f32,
        seed: u64,
    ) -> Self {
        let nof_subc = config.ofdm.nof_subcarriers;
        let nof_loaded_subc = ((nof_subc as f32 * load.clamp(0.0, 1.0)) as usize / 12) * 12;
        let nof_symbols = config.nof_symbols_per_slot();
        // Grids are held by queued requests and by the modulators.
        let capacity = config.request_pool_size + config.nof_modulators;

        Self {
            pool: ResourceGridPool::new(capacity, config.nof_tx_ports, nof_symbols, nof_subc),
            handler,
            sector: config.sector_id,
            nof_ports: config.nof_tx_ports,
            nof_symbols,
            first_subc: (nof_subc - nof_loaded_subc) / 2,
            nof_loaded_subc,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            nof_grids: AtomicU64::new(0),
            nof_pool_exhausted: AtomicU64::new(0),
        }
    }

    /// Number of grids handed to the downlink processor
    pub fn nof_grids(&self) -> u64 {
        self.nof_grids.load(Ordering::Relaxed)
    }

    /// Number of slots skipped because no grid was available
    pub fn nof_pool_exhausted(&self) -> u64 {
        self.nof_pool_exhausted.load(Ordering::Relaxed)
    }

    fn random_qpsk(&self, count: usize) -> Vec<Complex32> {
        let amplitude = std::f32::consts::FRAC_1_SQRT_2;
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        (0..count)
            .map(|_| {
                let re = if rng.gen_bool(0.5) { amplitude } else { -amplitude };
                let im = if rng.gen_bool(0.5) { amplitude } else { -amplitude };
                Complex32::new(re, im)
            })
            .collect()
    }
}

impl DownlinkTimingNotifier for GridGenerator {
    fn on_tti_boundary(&self, context: &LowerPhyTimingContext) {
        let mut grid = match self.pool.allocate() {
            Ok(grid) => grid,
            Err(e) => {
                self.nof_pool_exhausted.fetch_add(1, Ordering::Relaxed);
                warn!("Slot {}: no resource grid available: {}", context.slot, e);
                return;
            }
        };

        if self.nof_loaded_subc > 0 {
            let Some(writer) = grid.writer() else {
                warn!("Slot {}: resource grid is shared, skipping", context.slot);
                return;
            };
            for port in 0..self.nof_ports {
                for symbol in 0..self.nof_symbols {
                    let values = self.random_qpsk(self.nof_loaded_subc);
                    if let Err(e) = writer.put(port, symbol, self.first_subc, &values) {
                        warn!("Slot {}: {}", context.slot, e);
                        return;
                    }
                }
            }
        }

        self.nof_grids.fetch_add(1, Ordering::Relaxed);
        self.handler.handle_request(
            grid,
            ResourceGridContext {
                slot: context.slot,
                sector: self.sector,
            },
        );
    }
}

/// Counters fed by the downlink processor notifications
#[derive(Debug, Default)]
pub struct DownlinkStats {
    nof_late: AtomicU64,
    nof_overloaded_slots: AtomicU64,
    nof_dropped_units: AtomicU64,
    nof_modulated: AtomicU64,
    last_metrics: Mutex<Option<BasebandMetrics>>,
}

impl DownlinkStats {
    pub fn nof_late(&self) -> u64 {
        self.nof_late.load(Ordering::Relaxed)
    }

    pub fn nof_modulated(&self) -> u64 {
        self.nof_modulated.load(Ordering::Relaxed)
    }

    pub fn nof_overloaded_slots(&self) -> u64 {
        self.nof_overloaded_slots.load(Ordering::Relaxed)
    }

    /// Log the current counters
    pub fn report(&self) {
        info!("Downlink statistics:");
        info!(
            "  Modulated slots: {}, late slots: {}",
            self.nof_modulated(),
            self.nof_late()
        );
        info!(
            "  Overloaded slots: {}, dropped units: {}",
            self.nof_overloaded_slots(),
            self.nof_dropped_units.load(Ordering::Relaxed)
        );
        let last_metrics = *self.last_metrics.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(metrics) = last_metrics {
            info!(
                "  Baseband power: {:.1} dB, PAPR: {:.1} dB",
                metrics.avg_power_db(),
                metrics.papr_db()
            );
            if let Some(clipping) = metrics.clipping {
                info!("  Clipping ratio: {:.2e}", clipping.ratio());
            }
        }
    }
}

impl PdxchProcessorNotifier for DownlinkStats {
    fn on_pdxch_request_late(&self, context: &ResourceGridContext) {
        self.nof_late.fetch_add(1, Ordering::Relaxed);
        debug!("Slot {}: late", context.slot);
    }

    fn on_pdxch_modulation_overload(&self, context: &ResourceGridContext, nof_dropped_units: usize) {
        self.nof_overloaded_slots.fetch_add(1, Ordering::Relaxed);
        self.nof_dropped_units
            .fetch_add(nof_dropped_units as u64, Ordering::Relaxed);
        warn!("Slot {}: {} units not modulated", context.slot, nof_dropped_units);
    }

    fn on_pdxch_slot_modulated(&self, _context: &ResourceGridContext, _metrics: &SlotModulationMetrics) {
        self.nof_modulated.fetch_add(1, Ordering::Relaxed);
    }
}

impl BasebandMetricsNotifier for DownlinkStats {
    fn on_new_metrics(&self, metrics: &BasebandMetrics) {
        *self.last_metrics.lock().unwrap_or_else(PoisonError::into_inner) = Some(*metrics);
    }
}

/// Totals of a baseband run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub nof_buffers: u64,
    pub nof_empty_buffers: u64,
    pub nof_samples: u64,
}

/// Pull `settings.nof_slots` slots of baseband from the processor
///
/// Stops early when `running` is cleared.
pub fn run_baseband(
    processor: &mut DownlinkProcessor,
    config: &DownlinkProcessorConfig,
    settings: &TestModeConfig,
    running: &AtomicBool,
) -> Result<RunSummary> {
    let samples_per_slot =
        (config.srate.samples_per_subframe() / config.scs.nof_slots_per_subframe() as usize) as u64;
    let total_samples = samples_per_slot * settings.nof_slots as u64;
    let buffer_size = settings.buffer_size.max(1);
    let srate_hz = config.srate.to_hz() as f64;

    let mut iq_writer = match &settings.iq_file {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path))?,
        )),
        None => None,
    };

    let mut buffer = BasebandBuffer::new(config.nof_tx_ports, buffer_size);
    let mut summary = RunSummary::default();
    let started = Instant::now();
    let mut timestamp = 0;

    while timestamp < total_samples && running.load(Ordering::Acquire) {
        let metadata = processor.baseband_mut().process(&mut buffer, timestamp);
        summary.nof_buffers += 1;
        if metadata.is_empty {
            summary.nof_empty_buffers += 1;
        }

        if let Some(writer) = iq_writer.as_mut() {
            for sample in buffer.channel(0) {
                writer.write_all(&sample.re.to_le_bytes())?;
                writer.write_all(&sample.im.to_le_bytes())?;
            }
        }

        timestamp += buffer_size as u64;
        summary.nof_samples += buffer_size as u64;

        if settings.realtime {
            let due = Duration::from_secs_f64(timestamp as f64 / srate_hz);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
    }

    if let Some(mut writer) = iq_writer {
        writer.flush()?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CyclicPrefix, SamplingRate, SlotPoint, SubcarrierSpacing};
    use interfaces::{ResourceGridReader, SharedResourceGrid};
    use lower_phy::{DownlinkNotifiers, InlineTaskExecutor};

    fn test_config() -> DownlinkProcessorConfig {
        DownlinkProcessorConfig::new(
            SubcarrierSpacing::Scs15,
            CyclicPrefix::Normal,
            SamplingRate::from_mhz(1.92),
            1,
            72,
        )
    }

    #[derive(Default)]
    struct RecordingHandler {
        requests: Mutex<Vec<(SharedResourceGrid, ResourceGridContext)>>,
    }

    impl PdxchRequestHandler for RecordingHandler {
        fn handle_request(&self, grid: SharedResourceGrid, context: ResourceGridContext) {
            self.requests.lock().unwrap().push((grid, context));
        }
    }

    fn announce(generator: &GridGenerator, slot_index: u32) {
        generator.on_tti_boundary(&LowerPhyTimingContext {
            slot: SlotPoint::new(SubcarrierSpacing::Scs15, 0, slot_index),
            time_point: Instant::now(),
        });
    }

    #[test]
    fn test_generator_fills_loaded_subcarriers() {
        let handler = Arc::new(RecordingHandler::default());
        let generator = GridGenerator::new(&test_config(), handler.clone(), 0.5, 7);

        announce(&generator, 3);
        assert_eq!(generator.nof_grids(), 1);

        let requests = handler.requests.lock().unwrap();
        let (grid, context) = &requests[0];
        assert_eq!(context.slot.slot_index(), 3);
        let grid = grid.reader().unwrap();
        assert_eq!(grid.nof_symbols(), 14);

        // 36 of 72 subcarriers loaded, centered.
        let symbol = grid.symbol(0, 5);
        for (k, value) in symbol.iter().enumerate() {
            if (18..54).contains(&k) {
                assert!((value.norm() - 1.0).abs() < 1e-6);
            } else {
                assert_eq!(*value, Complex32::new(0.0, 0.0));
            }
        }
    }

    #[test]
    fn test_generator_skips_slots_when_pool_exhausted() {
        let config = test_config();
        let capacity = config.request_pool_size + config.nof_modulators;
        let handler = Arc::new(RecordingHandler::default());
        let generator = GridGenerator::new(&config, handler.clone(), 1.0, 7);

        for slot_index in 0..capacity as u32 + 2 {
            announce(&generator, slot_index % 10);
        }
        assert_eq!(generator.nof_grids(), capacity as u64);
        assert_eq!(generator.nof_pool_exhausted(), 2);

        // Released grids return to the pool.
        handler.requests.lock().unwrap().clear();
        announce(&generator, 0);
        assert_eq!(generator.nof_grids(), capacity as u64 + 1);
    }

    #[test]
    fn test_stats_count_notifications() {
        let stats = DownlinkStats::default();
        let context = ResourceGridContext {
            slot: SlotPoint::new(SubcarrierSpacing::Scs15, 0, 0),
            sector: 0,
        };
        stats.on_pdxch_request_late(&context);
        stats.on_pdxch_modulation_overload(&context, 3);
        stats.on_pdxch_slot_modulated(&context, &SlotModulationMetrics::default());
        stats.on_new_metrics(&BasebandMetrics {
            avg_power: 1.0,
            peak_power: 4.0,
            clipping: None,
        });

        assert_eq!(stats.nof_late(), 1);
        assert_eq!(stats.nof_overloaded_slots(), 1);
        assert_eq!(stats.nof_dropped_units.load(Ordering::Relaxed), 3);
        assert_eq!(stats.nof_modulated(), 1);
        assert!(stats.last_metrics.lock().unwrap().is_some());
    }

    #[test]
    fn test_run_baseband_transmits_announced_slots() {
        let config = test_config();
        let mut processor =
            DownlinkProcessor::from_config(config.clone(), Arc::new(InlineTaskExecutor)).unwrap();
        let stats = Arc::new(DownlinkStats::default());
        let generator = Arc::new(GridGenerator::new(&config, processor.request_handler(), 1.0, 1));
        processor.connect(DownlinkNotifiers {
            timing: Some(generator.clone()),
            metrics: Some(stats.clone()),
            pdxch: Some(stats.clone()),
        });

        let iq_path = std::env::temp_dir().join(format!("dl_lower_phy_{}.iq", std::process::id()));
        let settings = TestModeConfig {
            nof_slots: 6,
            buffer_size: 480,
            iq_file: Some(iq_path.to_string_lossy().into_owned()),
            ..TestModeConfig::default()
        };
        let running = AtomicBool::new(true);
        let summary = run_baseband(&mut processor, &config, &settings, &running).unwrap();
        processor.stop();

        assert_eq!(summary.nof_buffers, 24);
        assert_eq!(summary.nof_samples, 6 * 1920);
        // Slots 0 and 1 were never announced, slots 2 to 5 carry signal.
        assert_eq!(summary.nof_empty_buffers, 8);
        assert_eq!(generator.nof_grids(), 6);
        assert_eq!(stats.nof_modulated(), 5);

        let iq_len = std::fs::metadata(&iq_path).unwrap().len();
        assert_eq!(iq_len, 6 * 1920 * 8);
        std::fs::remove_file(&iq_path).unwrap();
    }

    #[test]
    fn test_run_baseband_stops_when_cleared() {
        let config = test_config();
        let mut processor =
            DownlinkProcessor::from_config(config.clone(), Arc::new(InlineTaskExecutor)).unwrap();
        let running = AtomicBool::new(false);
        let summary =
            run_baseband(&mut processor, &config, &TestModeConfig::default(), &running).unwrap();
        assert_eq!(summary, RunSummary::default());
    }
}
