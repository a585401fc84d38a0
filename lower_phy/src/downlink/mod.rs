//! Downlink Processor
//!
//! Wires the PDxCH processor to the baseband processor and exposes a single lifecycle and
//! the control surfaces of the downlink lower PHY.

pub mod baseband;
pub mod symbol_sizes;

use crate::amplitude_control::AmplitudeClipper;
use crate::cfo::{CfoCommand, CfoController};
use crate::config::DownlinkProcessorConfig;
use crate::notifiers::{BasebandMetricsNotifier, DownlinkTimingNotifier, PdxchProcessorNotifier};
use crate::ofdm::FftOfdmModulator;
use crate::pdxch::{CenterFrequencyController, PdxchProcessor, PdxchRequestHandler};
use crate::LowerPhyError;
use interfaces::{AmplitudeController, OfdmSymbolModulator, TaskExecutor};
use std::sync::Arc;
use tracing::info;

pub use baseband::{DownlinkProcessorBaseband, TxTimeOffsetController};
pub use symbol_sizes::{SymbolPosition, SymbolSizeTable};

/// Collaborators of the downlink processor
pub struct DownlinkProcessorDependencies {
    pub ofdm: Arc<dyn OfdmSymbolModulator>,
    pub executor: Arc<dyn TaskExecutor>,
    /// Applied by the modulation tasks
    pub modulation_amplitude: Arc<dyn AmplitudeController>,
    /// Applied after CFO correction
    pub baseband_amplitude: Arc<dyn AmplitudeController>,
}

/// Receivers of the downlink processor events
#[derive(Default, Clone)]
pub struct DownlinkNotifiers {
    pub timing: Option<Arc<dyn DownlinkTimingNotifier>>,
    pub metrics: Option<Arc<dyn BasebandMetricsNotifier>>,
    pub pdxch: Option<Arc<dyn PdxchProcessorNotifier>>,
}

/// Control surfaces usable from any thread
#[derive(Clone)]
pub struct DownlinkControllers {
    pub cfo: CfoController,
    pub tx_time_offset: TxTimeOffsetController,
    pub center_frequency: Arc<dyn CenterFrequencyController>,
}

/// Downlink lower PHY processor
pub struct DownlinkProcessor {
    pdxch: Arc<PdxchProcessor>,
    baseband: DownlinkProcessorBaseband,
    controllers: DownlinkControllers,
}

impl DownlinkProcessor {
    /// Create a processor from its collaborators
    pub fn new(
        config: DownlinkProcessorConfig,
        dependencies: DownlinkProcessorDependencies,
    ) -> Result<Self, LowerPhyError> {
        config.validate()?;

        let symbols = SymbolSizeTable::new(
            config.scs,
            config.nof_symbols_per_slot(),
            config.srate.samples_per_subframe(),
            dependencies.ofdm.as_ref(),
        )?;
        let pdxch = Arc::new(PdxchProcessor::new(
            &config,
            dependencies.ofdm,
            dependencies.modulation_amplitude,
            dependencies.executor,
        ));
        let (baseband, cfo, tx_time_offset) = DownlinkProcessorBaseband::new(
            &config,
            symbols,
            pdxch.clone(),
            dependencies.baseband_amplitude,
        );

        info!(
            "Created downlink processor: sector={}, scs={}kHz, srate={}, ports={}, tti_advance={}",
            config.sector_id,
            config.scs.to_khz(),
            config.srate,
            config.nof_tx_ports,
            config.nof_slot_tti_in_advance
        );

        Ok(Self {
            controllers: DownlinkControllers {
                cfo,
                tx_time_offset,
                center_frequency: pdxch.clone(),
            },
            pdxch,
            baseband,
        })
    }

    /// Create a processor with the FFT modulator and clippers described by `config`
    pub fn from_config(
        config: DownlinkProcessorConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, LowerPhyError> {
        config.validate()?;
        let dependencies = DownlinkProcessorDependencies {
            ofdm: Arc::new(FftOfdmModulator::new(&config)?),
            executor,
            modulation_amplitude: Arc::new(AmplitudeClipper::new(&config.modulation_amplitude)),
            baseband_amplitude: Arc::new(AmplitudeClipper::new(&config.baseband_amplitude)),
        };
        Self::new(config, dependencies)
    }

    /// Connect the event receivers
    pub fn connect(&mut self, notifiers: DownlinkNotifiers) {
        if let Some(pdxch) = notifiers.pdxch {
            self.pdxch.connect(pdxch);
        }
        self.baseband.connect(notifiers.timing, notifiers.metrics);
    }

    /// Stop accepting resource grids and wait for the running modulations
    pub fn stop(&self) {
        self.pdxch.stop();
        info!("Downlink processor stopped");
    }

    /// Entry point for resource grids
    pub fn request_handler(&self) -> Arc<dyn PdxchRequestHandler> {
        self.pdxch.clone()
    }

    /// Baseband processor, to be driven by the radio thread
    pub fn baseband_mut(&mut self) -> &mut DownlinkProcessorBaseband {
        &mut self.baseband
    }

    /// Control surfaces
    pub fn controllers(&self) -> DownlinkControllers {
        self.controllers.clone()
    }

    pub fn schedule_cfo_command(&self, command: CfoCommand) -> bool {
        self.controllers.cfo.schedule_command(command)
    }

    pub fn set_center_frequency(&self, center_freq_hz: f64) -> bool {
        self.controllers.center_frequency.set_center_frequency(center_freq_hz)
    }

    pub fn set_tx_time_offset(&self, offset: i64) -> bool {
        self.controllers.tx_time_offset.set_tx_time_offset(offset)
    }
}
