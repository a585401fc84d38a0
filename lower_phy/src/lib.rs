//! Downlink Lower Physical Layer Library
//!
//! This crate turns per-slot downlink resource grids into a continuous, sample-accurate
//! stream of baseband IQ samples. Resource grids are modulated asynchronously per symbol
//! and antenna port, then conditioned (carrier frequency offset, amplitude control) as the
//! radio requests samples by timestamp.

pub mod config;
pub mod notifiers;
pub mod metrics;
pub mod resource_request_pool;
pub mod cfo;
pub mod amplitude_control;
pub mod ofdm;
pub mod executor;
pub mod pdxch;
pub mod downlink;

use common::CommonError;
use thiserror::Error;

// Re-export commonly used types
pub use config::{AmplitudeControlConfig, DownlinkProcessorConfig, OfdmModulatorConfig};
pub use notifiers::{
    BasebandMetricsNotifier, DownlinkTimingNotifier, LowerPhyTimingContext, PdxchProcessorNotifier,
};
pub use metrics::{BasebandMetrics, ClippingCount, SlotModulationMetrics};
pub use resource_request_pool::ResourceRequestPool;
pub use cfo::{CfoCommand, CfoController, CfoProcessor};
pub use amplitude_control::AmplitudeClipper;
pub use ofdm::FftOfdmModulator;
pub use executor::{InlineTaskExecutor, TokioTaskExecutor};
pub use pdxch::{
    CenterFrequencyController, PdxchBaseband, PdxchProcessor, PdxchRequestHandler, PdxchSlotResult,
    SlotContext, SymbolContext,
};
pub use downlink::{
    DownlinkControllers, DownlinkNotifiers, DownlinkProcessor, DownlinkProcessorBaseband,
    DownlinkProcessorDependencies, TxTimeOffsetController,
};

/// Lower PHY errors
#[derive(Error, Debug)]
pub enum LowerPhyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid numerology: {0}")]
    Numerology(#[from] CommonError),
}
