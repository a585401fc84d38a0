//! Lower PHY Collaborator Interfaces Library
//!
//! This crate defines the contracts of the components the downlink lower PHY consumes:
//! baseband gateway buffers, resource grids, the OFDM symbol modulator, the amplitude
//! controller and the task executor.

pub mod baseband_gateway;
pub mod resource_grid;
pub mod ofdm;
pub mod amplitude_control;
pub mod task_executor;

use thiserror::Error;

pub use baseband_gateway::{BasebandBuffer, BasebandReader, BasebandTimestamp, BasebandWriter, TransmitMetadata};
pub use resource_grid::{ResourceGrid, ResourceGridContext, ResourceGridPool, ResourceGridReader, SharedResourceGrid};
pub use ofdm::OfdmSymbolModulator;
pub use amplitude_control::{AmplitudeController, AmplitudeMetrics};
pub use task_executor::{Task, TaskExecutor};

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Resource grid access out of bounds: port={port}, symbol={symbol}, subcarrier={subcarrier}")]
    GridOutOfBounds {
        port: usize,
        symbol: usize,
        subcarrier: usize,
    },

    #[error("Resource grid pool exhausted")]
    PoolExhausted,
}
