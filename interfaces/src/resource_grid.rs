//! Resource Grid Storage and Sharing
//!
//! Frequency-domain slot payloads produced by the upper PHY. Grids are preallocated in a
//! pool and handed out as reference-counted handles; the last handle to be released
//! returns its grid to the pool.

use crate::InterfaceError;
use common::SlotPoint;
use ndarray::{s, Array3, ArrayView1};
use num_complex::Complex32;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, trace};

/// Transmission context of a resource grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceGridContext {
    /// Slot the grid must be transmitted in
    pub slot: SlotPoint,
    /// Radio sector identifier
    pub sector: u32,
}

/// Read access to a resource grid
pub trait ResourceGridReader: Send + Sync {
    /// Number of antenna ports
    fn nof_ports(&self) -> usize;

    /// Number of OFDM symbols
    fn nof_symbols(&self) -> usize;

    /// Number of subcarriers
    fn nof_subc(&self) -> usize;

    /// Returns true if nothing was written on the port
    fn is_port_empty(&self, port: usize) -> bool;

    /// Returns true if nothing was written on any port
    fn is_empty(&self) -> bool {
        (0..self.nof_ports()).all(|port| self.is_port_empty(port))
    }

    /// Subcarriers of one symbol of one port
    fn symbol(&self, port: usize, symbol: usize) -> ArrayView1<'_, Complex32>;
}

/// Resource grid for one slot: [port, symbol, subcarrier]
#[derive(Debug, Clone)]
pub struct ResourceGrid {
    data: Array3<Complex32>,
    /// Ports that have been written since the last clear
    port_has_data: Vec<bool>,
}

impl ResourceGrid {
    /// Create a new zeroed resource grid
    pub fn new(nof_ports: usize, nof_symbols: usize, nof_subc: usize) -> Self {
        Self {
            data: Array3::zeros((nof_ports, nof_symbols, nof_subc)),
            port_has_data: vec![false; nof_ports],
        }
    }

    /// Write consecutive subcarriers of one symbol
    pub fn put(
        &mut self,
        port: usize,
        symbol: usize,
        first_subc: usize,
        values: &[Complex32],
    ) -> Result<(), InterfaceError> {
        let (nof_ports, nof_symbols, nof_subc) = self.data.dim();
        if port >= nof_ports || symbol >= nof_symbols || first_subc + values.len() > nof_subc {
            return Err(InterfaceError::GridOutOfBounds {
                port,
                symbol,
                subcarrier: first_subc + values.len(),
            });
        }

        self.data
            .slice_mut(s![port, symbol, first_subc..first_subc + values.len()])
            .iter_mut()
            .zip(values)
            .for_each(|(re, value)| *re = *value);
        self.port_has_data[port] = true;
        Ok(())
    }

    /// Clear the written ports
    pub fn clear(&mut self) {
        for (port, has_data) in self.port_has_data.iter_mut().enumerate() {
            if *has_data {
                self.data.slice_mut(s![port, .., ..]).fill(Complex32::new(0.0, 0.0));
                *has_data = false;
            }
        }
    }
}

impl ResourceGridReader for ResourceGrid {
    fn nof_ports(&self) -> usize {
        self.data.dim().0
    }

    fn nof_symbols(&self) -> usize {
        self.data.dim().1
    }

    fn nof_subc(&self) -> usize {
        self.data.dim().2
    }

    fn is_port_empty(&self, port: usize) -> bool {
        !self.port_has_data.get(port).copied().unwrap_or(false)
    }

    fn symbol(&self, port: usize, symbol: usize) -> ArrayView1<'_, Complex32> {
        self.data.slice(s![port, symbol, ..])
    }
}

type FreeList = Mutex<Vec<ResourceGrid>>;

/// Grid storage that returns itself to the originating pool when dropped
#[derive(Debug)]
struct PooledGrid {
    grid: ResourceGrid,
    origin: Weak<FreeList>,
}

impl Drop for PooledGrid {
    fn drop(&mut self) {
        let Some(free) = self.origin.upgrade() else {
            return;
        };
        let mut grid = std::mem::replace(&mut self.grid, ResourceGrid::new(0, 0, 0));
        grid.clear();
        free.lock().unwrap_or_else(PoisonError::into_inner).push(grid);
        trace!("Resource grid returned to pool");
    }
}

/// Reference-counted resource grid handle
///
/// The default handle is invalid and refers to no grid.
#[derive(Debug, Clone, Default)]
pub struct SharedResourceGrid {
    inner: Option<Arc<PooledGrid>>,
}

impl SharedResourceGrid {
    /// Wrap a grid that does not belong to any pool
    pub fn from_grid(grid: ResourceGrid) -> Self {
        Self {
            inner: Some(Arc::new(PooledGrid {
                grid,
                origin: Weak::new(),
            })),
        }
    }

    /// Returns true if the handle refers to a grid
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Read access to the grid
    pub fn reader(&self) -> Option<&ResourceGrid> {
        self.inner.as_ref().map(|pooled| &pooled.grid)
    }

    /// Write access to the grid, only available while this is the sole handle
    pub fn writer(&mut self) -> Option<&mut ResourceGrid> {
        self.inner
            .as_mut()
            .and_then(Arc::get_mut)
            .map(|pooled| &mut pooled.grid)
    }

    /// Number of live handles to the grid
    pub fn ref_count(&self) -> usize {
        self.inner.as_ref().map_or(0, Arc::strong_count)
    }

    /// Release this handle
    pub fn release(&mut self) {
        self.inner = None;
    }
}

/// Fixed-size pool of preallocated resource grids
pub struct ResourceGridPool {
    free: Arc<FreeList>,
    capacity: usize,
}

impl ResourceGridPool {
    /// Create a pool of `capacity` grids of the given dimensions
    pub fn new(capacity: usize, nof_ports: usize, nof_symbols: usize, nof_subc: usize) -> Self {
        let grids = (0..capacity)
            .map(|_| ResourceGrid::new(nof_ports, nof_symbols, nof_subc))
            .collect();
        debug!(
            "Created resource grid pool: {} grids of {}x{}x{}",
            capacity, nof_ports, nof_symbols, nof_subc
        );
        Self {
            free: Arc::new(Mutex::new(grids)),
            capacity,
        }
    }

    /// Take a cleared grid from the pool
    pub fn allocate(&self) -> Result<SharedResourceGrid, InterfaceError> {
        let grid = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(InterfaceError::PoolExhausted)?;
        Ok(SharedResourceGrid {
            inner: Some(Arc::new(PooledGrid {
                grid,
                origin: Arc::downgrade(&self.free),
            })),
        })
    }

    /// Number of grids currently available
    pub fn nof_available(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Total number of grids owned by the pool
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
