//! Slot-indexed Request Mailboxes
//!
//! A fixed table of single-entry mailboxes used to hand requests from the control path to
//! the real-time path. Each entry is addressed by `slot.system_slot() % size` and guarded by
//! its own lock, held only for the duration of a swap.
//!
//! A request that is never consumed is replaced by the next one targeting the same entry.
//! The displaced value is always returned to whoever performed the exchange.

use common::SlotPoint;
use std::sync::{Mutex, PoisonError};

/// Fixed-size table of slot-indexed mailboxes
pub struct ResourceRequestPool<T> {
    entries: Vec<Mutex<T>>,
}

impl<T: Default> ResourceRequestPool<T> {
    /// Create a pool with `size` empty entries
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "request pool needs at least one entry");
        Self {
            entries: (0..size).map(|_| Mutex::new(T::default())).collect(),
        }
    }

    /// Reset every entry to its default value
    pub fn clear(&self) {
        for entry in &self.entries {
            *entry.lock().unwrap_or_else(PoisonError::into_inner) = T::default();
        }
    }
}

impl<T> ResourceRequestPool<T> {
    /// Number of entries
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, slot: SlotPoint) -> &Mutex<T> {
        &self.entries[slot.system_slot() as usize % self.entries.len()]
    }

    /// Store `value` in the entry of `slot` and return what the entry held before
    pub fn exchange(&self, slot: SlotPoint, value: T) -> T {
        let mut entry = self.entry(slot).lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *entry, value)
    }

    /// Run `f` on the entry of `slot` while holding its lock
    pub fn with_entry<R>(&self, slot: SlotPoint, f: impl FnOnce(&mut T) -> R) -> R {
        let mut entry = self.entry(slot).lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut entry)
    }
}
