//! Numerology-aware slot counter
//!
//! A slot point identifies a slot within the 1024 frame system frame number cycle. It wraps
//! around at the end of the cycle and compares by shortest wrapped distance.

use crate::types::SubcarrierSpacing;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Number of system frame numbers before the slot counter wraps
pub const NOF_SFNS: u32 = 1024;

/// Number of subframes in one frame
pub const NOF_SUBFRAMES_PER_FRAME: u32 = 10;

/// Slot identifier (frame, subframe, slot within subframe)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotPoint {
    scs: SubcarrierSpacing,
    /// Slot count since SFN 0, slot 0
    count: u32,
}

impl SlotPoint {
    /// Create a slot point from a system frame number and a slot index within the frame
    pub fn new(scs: SubcarrierSpacing, sfn: u32, slot_index: u32) -> Self {
        debug_assert!(slot_index < scs.nof_slots_per_frame());
        Self::from_system_slot(scs, (sfn % NOF_SFNS) * scs.nof_slots_per_frame() + slot_index)
    }

    /// Create a slot point from a slot count, wrapping it into the SFN cycle
    pub fn from_system_slot(scs: SubcarrierSpacing, count: u32) -> Self {
        Self {
            scs,
            count: count % Self::nof_slots_per_cycle(scs),
        }
    }

    fn nof_slots_per_cycle(scs: SubcarrierSpacing) -> u32 {
        NOF_SFNS * scs.nof_slots_per_frame()
    }

    /// Subcarrier spacing of the slot
    pub fn scs(&self) -> SubcarrierSpacing {
        self.scs
    }

    /// Numerology index of the slot
    pub fn numerology(&self) -> u32 {
        self.scs.numerology()
    }

    /// Slot count within the SFN cycle
    pub fn system_slot(&self) -> u32 {
        self.count
    }

    /// System frame number
    pub fn sfn(&self) -> u32 {
        self.count / self.scs.nof_slots_per_frame()
    }

    /// Slot index within the frame
    pub fn slot_index(&self) -> u32 {
        self.count % self.scs.nof_slots_per_frame()
    }

    /// Subframe index within the frame
    pub fn subframe_index(&self) -> u32 {
        self.slot_index() / self.scs.nof_slots_per_subframe()
    }

    /// Slot index within the subframe
    pub fn slot_in_subframe(&self) -> u32 {
        self.slot_index() % self.scs.nof_slots_per_subframe()
    }

    /// Signed distance in slots from `other` to `self` along the shortest wrapped path
    fn wrapped_distance(&self, other: &SlotPoint) -> i32 {
        debug_assert_eq!(self.scs, other.scs, "comparing slots of different numerologies");
        let cycle = Self::nof_slots_per_cycle(self.scs) as i64;
        let mut diff = (self.count as i64 - other.count as i64).rem_euclid(cycle);
        if diff >= cycle / 2 {
            diff -= cycle;
        }
        diff as i32
    }
}

impl Add<u32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, nof_slots: u32) -> SlotPoint {
        let cycle = Self::nof_slots_per_cycle(self.scs);
        SlotPoint {
            scs: self.scs,
            count: ((self.count as u64 + nof_slots as u64) % cycle as u64) as u32,
        }
    }
}

impl AddAssign<u32> for SlotPoint {
    fn add_assign(&mut self, nof_slots: u32) {
        *self = *self + nof_slots;
    }
}

impl Sub<u32> for SlotPoint {
    type Output = SlotPoint;

    fn sub(self, nof_slots: u32) -> SlotPoint {
        let cycle = Self::nof_slots_per_cycle(self.scs) as i64;
        SlotPoint {
            scs: self.scs,
            count: (self.count as i64 - nof_slots as i64).rem_euclid(cycle) as u32,
        }
    }
}

impl Sub<SlotPoint> for SlotPoint {
    type Output = i32;

    fn sub(self, other: SlotPoint) -> i32 {
        self.wrapped_distance(&other)
    }
}

impl PartialOrd for SlotPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.scs != other.scs {
            return None;
        }
        Some(self.wrapped_distance(other).cmp(&0))
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.slot_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_fields() {
        let slot = SlotPoint::new(SubcarrierSpacing::Scs30, 5, 13);
        assert_eq!(slot.sfn(), 5);
        assert_eq!(slot.slot_index(), 13);
        assert_eq!(slot.subframe_index(), 6);
        assert_eq!(slot.slot_in_subframe(), 1);
        assert_eq!(slot.system_slot(), 5 * 20 + 13);
        assert_eq!(slot.to_string(), "5.13");
    }

    #[test]
    fn test_slot_wraps_at_sfn_cycle() {
        let last = SlotPoint::new(SubcarrierSpacing::Scs15, 1023, 9);
        let first = last + 1;
        assert_eq!(first.sfn(), 0);
        assert_eq!(first.slot_index(), 0);
        assert!(first > last);
        assert_eq!(first - last, 1);
        assert_eq!(first - 1, last);
    }

    #[test]
    fn test_slot_ordering() {
        let a = SlotPoint::new(SubcarrierSpacing::Scs15, 10, 3);
        let b = a + 25;
        assert!(a < b);
        assert_eq!(b - a, 25);
        assert_eq!(a - b, -25);
        assert_eq!(a.partial_cmp(&a), Some(Ordering::Equal));
    }
}
