//! # Slot Schedule Table
//!
//! A frame is a fixed number of slots; each slot carries the set of stations
//! (and their TID masks) allowed to transmit while the slot is active.
//!
//! The table is an immutable value: every configuration update builds a
//! complete replacement from scratch and the runtime publishes it with an
//! atomic pointer swap. The tick path only ever reads a fully built table.

use std::fmt;

use crate::wire::{self, ConfigError, MacAddr, SlotAssignment, TidMask};

/// One station's access grant within a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    /// Station the grant applies to.
    pub station: MacAddr,
    /// TIDs the station may transmit.
    pub tids: TidMask,
}

/// Per-slot station assignments for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    slots: Vec<Vec<SlotEntry>>,
}

impl SlotTable {
    /// A table with every slot empty.
    pub fn empty(slots_per_frame: usize) -> Self {
        SlotTable {
            slots: vec![Vec::new(); slots_per_frame],
        }
    }

    /// Build a table from validated assignments. Entries targeting the same
    /// slot keep their arrival order.
    pub fn from_assignments(slots_per_frame: usize, assignments: &[SlotAssignment]) -> Self {
        let mut table = Self::empty(slots_per_frame);
        for a in assignments {
            debug_assert!(a.slot < slots_per_frame);
            table.slots[a.slot].push(SlotEntry {
                station: a.station,
                tids: a.tids,
            });
        }
        table
    }

    /// Parse an update message and build the replacement table in one step.
    pub fn parse(msg: &str, slots_per_frame: usize) -> Result<Self, ConfigError> {
        let assignments = wire::parse_update(msg, slots_per_frame)?;
        Ok(Self::from_assignments(slots_per_frame, &assignments))
    }

    /// Number of slots in the frame.
    #[inline]
    pub fn slots_per_frame(&self) -> usize {
        self.slots.len()
    }

    /// Stations granted access in the given slot.
    #[inline]
    pub fn slot(&self, index: usize) -> &[SlotEntry] {
        &self.slots[index]
    }

    /// Stations for the slot a running counter lands on. Valid for any
    /// counter value; the frame wraps via modulo.
    #[inline]
    pub fn slot_for_counter(&self, slot_count: u64) -> &[SlotEntry] {
        let index = (slot_count % self.slots.len() as u64) as usize;
        &self.slots[index]
    }

    /// Total number of station grants across the frame.
    pub fn station_count(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// Render one slot in the wire text form (`mac,mask#mac,mask`).
    pub fn slot_text(&self, index: usize) -> String {
        let mut out = String::new();
        for (i, entry) in self.slots[index].iter().enumerate() {
            if i > 0 {
                out.push(wire::ENTRY_SEP);
            }
            out.push_str(&format!("{},{}", entry.station, entry.tids));
        }
        out
    }
}

impl fmt::Display for SlotTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.slots.len() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "#{i}: {}", self.slot_text(i))?;
        }
        Ok(())
    }
}
