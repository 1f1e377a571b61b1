//! Handle table: the indirection layer between guest integers and host values.
//!
//! Handles are indices into a slot array. Freed slots form a free list
//! threaded through the array itself, so allocation and release are O(1)
//! and the table stops growing once churn reaches a steady state. This
//! matters because every interop call allocates at least one handle;
//! per-frame query storms would otherwise grow the table without bound.
//!
//! The first [`PROTECTED_HANDLES`] slots are permanently reserved for the
//! interned constants `undefined`, `null`, `true`, and `false`. Freeing a
//! protected handle is a deliberate no-op, which lets guest code release
//! every handle it receives without special-casing the constants.

use crate::value::HostValue;

/// Opaque integer referencing a slot in the handle table
pub type Handle = u32;

/// Handle of the interned `undefined` value
pub const HANDLE_UNDEFINED: Handle = 0;

/// Handle of the interned `null` value
pub const HANDLE_NULL: Handle = 1;

/// Handle of the interned `true` value
pub const HANDLE_TRUE: Handle = 2;

/// Handle of the interned `false` value
pub const HANDLE_FALSE: Handle = 3;

/// Handles below this threshold are reserved and never reclaimed
pub const PROTECTED_HANDLES: Handle = 4;

enum Slot {
    Live(HostValue),
    Vacant { next: u32 },
}

/// Slot array plus free list holding host values addressable by handle.
///
/// Out-of-range, freed-handle, and double-free accesses are caller
/// contract violations and panic; they indicate broken guest/bridge
/// wiring, not a recoverable condition.
pub struct HandleTable {
    slots: Vec<Slot>,
    free_head: u32,
}

impl HandleTable {
    /// Create a table seeded with the protected sentinel slots
    pub fn new() -> Self {
        Self::with_capacity(PROTECTED_HANDLES as usize)
    }

    /// Create a table with a pre-reserved slot capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity.max(PROTECTED_HANDLES as usize));
        slots.push(Slot::Live(HostValue::Undefined));
        slots.push(Slot::Live(HostValue::Null));
        slots.push(Slot::Live(HostValue::Bool(true)));
        slots.push(Slot::Live(HostValue::Bool(false)));
        Self {
            slots,
            free_head: PROTECTED_HANDLES,
        }
    }

    /// Store a value and return its handle.
    ///
    /// Reuses the free-list head when one exists, otherwise appends a slot.
    pub fn alloc(&mut self, value: HostValue) -> Handle {
        if self.free_head as usize == self.slots.len() {
            // Free list exhausted; extend it by one lazily-threaded slot.
            self.slots.push(Slot::Vacant {
                next: self.free_head + 1,
            });
        }
        let handle = self.free_head;
        let slot = &mut self.slots[handle as usize];
        match std::mem::replace(slot, Slot::Live(value)) {
            Slot::Vacant { next } => self.free_head = next,
            Slot::Live(_) => unreachable!("free list head points at a live slot"),
        }
        handle
    }

    /// Read the value behind a handle.
    ///
    /// # Panics
    /// Panics if the handle is out of range or its slot has been freed.
    pub fn get(&self, handle: Handle) -> HostValue {
        match self.slots.get(handle as usize) {
            Some(Slot::Live(value)) => value.clone(),
            Some(Slot::Vacant { .. }) => panic!("use of freed handle {handle}"),
            None => panic!("handle {handle} out of range"),
        }
    }

    /// Release a handle, pushing its slot onto the free list.
    ///
    /// Freeing a protected sentinel handle is a no-op.
    ///
    /// # Panics
    /// Panics on out-of-range handles and on double frees.
    pub fn free(&mut self, handle: Handle) {
        if handle < PROTECTED_HANDLES {
            return;
        }
        match self.slots.get_mut(handle as usize) {
            Some(slot) => match slot {
                Slot::Live(_) => {
                    *slot = Slot::Vacant {
                        next: self.free_head,
                    };
                    self.free_head = handle;
                }
                Slot::Vacant { .. } => panic!("double free of handle {handle}"),
            },
            None => panic!("handle {handle} out of range"),
        }
    }

    /// Read and release in one step.
    ///
    /// Protected handles are read but not released.
    pub fn take(&mut self, handle: Handle) -> HostValue {
        let value = self.get(handle);
        self.free(handle);
        value
    }

    /// Whether a handle currently indexes a live slot
    pub fn is_live(&self, handle: Handle) -> bool {
        matches!(self.slots.get(handle as usize), Some(Slot::Live(_)))
    }

    /// Number of live handles beyond the protected sentinels
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .skip(PROTECTED_HANDLES as usize)
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    /// Total slots the table currently holds
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_seeded() {
        let table = HandleTable::new();
        assert!(table.get(HANDLE_UNDEFINED).is_undefined());
        assert!(table.get(HANDLE_NULL).is_null());
        assert_eq!(table.get(HANDLE_TRUE).as_bool(), Some(true));
        assert_eq!(table.get(HANDLE_FALSE).as_bool(), Some(false));
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn test_alloc_get_round_trip() {
        let mut table = HandleTable::new();
        let h = table.alloc(HostValue::string("payload"));
        assert_eq!(table.get(h).as_str(), Some("payload"));
    }

    #[test]
    fn test_no_two_live_handles_share_a_slot() {
        let mut table = HandleTable::new();
        let mut live: Vec<(Handle, String)> = Vec::new();
        // Interleave allocs and frees and check slot uniqueness throughout.
        for round in 0..50u32 {
            let payload = round.to_string();
            let h = table.alloc(HostValue::string(payload.clone()));
            assert!(
                live.iter().all(|(other, _)| *other != h),
                "handle {h} aliased a live slot"
            );
            live.push((h, payload));
            if round % 3 == 0 {
                let (victim, _) = live.remove(live.len() / 2);
                table.free(victim);
            }
        }
        for (h, expected) in &live {
            assert_eq!(table.get(*h).as_str(), Some(expected.as_str()));
        }
    }

    #[test]
    fn test_free_list_reuse_bounds_growth() {
        let mut table = HandleTable::new();
        let first = table.alloc(HostValue::Null);
        table.free(first);
        let slots_before = table.slot_count();
        for _ in 0..1000 {
            let h = table.alloc(HostValue::Null);
            assert_eq!(h, first);
            table.free(h);
        }
        assert_eq!(table.slot_count(), slots_before);
    }

    #[test]
    fn test_protected_free_is_idempotent_no_op() {
        let mut table = HandleTable::new();
        let slots = table.slot_count();
        table.free(HANDLE_UNDEFINED);
        table.free(HANDLE_UNDEFINED);
        table.free(HANDLE_FALSE);
        assert_eq!(table.slot_count(), slots);
        assert!(table.get(HANDLE_UNDEFINED).is_undefined());
        assert_eq!(table.get(HANDLE_FALSE).as_bool(), Some(false));
    }

    #[test]
    fn test_take_releases_slot() {
        let mut table = HandleTable::new();
        let h = table.alloc(HostValue::string("once"));
        let v = table.take(h);
        assert_eq!(v.as_str(), Some("once"));
        assert!(!table.is_live(h));
    }

    #[test]
    fn test_take_protected_does_not_release() {
        let mut table = HandleTable::new();
        let v = table.take(HANDLE_TRUE);
        assert_eq!(v.as_bool(), Some(true));
        assert!(table.is_live(HANDLE_TRUE));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_get_out_of_range_is_fatal() {
        let table = HandleTable::new();
        table.get(9999);
    }

    #[test]
    #[should_panic(expected = "use of freed handle")]
    fn test_get_freed_is_fatal() {
        let mut table = HandleTable::new();
        let h = table.alloc(HostValue::Null);
        table.free(h);
        table.get(h);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_is_fatal() {
        let mut table = HandleTable::new();
        let h = table.alloc(HostValue::Null);
        table.free(h);
        table.free(h);
    }
}
