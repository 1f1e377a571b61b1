//! The exception channel ABI.
//!
//! Fallible bridge operations take a caller-supplied byte offset in guest
//! memory holding a (flag word, handle word) pair. On success the flag is
//! left at 0; on failure the flag becomes 1 and the second word receives a
//! live handle to the captured error object. Failure cannot ride the
//! primary return value because any legitimate return (including handle 0,
//! the interned `undefined`) is indistinguishable from a sentinel.
//!
//! The guest must check the flag immediately after the call and take
//! ownership of the handle before the next bridge call; an unconsumed
//! error handle is an ordinary live table entry and leaks like one.

use crate::memory::MemoryView;
use crate::table::Handle;

/// Byte offset of the failure flag within the exception record
pub const FLAG_OFFSET: u32 = 0;

/// Byte offset of the error handle within the exception record
pub const HANDLE_OFFSET: u32 = 4;

/// Mark the record at `exn_ptr` as failed with the given error handle
pub fn write_failure(view: &MemoryView, exn_ptr: u32, handle: Handle) {
    view.write_word(exn_ptr + FLAG_OFFSET, 1);
    view.write_word(exn_ptr + HANDLE_OFFSET, handle);
}

/// Reset the record at `exn_ptr` to "no failure"
pub fn clear(view: &MemoryView, exn_ptr: u32) {
    view.write_word(exn_ptr + FLAG_OFFSET, 0);
    view.write_word(exn_ptr + HANDLE_OFFSET, 0);
}

/// Read the record at `exn_ptr`, returning the error handle if the flag
/// is set
pub fn read(view: &MemoryView, exn_ptr: u32) -> Option<Handle> {
    if view.read_word(exn_ptr + FLAG_OFFSET) == 1 {
        Some(view.read_word(exn_ptr + HANDLE_OFFSET))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn view() -> MemoryView {
        MemoryView::new(Arc::new(RwLock::new(vec![0u8; 64])))
    }

    #[test]
    fn test_untouched_record_reads_as_success() {
        assert_eq!(read(&view(), 16), None);
    }

    #[test]
    fn test_failure_round_trip() {
        let v = view();
        write_failure(&v, 16, 42);
        assert_eq!(v.read_word(16), 1);
        assert_eq!(read(&v, 16), Some(42));
    }

    #[test]
    fn test_clear_resets_both_words() {
        let v = view();
        write_failure(&v, 16, 42);
        clear(&v, 16);
        assert_eq!(read(&v, 16), None);
        assert_eq!(v.read_word(20), 0);
    }
}
