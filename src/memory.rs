//! Cached typed views over guest linear memory.
//!
//! Guest memory is a single growable byte buffer. Growth reallocates the
//! buffer, so a view captured before a growth event no longer observes the
//! guest's writes. Views are therefore keyed by buffer identity: the cache
//! compares the stored buffer pointer against the module's current buffer
//! on every access and rebuilds when they differ.

use crate::module::GuestModule;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared reference to the guest's linear memory buffer.
///
/// Growth replaces the `Arc` wholesale (after copying contents), which is
/// what gives each buffer its identity.
pub type MemoryHandle = Arc<RwLock<Vec<u8>>>;

/// Size of a guest machine word in bytes
pub const WORD_SIZE: u32 = 4;

/// A typed window over one identity of the guest buffer.
///
/// All accesses are bounds-checked; out-of-bounds or misaligned word
/// access is a fatal contract violation.
#[derive(Clone)]
pub struct MemoryView {
    buffer: MemoryHandle,
}

impl MemoryView {
    /// Create a view over a buffer
    pub fn new(buffer: MemoryHandle) -> Self {
        Self { buffer }
    }

    /// The underlying buffer this view observes
    pub fn buffer(&self) -> &MemoryHandle {
        &self.buffer
    }

    /// Current buffer length in bytes
    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `len` bytes starting at `ptr` out of guest memory
    pub fn read_bytes(&self, ptr: u32, len: u32) -> Vec<u8> {
        let buf = self.buffer.read();
        let range = check_range(ptr, len, buf.len());
        buf[range].to_vec()
    }

    /// Write bytes into guest memory at `ptr`
    pub fn write_bytes(&self, ptr: u32, bytes: &[u8]) {
        let mut buf = self.buffer.write();
        let range = check_range(ptr, bytes.len() as u32, buf.len());
        buf[range].copy_from_slice(bytes);
    }

    /// Read a little-endian word at a 4-aligned byte offset
    pub fn read_word(&self, ptr: u32) -> u32 {
        check_alignment(ptr);
        let bytes = self.read_bytes(ptr, WORD_SIZE);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Write a little-endian word at a 4-aligned byte offset
    pub fn write_word(&self, ptr: u32, word: u32) {
        check_alignment(ptr);
        self.write_bytes(ptr, &word.to_le_bytes());
    }
}

fn check_range(ptr: u32, len: u32, buf_len: usize) -> std::ops::Range<usize> {
    let start = ptr as usize;
    let end = match start.checked_add(len as usize) {
        Some(end) if end <= buf_len => end,
        _ => panic!("guest memory access out of bounds: {ptr}+{len} exceeds buffer of {buf_len}"),
    };
    start..end
}

fn check_alignment(ptr: u32) {
    if ptr % WORD_SIZE != 0 {
        panic!("misaligned word access at guest offset {ptr}");
    }
}

/// Cache of the current memory view, invalidated on buffer growth.
pub struct ViewCache {
    cached: Mutex<Option<MemoryView>>,
    rebuilds: AtomicU64,
}

impl ViewCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Return a view over the module's current buffer, rebuilding the
    /// cached view when the buffer identity has changed.
    pub fn view(&self, module: &dyn GuestModule) -> MemoryView {
        let current = module.memory();
        let mut cached = self.cached.lock();
        if let Some(view) = cached.as_ref() {
            if Arc::ptr_eq(view.buffer(), &current) {
                return view.clone();
            }
        }
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(len = current.read().len(), "Rebuilding guest memory view");
        let view = MemoryView::new(current);
        *cached = Some(view.clone());
        view
    }

    /// How many times the cached view has been rebuilt
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new()
    }
}
