//! The guest module boundary.
//!
//! The bridge never touches an engine directly; everything it needs from
//! the instantiated module is expressed by [`GuestModule`]: the linear
//! memory buffer, the exported allocator entry points the string codec
//! depends on, indirect calls through the guest function table (used by
//! the closure trampoline), and the entry point the host invokes to start
//! execution.

use crate::error::ModuleError;
use crate::memory::MemoryHandle;
use crate::table::Handle;

/// Export surface an instantiated guest module must provide.
///
/// Implementations wrap a concrete engine instance. All pointers are byte
/// offsets into the module's linear memory and are valid only until the
/// next growth event.
pub trait GuestModule: Send + Sync {
    /// The current linear memory buffer.
    ///
    /// Growth must replace the returned `Arc` (copying contents) so stale
    /// views are detectable by identity comparison.
    fn memory(&self) -> MemoryHandle;

    /// Allocate `size` bytes of guest memory (exported allocator)
    fn alloc(&self, size: u32) -> Result<u32, ModuleError>;

    /// Resize an allocation, returning the possibly-moved pointer
    fn realloc(&self, ptr: u32, old_size: u32, new_size: u32) -> Result<u32, ModuleError>;

    /// Release an allocation made through [`GuestModule::alloc`]
    fn free(&self, ptr: u32, size: u32) -> Result<(), ModuleError>;

    /// Call the function-table entry at `slot` with two context words and
    /// handle arguments (the trampoline's accessor into the guest table).
    fn call_table(&self, slot: u32, ctx_a: u32, ctx_b: u32, args: &[Handle])
        -> Result<(), ModuleError>;

    /// Invoke the guest entry point
    fn start(&self) -> Result<(), ModuleError>;
}
