//! Counters for bridge activity.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters aggregated over the lifetime of one bridge instance
pub struct BridgeMetrics {
    handles_allocated: AtomicU64,
    handles_freed: AtomicU64,
    strings_encoded: AtomicU64,
    strings_decoded: AtomicU64,
    closure_invocations: AtomicU64,
    closures_destroyed: AtomicU64,
    exceptions_captured: AtomicU64,
}

impl BridgeMetrics {
    /// Create a zeroed collector
    pub fn new() -> Self {
        Self {
            handles_allocated: AtomicU64::new(0),
            handles_freed: AtomicU64::new(0),
            strings_encoded: AtomicU64::new(0),
            strings_decoded: AtomicU64::new(0),
            closure_invocations: AtomicU64::new(0),
            closures_destroyed: AtomicU64::new(0),
            exceptions_captured: AtomicU64::new(0),
        }
    }

    /// Record a handle allocation, returning the running total
    pub fn record_handle_alloc(&self) -> u64 {
        self.handles_allocated.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a handle release
    pub fn record_handle_free(&self) {
        self.handles_freed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an encode into guest memory
    pub fn record_string_encoded(&self) {
        self.strings_encoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decode out of guest memory
    pub fn record_string_decoded(&self) {
        self.strings_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a trampoline dispatch
    pub fn record_closure_invocation(&self) {
        self.closure_invocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closure destructor run
    pub fn record_closure_destroyed(&self) {
        self.closures_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a host failure captured into the exception channel
    pub fn record_exception(&self) {
        self.exceptions_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Total handles allocated so far
    pub fn handles_allocated(&self) -> u64 {
        self.handles_allocated.load(Ordering::Relaxed)
    }

    /// Total handles freed so far
    pub fn handles_freed(&self) -> u64 {
        self.handles_freed.load(Ordering::Relaxed)
    }

    /// Allocated minus freed
    pub fn handles_outstanding(&self) -> u64 {
        self.handles_allocated()
            .saturating_sub(self.handles_freed())
    }

    /// Build a stats snapshot
    pub fn snapshot(&self, live_handles: usize, view_rebuilds: u64) -> BridgeStats {
        BridgeStats {
            live_handles: live_handles as u64,
            handles_allocated: self.handles_allocated.load(Ordering::Relaxed),
            handles_freed: self.handles_freed.load(Ordering::Relaxed),
            strings_encoded: self.strings_encoded.load(Ordering::Relaxed),
            strings_decoded: self.strings_decoded.load(Ordering::Relaxed),
            closure_invocations: self.closure_invocations.load(Ordering::Relaxed),
            closures_destroyed: self.closures_destroyed.load(Ordering::Relaxed),
            exceptions_captured: self.exceptions_captured.load(Ordering::Relaxed),
            view_rebuilds,
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.handles_allocated.store(0, Ordering::Relaxed);
        self.handles_freed.store(0, Ordering::Relaxed);
        self.strings_encoded.store(0, Ordering::Relaxed);
        self.strings_decoded.store(0, Ordering::Relaxed);
        self.closure_invocations.store(0, Ordering::Relaxed);
        self.closures_destroyed.store(0, Ordering::Relaxed);
        self.exceptions_captured.store(0, Ordering::Relaxed);
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of bridge activity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Handles currently live beyond the protected sentinels
    pub live_handles: u64,
    /// Handles allocated since creation
    pub handles_allocated: u64,
    /// Handles freed since creation
    pub handles_freed: u64,
    /// Strings encoded into guest memory
    pub strings_encoded: u64,
    /// Strings decoded out of guest memory
    pub strings_decoded: u64,
    /// Trampoline dispatches
    pub closure_invocations: u64,
    /// Closure destructor runs
    pub closures_destroyed: u64,
    /// Host failures captured into the exception channel
    pub exceptions_captured: u64,
    /// Memory view rebuilds after buffer growth
    pub view_rebuilds: u64,
}
