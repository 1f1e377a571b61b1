//! Closure wrappers: guest callables exposed to host APIs.
//!
//! A wrapper records two guest context words, the function-table slot of
//! the callable, the slot of its destructor, and a live-invocation
//! counter. The counter is the sole lifetime authority: it starts at 1 on
//! registration, rises for each in-flight invocation, and falls after
//! each return and on explicit unregistration. The destructor runs exactly
//! once, synchronously, at the 1-to-0 transition; no finalizer or tracing
//! collector is involved.
//!
//! The state transitions live here; the dispatch itself (wrapping
//! arguments as handles and calling through the guest function table) is
//! the trampoline on [`crate::bridge::Bridge`].

use parking_lot::Mutex;

/// Lifetime flavor of a closure wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureKind {
    /// Fires exactly once; the invocation consumes the registration
    SingleShot,
    /// Fires any number of times until explicitly unregistered
    RefCounted,
}

#[derive(Debug)]
struct ClosureState {
    ctx_a: u32,
    count: u32,
    destroyed: bool,
}

/// A guest-supplied callable wrapped for host consumption.
#[derive(Debug)]
pub struct ClosureWrapper {
    ctx_b: u32,
    invoke_slot: u32,
    destroy_slot: u32,
    kind: ClosureKind,
    state: Mutex<ClosureState>,
}

impl ClosureWrapper {
    /// Create a wrapper with its registration reference (count = 1)
    pub fn new(ctx_a: u32, ctx_b: u32, invoke_slot: u32, destroy_slot: u32, kind: ClosureKind) -> Self {
        Self {
            ctx_b,
            invoke_slot,
            destroy_slot,
            kind,
            state: Mutex::new(ClosureState {
                ctx_a,
                count: 1,
                destroyed: false,
            }),
        }
    }

    /// Lifetime flavor
    pub fn kind(&self) -> ClosureKind {
        self.kind
    }

    /// Function-table slot of the callable
    pub fn invoke_slot(&self) -> u32 {
        self.invoke_slot
    }

    /// Function-table slot of the destructor
    pub fn destroy_slot(&self) -> u32 {
        self.destroy_slot
    }

    /// Second context word
    pub fn ctx_b(&self) -> u32 {
        self.ctx_b
    }

    /// First context word; 0 while an invocation is being dispatched
    pub fn context_word(&self) -> u32 {
        self.state.lock().ctx_a
    }

    /// Current reference count
    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    /// Whether the destructor has run
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Start an invocation: bump the counter and clear the first context
    /// word (blocking reentrant misuse of the same wrapper slot), handing
    /// the stashed word to the caller for the guest call.
    ///
    /// # Panics
    /// Panics if the wrapper has already been destroyed.
    pub(crate) fn begin_invoke(&self) -> u32 {
        let mut state = self.state.lock();
        if state.destroyed {
            panic!(
                "closure (table slot {}) invoked after destruction",
                self.invoke_slot
            );
        }
        state.count += 1;
        std::mem::replace(&mut state.ctx_a, 0)
    }

    /// Finish an invocation: drop the in-flight reference (and, for
    /// single-shot wrappers, the registration reference the call
    /// consumed). Returns `true` exactly when this decrement reached zero
    /// and the caller must now run the destructor with `ctx_a`; otherwise
    /// the context word is restored.
    pub(crate) fn end_invoke(&self, ctx_a: u32) -> bool {
        let mut state = self.state.lock();
        state.count -= 1;
        if self.kind == ClosureKind::SingleShot && state.count > 0 {
            state.count -= 1;
        }
        if state.count == 0 {
            state.destroyed = true;
            true
        } else {
            state.ctx_a = ctx_a;
            false
        }
    }

    /// Drop one external reference (host unregistration). Returns the
    /// context word for the destructor call when this was the last
    /// reference, zeroing the stored context.
    ///
    /// # Panics
    /// Panics if the wrapper has already been destroyed.
    pub(crate) fn drop_ref(&self) -> Option<u32> {
        let mut state = self.state.lock();
        if state.destroyed {
            panic!(
                "closure (table slot {}) unregistered after destruction",
                self.invoke_slot
            );
        }
        state.count = state
            .count
            .checked_sub(1)
            .unwrap_or_else(|| panic!("closure reference count underflow"));
        if state.count == 0 {
            state.destroyed = true;
            Some(std::mem::replace(&mut state.ctx_a, 0))
        } else {
            None
        }
    }
}
