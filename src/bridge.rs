//! The bridge instance: one handle table, one view cache, one codec, and
//! the trampoline, wired to a single guest module.
//!
//! All interop state lives on the instance rather than in module-level
//! globals, so multiple isolated bridges can coexist and tests get clean
//! fixtures. The model is single-threaded cooperative: the
//! interior locks only serialize mutability, they are never contended,
//! and none is held across a call into the guest (guest code re-enters
//! the bridge freely).

use crate::closure::{ClosureKind, ClosureWrapper};
use crate::codec::StringCodec;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, HostError, ModuleError};
use crate::exception;
use crate::memory::ViewCache;
use crate::metrics::{BridgeMetrics, BridgeStats};
use crate::module::GuestModule;
use crate::table::{Handle, HandleTable, PROTECTED_HANDLES};
use crate::value::HostValue;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A bridge instance owning the interop state for one guest module.
pub struct Bridge {
    config: BridgeConfig,
    table: Mutex<HandleTable>,
    views: ViewCache,
    codec: StringCodec,
    metrics: Arc<BridgeMetrics>,
    leak_warned: AtomicBool,
    module: OnceCell<Arc<dyn GuestModule>>,
}

impl Bridge {
    /// Create a bridge with the given configuration.
    ///
    /// The handle table is seeded with its sentinel slots and the view
    /// cache is empty; the bridge is fully initialized before any module
    /// is attached, which is what the loader's wiring contract relies on.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;

        debug!(
            handle_capacity = config.initial_handle_capacity,
            "Initializing bridge"
        );

        Ok(Self {
            table: Mutex::new(HandleTable::with_capacity(config.initial_handle_capacity)),
            views: ViewCache::new(),
            codec: StringCodec::new(),
            metrics: Arc::new(BridgeMetrics::new()),
            leak_warned: AtomicBool::new(false),
            module: OnceCell::new(),
            config,
        })
    }

    /// Attach the instantiated module. May happen exactly once, and must
    /// happen before any operation that touches guest memory.
    pub fn attach(&self, module: Arc<dyn GuestModule>) -> Result<(), BridgeError> {
        self.module
            .set(module)
            .map_err(|_| BridgeError::AlreadyAttached)
    }

    /// Whether a module has been attached
    pub fn is_attached(&self) -> bool {
        self.module.get().is_some()
    }

    fn module(&self) -> &Arc<dyn GuestModule> {
        self.module
            .get()
            .unwrap_or_else(|| panic!("bridge used before a module was attached"))
    }

    /// The metrics collector for this bridge
    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.metrics
    }

    /// The configuration this bridge was built with
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ---- handle primitives ----

    /// Store a host value and return its handle
    pub fn add(&self, value: HostValue) -> Handle {
        if self.config.trace_calls {
            debug!(value = ?value, "add");
        }
        let handle = self.table.lock().alloc(value);
        self.metrics.record_handle_alloc();
        self.check_handle_pressure();
        handle
    }

    /// Warn once when the outstanding handle count crosses the configured
    /// threshold. Latched so a crossing is reported even if frees land
    /// between individual allocations.
    fn check_handle_pressure(&self) {
        let threshold = self.config.live_handle_warn_threshold;
        if threshold == 0 || self.leak_warned.load(Ordering::Relaxed) {
            return;
        }
        let outstanding = self.metrics.handles_outstanding();
        if outstanding >= threshold && !self.leak_warned.swap(true, Ordering::Relaxed) {
            warn!(
                live = outstanding,
                "Live handle count crossed warning threshold; possible handle leak"
            );
        }
    }

    /// Read the value behind a handle without releasing it
    pub fn get(&self, handle: Handle) -> HostValue {
        self.table.lock().get(handle)
    }

    /// Read and release a handle (protected sentinels are never released)
    pub fn take(&self, handle: Handle) -> HostValue {
        let value = self.table.lock().take(handle);
        if handle >= PROTECTED_HANDLES {
            self.metrics.record_handle_free();
        }
        value
    }

    /// Release a handle
    pub fn drop_ref(&self, handle: Handle) {
        self.table.lock().free(handle);
        if handle >= PROTECTED_HANDLES {
            self.metrics.record_handle_free();
        }
    }

    /// Allocate a second handle to the same value
    pub fn clone_ref(&self, handle: Handle) -> Handle {
        let cloned = {
            let mut table = self.table.lock();
            let value = table.get(handle);
            table.alloc(value)
        };
        self.metrics.record_handle_alloc();
        self.check_handle_pressure();
        cloned
    }

    /// Handles currently live beyond the protected sentinels
    pub fn live_handles(&self) -> usize {
        self.table.lock().live_count()
    }

    // ---- string marshalling ----

    /// Decode a (pointer, length) pair from guest memory into host text
    pub fn decode_string(&self, ptr: u32, len: u32) -> String {
        let text = self
            .codec
            .decode(self.module().as_ref(), &self.views, ptr, len);
        self.metrics.record_string_decoded();
        text
    }

    /// Encode host text into guest memory, returning (pointer, length).
    ///
    /// Consumes the codec's length scratch internally, so callers get the
    /// two-register form of the string ABI.
    pub fn encode_string(&self, text: &str) -> Result<(u32, u32), ModuleError> {
        let ptr = self
            .codec
            .encode(self.module().as_ref(), &self.views, text)?;
        let len = self.codec.take_len();
        self.metrics.record_string_encoded();
        Ok((ptr, len))
    }

    /// Decode a (pointer, length) pair whose allocation the guest handed
    /// over, releasing the guest memory after the copy.
    pub fn take_string(&self, ptr: u32, len: u32) -> Result<String, ModuleError> {
        let text = self.decode_string(ptr, len);
        self.module().free(ptr, len)?;
        Ok(text)
    }

    /// Decode guest bytes and intern the result as a host string value
    pub fn string_new(&self, ptr: u32, len: u32) -> Handle {
        let text = self.decode_string(ptr, len);
        self.add(HostValue::string(text))
    }

    /// Encode the host string behind `handle` into guest memory, writing
    /// the byte length to the word at `len_ptr` and returning the pointer.
    /// Non-string values yield pointer 0 and leave `len_ptr` untouched.
    pub fn string_get(&self, handle: Handle, len_ptr: u32) -> Result<u32, ModuleError> {
        let value = self.get(handle);
        let text = match value.as_str() {
            Some(text) => text.to_owned(),
            None => return Ok(0),
        };
        let (ptr, len) = self.encode_string(&text)?;
        self.views
            .view(self.module().as_ref())
            .write_word(len_ptr, len);
        Ok(ptr)
    }

    /// Guest-initiated abort carrying a message in guest memory.
    ///
    /// # Panics
    /// Always; the guest has declared its own state unrecoverable.
    pub fn throw(&self, ptr: u32, len: u32) -> ! {
        let message = self.decode_string(ptr, len);
        panic!("guest abort: {message}");
    }

    // ---- JSON marshalling ----

    /// Parse JSON bytes in guest memory into a host document and return
    /// its handle.
    ///
    /// The bytes come from the guest's own serializer, so malformed JSON
    /// is broken wiring, not a recoverable host failure.
    ///
    /// # Panics
    /// Panics on malformed JSON.
    pub fn json_parse(&self, ptr: u32, len: u32) -> Handle {
        let text = self.decode_string(ptr, len);
        let json: serde_json::Value = serde_json::from_str(&text)
            .unwrap_or_else(|e| panic!("malformed JSON from guest at {ptr}: {e}"));
        self.add(HostValue::object(json))
    }

    /// Serialize the value behind `handle` as JSON into guest memory,
    /// writing the pointer to the word at `ptr_ptr` and returning the
    /// byte length.
    pub fn json_serialize(&self, handle: Handle, ptr_ptr: u32) -> Result<u32, ModuleError> {
        let text = self.get(handle).to_json().to_string();
        let (ptr, len) = self.encode_string(&text)?;
        self.views
            .view(self.module().as_ref())
            .write_word(ptr_ptr, ptr);
        Ok(len)
    }

    /// Render the value behind `handle` in debug form into guest memory,
    /// writing the byte length to the word at `len_ptr` and returning the
    /// pointer. Used by guest-side panic and logging paths.
    pub fn debug_string(&self, handle: Handle, len_ptr: u32) -> Result<u32, ModuleError> {
        let text = format!("{:?}", self.get(handle));
        let (ptr, len) = self.encode_string(&text)?;
        self.views
            .view(self.module().as_ref())
            .write_word(len_ptr, len);
        Ok(ptr)
    }

    // ---- closures / trampoline ----

    /// Wrap a guest callable for host consumption and return its handle.
    ///
    /// `ctx_a`/`ctx_b` are the guest's context words; `invoke_slot` and
    /// `destroy_slot` index the guest function table.
    pub fn register_closure(
        &self,
        ctx_a: u32,
        ctx_b: u32,
        invoke_slot: u32,
        destroy_slot: u32,
        kind: ClosureKind,
    ) -> Handle {
        debug!(invoke_slot, destroy_slot, ?kind, "Registering closure");
        self.add(HostValue::Callable(Arc::new(ClosureWrapper::new(
            ctx_a,
            ctx_b,
            invoke_slot,
            destroy_slot,
            kind,
        ))))
    }

    /// Dispatch a host event into the guest callable behind `handle`.
    ///
    /// Each argument is wrapped as a handle owned by the guest. The
    /// wrapper's first context word is cleared for the duration of the
    /// dispatch and restored afterwards unless the destructor ran during
    /// the call.
    ///
    /// # Panics
    /// Panics if `handle` is not callable or the closure was destroyed.
    pub fn invoke_closure(
        &self,
        handle: Handle,
        args: Vec<HostValue>,
    ) -> Result<(), ModuleError> {
        let wrapper = match self.get(handle).as_callable() {
            Some(wrapper) => Arc::clone(wrapper),
            None => panic!("handle {handle} is not callable"),
        };

        let ctx_a = wrapper.begin_invoke();
        let arg_handles: Vec<Handle> = args.into_iter().map(|value| self.add(value)).collect();
        self.metrics.record_closure_invocation();

        let call = self.module().call_table(
            wrapper.invoke_slot(),
            ctx_a,
            wrapper.ctx_b(),
            &arg_handles,
        );

        let destroy = if wrapper.end_invoke(ctx_a) {
            if wrapper.kind() == ClosureKind::SingleShot {
                self.release_closure_slot(handle, &wrapper);
            }
            self.run_destructor(&wrapper, ctx_a)
        } else {
            Ok(())
        };

        // The call error takes precedence; a destructor failure riding on
        // top of a trap is still worth a trace before it is dropped.
        match (call, destroy) {
            (Err(call_err), Err(destroy_err)) => {
                warn!(
                    error = %destroy_err,
                    "Closure destructor failed while a guest trap was propagating"
                );
                Err(call_err)
            }
            (Err(call_err), Ok(())) => Err(call_err),
            (Ok(()), destroy) => destroy,
        }
    }

    /// Drop one external reference to the closure behind `handle`,
    /// releasing the handle itself. Returns whether the destructor ran.
    pub fn drop_closure(&self, handle: Handle) -> Result<bool, ModuleError> {
        let value = self.take(handle);
        let wrapper = match value.as_callable() {
            Some(wrapper) => wrapper,
            None => panic!("handle {handle} is not callable"),
        };
        match wrapper.drop_ref() {
            Some(ctx_a) => {
                self.run_destructor(wrapper, ctx_a)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Release the handle of a closure without dropping its reference,
    /// deliberately leaking a long-lived listener.
    pub fn forget_closure(&self, handle: Handle) {
        debug!(handle, "Forgetting closure handle");
        self.drop_ref(handle);
    }

    fn run_destructor(&self, wrapper: &ClosureWrapper, ctx_a: u32) -> Result<(), ModuleError> {
        debug!(slot = wrapper.destroy_slot(), "Destroying closure");
        self.metrics.record_closure_destroyed();
        self.module()
            .call_table(wrapper.destroy_slot(), ctx_a, wrapper.ctx_b(), &[])
    }

    /// Free the table slot of a single-shot closure that just destroyed
    /// itself, unless the guest already released (and possibly reused) it
    /// during the invocation.
    fn release_closure_slot(&self, handle: Handle, wrapper: &Arc<ClosureWrapper>) {
        let mut table = self.table.lock();
        if table.is_live(handle) {
            if let Some(current) = table.get(handle).as_callable() {
                if Arc::ptr_eq(current, wrapper) {
                    table.free(handle);
                    self.metrics.record_handle_free();
                }
            }
        }
    }

    // ---- exception channel ----

    /// Capture a host failure into the exception record at `exn_ptr`:
    /// flag word set to 1, handle word set to a live handle owning the
    /// error object. Logged through the diagnostic channel.
    pub fn capture_exception(&self, exn_ptr: u32, err: HostError) {
        error!(kind = %err.kind, "Host operation failed: {}", err.message);
        let handle = self.add(HostValue::from(err));
        let view = self.views.view(self.module().as_ref());
        exception::write_failure(&view, exn_ptr, handle);
        self.metrics.record_exception();
    }

    /// Run a fallible host operation against the exception record at
    /// `exn_ptr`. On success the flag stays 0 and the value is returned;
    /// on failure the error is captured and `None` comes back.
    pub fn with_exception<T>(
        &self,
        exn_ptr: u32,
        op: impl FnOnce() -> Result<T, HostError>,
    ) -> Option<T> {
        match op() {
            Ok(value) => Some(value),
            Err(err) => {
                self.capture_exception(exn_ptr, err);
                None
            }
        }
    }

    /// Guest-side check of an exception record: if the flag is set, clear
    /// the record and take ownership of the captured error value.
    pub fn take_exception(&self, exn_ptr: u32) -> Option<HostValue> {
        let view = self.views.view(self.module().as_ref());
        let handle = exception::read(&view, exn_ptr)?;
        exception::clear(&view, exn_ptr);
        Some(self.take(handle))
    }

    // ---- diagnostics ----

    /// Snapshot of bridge activity
    pub fn stats(&self) -> BridgeStats {
        self.metrics
            .snapshot(self.live_handles(), self.views.rebuilds())
    }
}
