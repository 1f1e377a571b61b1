//! # hostbridge
//!
//! Host-side interop layer between native host APIs and sandboxed guest
//! modules compiled to a linear-memory machine format.
//!
//! The guest can only pass integers and bytes across its boundary. This
//! crate supplies the machinery that turns those integers into rich host
//! interaction: a handle table mapping guest integers to host values, a
//! string codec over guest memory, a trampoline that lets guest closures
//! receive host events, and an exception channel that carries host
//! failures back into the guest as values instead of aborts.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                        Bridge                          │
//! │  handle primitives · string marshalling · trampoline   │
//! │              · exception channel · stats               │
//! ├──────────────┬───────────────┬─────────────────────────┤
//! │ HandleTable  │  StringCodec  │     ClosureWrapper      │
//! │ (slots +     │  (UTF-8 over  │  (ref-counted guest     │
//! │  free list)  │   guest mem)  │   callables)            │
//! ├──────────────┴───────────────┴─────────────────────────┤
//! │            ViewCache / MemoryView (identity-keyed)     │
//! ├────────────────────────────────────────────────────────┤
//! │        GuestModule (engine adapter, ModuleLoader)      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use hostbridge::{Bridge, BridgeConfig, HostValue};
//! use std::sync::Arc;
//!
//! # fn load(bridge: &Arc<hostbridge::Bridge>) {}
//! let bridge = Arc::new(Bridge::new(BridgeConfig::default()).unwrap());
//! load(&bridge); // instantiate a module via ModuleLoader and attach it
//!
//! let handle = bridge.add(HostValue::string("hello"));
//! assert_eq!(bridge.get(handle).as_str(), Some("hello"));
//! bridge.drop_ref(handle);
//! ```

#![deny(missing_docs)]

pub mod bridge;
pub mod closure;
pub mod codec;
pub mod config;
pub mod error;
pub mod exception;
pub mod loader;
pub mod memory;
pub mod metrics;
pub mod module;
pub mod table;
pub mod value;

pub use bridge::Bridge;
pub use closure::{ClosureKind, ClosureWrapper};
pub use codec::StringCodec;
pub use config::BridgeConfig;
pub use error::{BridgeError, HostError, HostErrorKind, LoadError, ModuleError, Result};
pub use loader::{CompiledModule, LoadedModule, ModuleBackend, ModuleLoader, ModuleSource};
pub use memory::{MemoryHandle, MemoryView, ViewCache};
pub use metrics::{BridgeMetrics, BridgeStats};
pub use module::GuestModule;
pub use table::{
    Handle, HandleTable, HANDLE_FALSE, HANDLE_NULL, HANDLE_TRUE, HANDLE_UNDEFINED,
    PROTECTED_HANDLES,
};
pub use value::{HostObject, HostValue};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
