//! Error types for the interop bridge.
//!
//! Failures come in two tiers. Host-side failures (`HostError`) are
//! recoverable conditions surfaced to the guest through the exception
//! channel. Bridge-contract violations (out-of-range handles, malformed
//! UTF-8, re-entrant marshalling) are broken invariants and abort via
//! panic rather than appearing anywhere in these types.

use serde::{Deserialize, Serialize};

/// Categories of host-side failures captured by the exception channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostErrorKind {
    /// The host refused the operation (e.g., a disallowed mutation)
    PermissionDenied,
    /// The named object, attribute, or resource does not exist
    NotFound,
    /// A network-backed operation failed
    Network,
    /// The value had the wrong shape for the operation
    InvalidType,
    /// The operation violated a host security policy
    Security,
    /// Unclassified host failure
    Internal,
}

impl std::fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostErrorKind::PermissionDenied => write!(f, "PERMISSION_DENIED"),
            HostErrorKind::NotFound => write!(f, "NOT_FOUND"),
            HostErrorKind::Network => write!(f, "NETWORK"),
            HostErrorKind::InvalidType => write!(f, "INVALID_TYPE"),
            HostErrorKind::Security => write!(f, "SECURITY"),
            HostErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// A captured host-side failure.
///
/// These are stored in the handle table and handed to the guest as a live
/// handle through the exception channel, so the guest can inspect,
/// convert, or propagate them. The guest owns the handle and must free it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostError {
    /// Failure category
    pub kind: HostErrorKind,

    /// Human-readable message
    pub message: String,

    /// Additional context for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl HostError {
    /// Create a new host error
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(operation: impl Into<String>) -> Self {
        Self::new(
            HostErrorKind::PermissionDenied,
            format!("Permission denied: {}", operation.into()),
        )
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(
            HostErrorKind::NotFound,
            format!("Not found: {}", what.into()),
        )
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Network, message)
    }

    /// Create a type error
    pub fn invalid_type(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::InvalidType, message)
    }

    /// Create a security error
    pub fn security(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Security, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Internal, message)
    }

    /// Add context
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for HostError {}

/// Errors raised by the guest module itself
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// A guest function trapped during execution
    #[error("guest trap in table slot {slot}: {message}")]
    Trap {
        /// Function table slot that trapped
        slot: u32,
        /// Trap description
        message: String,
    },

    /// The function table has no entry at the requested slot
    #[error("no function at table slot {0}")]
    MissingTableSlot(u32),

    /// The guest allocator could not satisfy a request
    #[error("guest allocator failed for {requested} bytes")]
    AllocFailed {
        /// Requested allocation size in bytes
        requested: u32,
    },

    /// The guest entry point returned a failure
    #[error("guest entry point failed: {0}")]
    EntryFailed(String),
}

/// Errors raised while loading or instantiating a module
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Module bytes failed to compile
    #[error("compilation failed: {0}")]
    Compile(String),

    /// A compiled module failed to instantiate
    #[error("instantiation failed: {0}")]
    Instantiate(String),

    /// Streaming compilation is unavailable or misconfigured.
    ///
    /// Carries the bytes drained from the stream so the loader can fall
    /// back to buffered compilation without re-reading the source.
    #[error("streaming compilation unavailable: {reason}")]
    StreamingUnavailable {
        /// Why streaming compilation was refused
        reason: String,
        /// Bytes already drained from the stream
        bytes: Vec<u8>,
    },

    /// IO error while reading module bytes
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main error type for bridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Host-side failure
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// Guest module failure
    #[error("module error: {0}")]
    Module(#[from] ModuleError),

    /// Module loading failure
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A module is already attached to this bridge
    #[error("a module is already attached to this bridge")]
    AlreadyAttached,
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_error_kind_display() {
        assert_eq!(
            HostErrorKind::PermissionDenied.to_string(),
            "PERMISSION_DENIED"
        );
        assert_eq!(HostErrorKind::Network.to_string(), "NETWORK");
    }

    #[test]
    fn test_host_error_creation() {
        let err = HostError::permission_denied("remove attribute");
        assert_eq!(err.kind, HostErrorKind::PermissionDenied);
        assert!(err.message.contains("remove attribute"));
    }

    #[test]
    fn test_host_error_serialization() {
        let err = HostError::not_found("storage key 'profile'");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("NOT_FOUND"));
    }

    #[test]
    fn test_host_error_context() {
        let err =
            HostError::network("fetch failed").with_context(serde_json::json!({ "status": 502 }));
        assert!(err.context.is_some());
    }

    #[test]
    fn test_bridge_error_conversion() {
        let module_err = ModuleError::MissingTableSlot(7);
        let bridge_err = BridgeError::from(module_err);
        assert!(bridge_err.to_string().contains("table slot 7"));
    }
}
