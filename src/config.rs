//! Bridge configuration types and defaults.

use serde::{Deserialize, Serialize};

/// Default initial capacity of the handle table (slots)
pub const DEFAULT_HANDLE_CAPACITY: usize = 32;

/// Default live-handle count that triggers a leak warning
pub const DEFAULT_LIVE_HANDLE_WARN_THRESHOLD: u64 = 10_000;

/// Default maximum number of compiled modules kept by the loader
pub const DEFAULT_MODULE_CACHE_ENTRIES: usize = 16;

/// Configuration for a bridge instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Initial handle table capacity in slots
    #[serde(default = "default_handle_capacity")]
    pub initial_handle_capacity: usize,

    /// Live-handle count at which a leak warning is logged (0 = disabled).
    ///
    /// Every interop call allocates at least one handle; a steadily growing
    /// live count usually means the guest is not freeing what it takes.
    #[serde(default = "default_warn_threshold")]
    pub live_handle_warn_threshold: u64,

    /// Maximum compiled modules retained by the loader cache
    #[serde(default = "default_module_cache_entries")]
    pub max_module_cache_entries: usize,

    /// Log every bridge primitive call at debug level (default: false)
    #[serde(default)]
    pub trace_calls: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            initial_handle_capacity: DEFAULT_HANDLE_CAPACITY,
            live_handle_warn_threshold: DEFAULT_LIVE_HANDLE_WARN_THRESHOLD,
            max_module_cache_entries: DEFAULT_MODULE_CACHE_ENTRIES,
            trace_calls: false,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial handle table capacity
    pub fn with_handle_capacity(mut self, slots: usize) -> Self {
        self.initial_handle_capacity = slots;
        self
    }

    /// Set the live-handle warning threshold (0 disables the warning)
    pub fn with_warn_threshold(mut self, handles: u64) -> Self {
        self.live_handle_warn_threshold = handles;
        self
    }

    /// Set the maximum loader cache entries
    pub fn with_module_cache_entries(mut self, entries: usize) -> Self {
        self.max_module_cache_entries = entries;
        self
    }

    /// Enable or disable per-call tracing
    pub fn with_trace_calls(mut self, trace: bool) -> Self {
        self.trace_calls = trace;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_handle_capacity < crate::table::PROTECTED_HANDLES as usize {
            return Err(ConfigError::InvalidValue {
                field: "initial_handle_capacity".into(),
                reason: format!(
                    "must be at least {} to hold the reserved sentinel slots",
                    crate::table::PROTECTED_HANDLES
                ),
            });
        }

        if self.max_module_cache_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_module_cache_entries".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_handle_capacity() -> usize {
    DEFAULT_HANDLE_CAPACITY
}

fn default_warn_threshold() -> u64 {
    DEFAULT_LIVE_HANDLE_WARN_THRESHOLD
}

fn default_module_cache_entries() -> usize {
    DEFAULT_MODULE_CACHE_ENTRIES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.initial_handle_capacity, DEFAULT_HANDLE_CAPACITY);
        assert_eq!(config.max_module_cache_entries, DEFAULT_MODULE_CACHE_ENTRIES);
        assert!(!config.trace_calls);
    }

    #[test]
    fn test_config_builder() {
        let config = BridgeConfig::new()
            .with_handle_capacity(64)
            .with_warn_threshold(500)
            .with_trace_calls(true);

        assert_eq!(config.initial_handle_capacity, 64);
        assert_eq!(config.live_handle_warn_threshold, 500);
        assert!(config.trace_calls);
    }

    #[test]
    fn test_config_validation() {
        let invalid = BridgeConfig::new().with_handle_capacity(2);
        assert!(invalid.validate().is_err());

        let invalid = BridgeConfig::new().with_module_cache_entries(0);
        assert!(invalid.validate().is_err());

        let valid = BridgeConfig::default();
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = BridgeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.initial_handle_capacity,
            config.initial_handle_capacity
        );
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let parsed: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(
            parsed.live_handle_warn_threshold,
            DEFAULT_LIVE_HANDLE_WARN_THRESHOLD
        );
    }
}
