//! Module loading: compile, cache, instantiate, and wire to a bridge.
//!
//! Compilation is backend-pluggable through [`ModuleBackend`]. Streaming
//! sources compile incrementally when the backend supports it; when it
//! does not (or the source is misconfigured for streaming), the loader
//! falls back to buffered compilation using the bytes already drained
//! from the stream, so a broken streaming setup degrades to a slower load
//! instead of a failed one.
//!
//! Compiled modules are cached by content checksum. Loading the same
//! module bytes twice compiles once.

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, LoadError};
use crate::module::GuestModule;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A module compiled by a backend, keyed by content checksum
pub struct CompiledModule {
    bytes: Vec<u8>,
    checksum: String,
}

impl CompiledModule {
    /// Wrap compiled module bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        let checksum = checksum(&bytes);
        Self { bytes, checksum }
    }

    /// The module bytes as compiled
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Content checksum identifying this module
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("len", &self.bytes.len())
            .field("checksum", &self.checksum)
            .finish()
    }
}

/// Compute the cache key for module bytes
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.update(b":v1");
    hex::encode(hasher.finalize())
}

/// Where module bytes come from
pub enum ModuleSource {
    /// Fully buffered module bytes
    Bytes(Vec<u8>),
    /// An incremental byte stream (network response, file reader)
    Stream(Box<dyn Read + Send>),
    /// A module compiled earlier, shared across instantiations
    Precompiled(Arc<CompiledModule>),
}

impl std::fmt::Debug for ModuleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleSource::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            ModuleSource::Stream(_) => f.write_str("Stream(..)"),
            ModuleSource::Precompiled(m) => f.debug_tuple("Precompiled").field(m).finish(),
        }
    }
}

impl From<Vec<u8>> for ModuleSource {
    fn from(bytes: Vec<u8>) -> Self {
        ModuleSource::Bytes(bytes)
    }
}

/// Engine adapter the loader compiles and instantiates through.
pub trait ModuleBackend: Send + Sync {
    /// Compile fully buffered module bytes
    fn compile(&self, bytes: &[u8]) -> Result<Arc<CompiledModule>, LoadError>;

    /// Compile from a byte stream as it arrives.
    ///
    /// The default implementation does not stream: it drains the reader
    /// and reports [`LoadError::StreamingUnavailable`] carrying the bytes,
    /// which the loader feeds to buffered compilation.
    fn compile_streaming(
        &self,
        reader: &mut dyn Read,
    ) -> Result<Arc<CompiledModule>, LoadError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Err(LoadError::StreamingUnavailable {
            reason: "backend has no streaming compiler".into(),
            bytes,
        })
    }

    /// Instantiate a compiled module against a bridge's import surface
    fn instantiate(
        &self,
        compiled: &Arc<CompiledModule>,
        bridge: &Arc<Bridge>,
    ) -> Result<Arc<dyn GuestModule>, LoadError>;
}

/// A module instantiated and wired to its bridge
pub struct LoadedModule {
    /// Unique id of this instantiation
    pub id: String,
    /// The compiled module it was built from
    pub compiled: Arc<CompiledModule>,
    /// The live instance
    pub module: Arc<dyn GuestModule>,
}

/// Compiles module sources through a backend and instantiates them
/// against fresh bridges.
pub struct ModuleLoader {
    backend: Box<dyn ModuleBackend>,
    cache: DashMap<String, Arc<CompiledModule>>,
    max_cache_entries: usize,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl ModuleLoader {
    /// Create a loader over a backend
    pub fn new(backend: Box<dyn ModuleBackend>, config: &BridgeConfig) -> Self {
        Self {
            backend,
            cache: DashMap::new(),
            max_cache_entries: config.max_module_cache_entries,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Compile a source down to a cached module without instantiating it
    pub fn compile(&self, source: ModuleSource) -> Result<Arc<CompiledModule>, LoadError> {
        match source {
            ModuleSource::Precompiled(compiled) => Ok(compiled),
            ModuleSource::Bytes(bytes) => self.compile_cached(&bytes),
            ModuleSource::Stream(mut reader) => {
                match self.backend.compile_streaming(reader.as_mut()) {
                    Ok(compiled) => Ok(compiled),
                    Err(LoadError::StreamingUnavailable { reason, bytes }) => {
                        warn!(%reason, "Streaming compilation unavailable, falling back to buffered compile");
                        self.compile_cached(&bytes)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Compile (or fetch from cache), instantiate, attach the bridge, and
    /// run the guest entry point.
    ///
    /// The bridge is attached before `start()` runs so the entry point can
    /// already marshal values and register closures.
    pub fn instantiate(
        &self,
        bridge: &Arc<Bridge>,
        source: ModuleSource,
    ) -> Result<LoadedModule, BridgeError> {
        let compiled = self.compile(source)?;
        let module = self.backend.instantiate(&compiled, bridge)?;
        bridge.attach(module.clone())?;
        module.start().map_err(BridgeError::Module)?;

        let id = Uuid::new_v4().to_string();
        info!(
            instance_id = %id,
            checksum = %compiled.checksum(),
            "Module instantiated"
        );

        Ok(LoadedModule {
            id,
            compiled,
            module,
        })
    }

    /// Cache hits since creation
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Cache misses since creation
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Compiled modules currently cached
    pub fn cached_modules(&self) -> usize {
        self.cache.len()
    }

    fn compile_cached(&self, bytes: &[u8]) -> Result<Arc<CompiledModule>, LoadError> {
        let key = checksum(bytes);
        if let Some(compiled) = self.cache.get(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(checksum = %key, "Module cache hit");
            return Ok(compiled.clone());
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        let compiled = self.backend.compile(bytes)?;
        if self.cache.len() < self.max_cache_entries {
            self.cache.insert(key, compiled.clone());
        } else {
            warn!(
                entries = self.cache.len(),
                "Module cache full, compiled module not retained"
            );
        }
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::testing::FakeGuest;
    use std::sync::atomic::AtomicU32;

    /// Backend that "compiles" by wrapping bytes and hands out a shared
    /// fake guest, so tests can observe the instance after loading.
    struct FakeBackend {
        compiles: AtomicU32,
        guest: Arc<FakeGuest>,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                compiles: AtomicU32::new(0),
                guest: Arc::new(FakeGuest::new(256)),
            }
        }
    }

    impl ModuleBackend for FakeBackend {
        fn compile(&self, bytes: &[u8]) -> Result<Arc<CompiledModule>, LoadError> {
            if bytes.is_empty() {
                return Err(LoadError::Compile("empty module".into()));
            }
            self.compiles.fetch_add(1, Ordering::Relaxed);
            Ok(Arc::new(CompiledModule::new(bytes.to_vec())))
        }

        fn instantiate(
            &self,
            _compiled: &Arc<CompiledModule>,
            _bridge: &Arc<Bridge>,
        ) -> Result<Arc<dyn GuestModule>, LoadError> {
            Ok(self.guest.clone())
        }
    }

    fn loader() -> ModuleLoader {
        ModuleLoader::new(Box::new(FakeBackend::new()), &BridgeConfig::default())
    }

    #[test]
    fn test_checksum_is_content_addressed() {
        assert_eq!(checksum(b"abc"), checksum(b"abc"));
        assert_ne!(checksum(b"abc"), checksum(b"abd"));
        assert_eq!(checksum(b"abc").len(), 64);
    }

    #[test]
    fn test_compile_caches_by_checksum() {
        let loader = loader();
        let a = loader.compile(vec![1, 2, 3].into()).unwrap();
        let b = loader.compile(vec![1, 2, 3].into()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.cache_hits(), 1);
        assert_eq!(loader.cache_misses(), 1);
        assert_eq!(loader.cached_modules(), 1);
    }

    #[test]
    fn test_cache_respects_entry_limit() {
        let config = BridgeConfig::default().with_module_cache_entries(1);
        let loader = ModuleLoader::new(Box::new(FakeBackend::new()), &config);
        loader.compile(vec![1].into()).unwrap();
        loader.compile(vec![2].into()).unwrap();
        assert_eq!(loader.cached_modules(), 1);
        // The uncached module still compiles, just without retention.
        loader.compile(vec![2].into()).unwrap();
        assert_eq!(loader.cache_hits(), 0);
    }

    #[test]
    fn test_stream_falls_back_to_buffered_compile() {
        let loader = loader();
        let source = ModuleSource::Stream(Box::new(std::io::Cursor::new(vec![7, 8, 9])));
        let compiled = loader.compile(source).unwrap();
        assert_eq!(compiled.bytes(), &[7, 8, 9]);
        // The drained bytes landed in the cache like any buffered compile.
        let again = loader.compile(vec![7, 8, 9].into()).unwrap();
        assert!(Arc::ptr_eq(&compiled, &again));
    }

    #[test]
    fn test_precompiled_skips_backend() {
        let loader = loader();
        let compiled = Arc::new(CompiledModule::new(vec![4, 5]));
        let out = loader
            .compile(ModuleSource::Precompiled(compiled.clone()))
            .unwrap();
        assert!(Arc::ptr_eq(&compiled, &out));
        assert_eq!(loader.cache_misses(), 0);
    }

    #[test]
    fn test_compile_error_propagates() {
        let loader = loader();
        assert!(matches!(
            loader.compile(Vec::new().into()),
            Err(LoadError::Compile(_))
        ));
    }

    #[test]
    fn test_instantiate_attaches_bridge_then_starts() {
        let backend = FakeBackend::new();
        let guest = backend.guest.clone();
        let loader = ModuleLoader::new(Box::new(backend), &BridgeConfig::default());
        let bridge = Arc::new(Bridge::new(BridgeConfig::default()).unwrap());
        let loaded = loader.instantiate(&bridge, vec![1, 2, 3].into()).unwrap();

        assert!(bridge.is_attached());
        assert!(!loaded.id.is_empty());
        assert!(guest.was_started());
    }

    #[test]
    fn test_instantiate_twice_on_one_bridge_fails() {
        let loader = loader();
        let bridge = Arc::new(Bridge::new(BridgeConfig::default()).unwrap());
        loader.instantiate(&bridge, vec![1].into()).unwrap();
        assert!(matches!(
            loader.instantiate(&bridge, vec![1].into()),
            Err(BridgeError::AlreadyAttached)
        ));
    }
}
