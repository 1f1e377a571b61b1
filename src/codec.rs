//! UTF-8 string marshalling between host text and guest memory.
//!
//! Encoding is two-phase: allocate for the optimistic all-ASCII size,
//! copy byte-for-byte while code points stay at or below 0x7F, and on the
//! first non-ASCII code point reallocate to `offset + remaining_units * 3`
//! (the worst-case UTF-8 expansion for the remaining text) and copy the
//! rest in full.
//!
//! The number of bytes actually written lands in a single shared scratch
//! slot that the caller must consume immediately via [`StringCodec::take_len`].
//! Interleaving two encodes is a correctness violation, not a performance
//! concern, and is treated as fatal.
//!
//! Decoding is strict: a malformed byte sequence aborts instead of being
//! silently replaced, so marshalling bugs are never masked.

use crate::error::ModuleError;
use crate::memory::ViewCache;
use crate::module::GuestModule;
use parking_lot::Mutex;

/// Bidirectional UTF-8 codec over guest memory.
pub struct StringCodec {
    pending_len: Mutex<Option<u32>>,
}

impl StringCodec {
    /// Create a codec with an empty length scratch
    pub fn new() -> Self {
        Self {
            pending_len: Mutex::new(None),
        }
    }

    /// Encode `text` into freshly allocated guest memory and return the
    /// pointer. The written byte length is parked in the shared scratch
    /// and must be consumed with [`StringCodec::take_len`] before any
    /// other encode starts.
    ///
    /// The allocation is requested from the guest's exported allocator;
    /// the caller is responsible for freeing it (or handing ownership to a
    /// longer-lived guest value).
    ///
    /// # Panics
    /// Panics if a previous encode's length is still unconsumed.
    pub fn encode(
        &self,
        module: &dyn GuestModule,
        views: &ViewCache,
        text: &str,
    ) -> Result<u32, ModuleError> {
        if self.pending_len.lock().is_some() {
            panic!("string encode re-entered before the previous length was consumed");
        }

        // Optimistic sizing: one byte per UTF-16 unit, exact for ASCII.
        let size = text.encode_utf16().count() as u32;
        let mut ptr = module.alloc(size)?;

        let ascii_len = text
            .bytes()
            .position(|b| b > 0x7F)
            .unwrap_or(text.len());
        // The allocator may have grown memory; always go through the cache.
        views
            .view(module)
            .write_bytes(ptr, &text.as_bytes()[..ascii_len]);
        let mut written = ascii_len as u32;

        if ascii_len < text.len() {
            let rest = &text[ascii_len..];
            let capacity = written + rest.encode_utf16().count() as u32 * 3;
            ptr = module.realloc(ptr, size, capacity)?;
            views
                .view(module)
                .write_bytes(ptr + written, rest.as_bytes());
            written += rest.len() as u32;
        }

        *self.pending_len.lock() = Some(written);
        Ok(ptr)
    }

    /// Consume the byte length recorded by the last [`StringCodec::encode`].
    ///
    /// # Panics
    /// Panics if no encode is pending.
    pub fn take_len(&self) -> u32 {
        self.pending_len
            .lock()
            .take()
            .unwrap_or_else(|| panic!("no encoded string length pending"))
    }

    /// Decode exactly `len` bytes at `ptr` from guest memory into an owned
    /// host string. No ownership transfer: the guest keeps its bytes.
    ///
    /// # Panics
    /// Panics on malformed UTF-8 (strict decoding).
    pub fn decode(
        &self,
        module: &dyn GuestModule,
        views: &ViewCache,
        ptr: u32,
        len: u32,
    ) -> String {
        let bytes = views.view(module).read_bytes(ptr, len);
        String::from_utf8(bytes)
            .unwrap_or_else(|e| panic!("malformed UTF-8 in guest memory at {ptr}: {e}"))
    }
}

impl Default for StringCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ViewCache;
    use crate::module::testing::FakeGuest;

    fn round_trip(text: &str) -> String {
        let guest = FakeGuest::new(64);
        let views = ViewCache::new();
        let codec = StringCodec::new();
        let ptr = codec.encode(&guest, &views, text).unwrap();
        let len = codec.take_len();
        codec.decode(&guest, &views, ptr, len)
    }

    #[test]
    fn test_ascii_round_trip() {
        assert_eq!(round_trip("hello world"), "hello world");
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(round_trip(""), "");
    }

    #[test]
    fn test_mixed_ascii_then_multibyte_takes_realloc_path() {
        // ASCII prefix, then a three-byte code point, then ASCII again.
        assert_eq!(round_trip("abc\u{20AC}def"), "abc\u{20AC}def");
    }

    #[test]
    fn test_leading_multibyte() {
        assert_eq!(round_trip("\u{20AC}rest"), "\u{20AC}rest");
    }

    #[test]
    fn test_astral_code_points() {
        // Four-byte UTF-8; two UTF-16 units budget six bytes, enough.
        assert_eq!(round_trip("a\u{1F600}b"), "a\u{1F600}b");
    }

    #[test]
    fn test_encoded_length_is_utf8_byte_length() {
        let guest = FakeGuest::new(64);
        let views = ViewCache::new();
        let codec = StringCodec::new();
        let text = "abc\u{20AC}";
        codec.encode(&guest, &views, text).unwrap();
        assert_eq!(codec.take_len() as usize, text.len());
    }

    #[test]
    fn test_realloc_path_survives_memory_growth() {
        // A tiny initial buffer forces the allocator to grow (and replace)
        // the memory during encode; the codec must re-fetch views.
        let guest = FakeGuest::new(8);
        let views = ViewCache::new();
        let codec = StringCodec::new();
        let text = "prefix-prefix-prefix\u{20AC}suffix";
        let ptr = codec.encode(&guest, &views, text).unwrap();
        let len = codec.take_len();
        assert_eq!(codec.decode(&guest, &views, ptr, len), text);
        assert!(views.rebuilds() > 1);
    }

    #[test]
    #[should_panic(expected = "re-entered")]
    fn test_interleaved_encodes_are_fatal() {
        let guest = FakeGuest::new(64);
        let views = ViewCache::new();
        let codec = StringCodec::new();
        codec.encode(&guest, &views, "first").unwrap();
        // Length not consumed; a second encode must abort.
        let _ = codec.encode(&guest, &views, "second");
    }

    #[test]
    #[should_panic(expected = "no encoded string length pending")]
    fn test_take_len_without_encode_is_fatal() {
        StringCodec::new().take_len();
    }

    #[test]
    #[should_panic(expected = "malformed UTF-8")]
    fn test_invalid_continuation_byte_is_fatal() {
        let guest = FakeGuest::new(64);
        let views = ViewCache::new();
        let codec = StringCodec::new();
        let ptr = guest.alloc(3).unwrap();
        // 0xE2 opens a three-byte sequence; 0x28 is not a continuation byte.
        views.view(&guest).write_bytes(ptr, &[0xE2, 0x28, 0xA1]);
        codec.decode(&guest, &views, ptr, 3);
    }
}
