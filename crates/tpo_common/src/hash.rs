//! Content hashing for build fingerprints and cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 128-bit content hash computed using XXH3.
///
/// Two inputs with the same `ContentHash` are assumed to be byte-identical.
/// Used to fingerprint platform configurations, example source trees, and
/// the combined build inputs that key the build cache.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Parses a hash from its 32-character lowercase hex form.
    ///
    /// Returns `None` for anything that is not exactly 32 hex digits.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.is_ascii() {
            return None;
        }
        let mut out = [0u8; 16];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }

    /// The raw 16 digest bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns the first 8 hex characters, used in directory names and logs.
    pub fn short(&self) -> String {
        self.to_string()[..8].to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Incremental XXH3-128 hasher for inputs assembled from several parts.
///
/// Every part is length-prefixed so that `("ab", "c")` and `("a", "bc")`
/// never collide.
pub struct ContentHasher {
    inner: xxhash_rust::xxh3::Xxh3,
}

impl ContentHasher {
    /// Creates an empty hasher.
    pub fn new() -> Self {
        Self {
            inner: xxhash_rust::xxh3::Xxh3::new(),
        }
    }

    /// Feeds one length-prefixed part into the hash.
    pub fn update(&mut self, part: &[u8]) -> &mut Self {
        self.inner.update(&(part.len() as u64).to_le_bytes());
        self.inner.update(part);
        self
    }

    /// Finishes hashing and returns the digest.
    pub fn finish(&self) -> ContentHash {
        ContentHash(self.inner.digest128().to_le_bytes())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}
