//! Hashing utilities.
//!
//! Used for content-addressed side-channel caches, never for anything security related.

/// Incremental `xxh3` hasher that produces a stable, printable digest.
pub struct Xxh3Hasher {
    inner: xxhash_rust::xxh3::Xxh3,
}

impl Default for Xxh3Hasher {
    fn default() -> Self {
        Xxh3Hasher::new()
    }
}

impl Xxh3Hasher {
    /// Create a new [`Xxh3Hasher`].
    pub const fn new() -> Self {
        Xxh3Hasher {
            inner: xxhash_rust::xxh3::Xxh3::new(),
        }
    }

    pub fn update(&mut self, input: &[u8]) {
        self.inner.update(input);
    }

    /// Feed a string followed by a separator, so `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn update_str(&mut self, input: &str) {
        self.inner.update(input.as_bytes());
        self.inner.update(&[0]);
    }

    /// Lowercase hex encoding of the 128-bit digest.
    pub fn hex_digest(&self) -> String {
        format!("{:032x}", self.inner.digest128())
    }
}
