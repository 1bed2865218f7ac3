//! Hashing utilities.

/// Incremental [`blake3`] hasher for deriving stable, content-addressed identifiers.
///
/// Every field is length prefixed so `("ab", "c")` and `("a", "bc")` hash differently.
pub struct ContentHasher {
    inner: blake3::Hasher,
}

impl Default for ContentHasher {
    fn default() -> Self {
        ContentHasher::new()
    }
}

impl ContentHasher {
    /// Create a new [`ContentHasher`].
    pub fn new() -> Self {
        ContentHasher {
            inner: blake3::Hasher::new(),
        }
    }

    /// Feed a single length-prefixed field into the hasher.
    pub fn field(&mut self, input: &[u8]) -> &mut Self {
        let len = u64::try_from(input.len()).expect("field longer than u64::MAX");
        self.inner.update(&len.to_le_bytes());
        self.inner.update(input);
        self
    }

    /// Lowercase hex encoding of the first `bytes` bytes of the digest.
    ///
    /// # Panics
    /// * If `bytes` is larger than the 32 byte digest.
    pub fn hex_digest(&self, bytes: usize) -> String {
        let hex = self.inner.finalize().to_hex();
        hex.as_str()[..bytes * 2].to_string()
    }
}
