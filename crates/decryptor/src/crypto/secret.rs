//! [`Secret`]: the shared bag secret held for the duration of one call.

/// Opaque secret bytes used for both HMAC verification and key derivation.
///
/// Built once per bag decrypt and shared by every field unit behind an `Arc`.
/// When this type is dropped the buffer is overwritten with zeroes.
pub struct Secret(Box<[u8]>);

impl Secret {
    /// Copy `bytes` into a new [`Secret`].
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.to_vec().into_boxed_slice())
    }

    /// Borrow the raw secret bytes.
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Secret {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material, not even in debug builds.
        f.write_str("Secret([REDACTED])")
    }
}
