//! Whole-bag decryption: one concurrent unit per encrypted field.
//!
//! # Invariants
//!
//! - `"id"` is copied verbatim and never decrypted.
//! - Every other field ends up either in the decrypted bag or in the failure
//!   map of [`common::BagError::Fields`]. Nothing is dropped silently.
//! - The merged result is the only shared mutable state; its lock is held for
//!   a single insertion, never across a decrypt.

pub mod decryptor;

pub use decryptor::BagDecryptor;

use common::DecryptError;

use crate::crypto::{self, EncryptedValue};

/// Single-value decrypt backend used by [`BagDecryptor`].
///
/// Implementations run on blocking worker threads and must be shareable
/// across them.
#[cfg_attr(test, mockall::automock)]
pub trait ValueDecryptor: Send + Sync {
    /// Decrypt one value with the bag secret.
    fn decrypt(&self, value: &EncryptedValue, secret: &[u8]) -> Result<String, DecryptError>;
}

/// The version-2 scheme: HMAC-SHA256, AES-256-CBC, `json_wrapper` envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemeV2;

impl ValueDecryptor for SchemeV2 {
    fn decrypt(&self, value: &EncryptedValue, secret: &[u8]) -> Result<String, DecryptError> {
        crypto::decrypt(value, secret)
    }
}
