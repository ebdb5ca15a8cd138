//! Error types for single-value and whole-bag decryption.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::protocol::{DecryptedBag, FieldFailure};

/// Failure of the single-value decrypt protocol.
///
/// Each variant identifies the step that aborted. Variants map to stable codes
/// via [`DecryptError::code`]:
/// - [`DecryptError::InputShape`] → `input_shape`
/// - [`DecryptError::Integrity`] → `integrity`
/// - [`DecryptError::UnsupportedCipher`] → `unsupported_cipher`
/// - [`DecryptError::Encoding`] → `encoding`
/// - [`DecryptError::CryptoInit`] → `crypto_init`
/// - [`DecryptError::Unwrap`] → `unwrap`
/// - [`DecryptError::Aborted`] → `aborted`
#[derive(Debug, Error)]
pub enum DecryptError {
    /// The input is not a recognised record or mapping.
    #[error("input shape error: {0}")]
    InputShape(String),

    /// The stored HMAC does not match the one computed with the supplied secret.
    #[error("invalid hmac: most likely the provided secret is incorrect")]
    Integrity,

    /// The record names a cipher other than `aes-256-cbc`.
    #[error("unsupported cipher: {0:?}")]
    UnsupportedCipher(String),

    /// A binary field is not valid base64.
    #[error("malformed base64 in {field}: {reason}")]
    Encoding {
        /// Which record field failed to decode (`encrypted_data`, `hmac` or `iv`).
        field: &'static str,
        reason: String,
    },

    /// The block cipher rejected the key, IV or ciphertext length.
    #[error("cipher initialisation failed: {0}")]
    CryptoInit(String),

    /// The decrypted plaintext did not yield a wrapped value.
    #[error("could not unwrap decrypted value: {0}")]
    Unwrap(String),

    /// The concurrent unit decrypting this field never produced a result.
    #[error("decryption aborted: {0}")]
    Aborted(String),
}

impl DecryptError {
    /// Returns the short machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            DecryptError::InputShape(_) => "input_shape",
            DecryptError::Integrity => "integrity",
            DecryptError::UnsupportedCipher(_) => "unsupported_cipher",
            DecryptError::Encoding { .. } => "encoding",
            DecryptError::CryptoInit(_) => "crypto_init",
            DecryptError::Unwrap(_) => "unwrap",
            DecryptError::Aborted(_) => "aborted",
        }
    }
}

/// Failure of a whole-bag decrypt.
#[derive(Debug, Error)]
pub enum BagError {
    /// The bag itself is malformed, e.g. `"id"` is missing or not a string.
    /// Nothing was decrypted.
    #[error("input shape error: {0}")]
    InputShape(String),

    /// One or more fields failed. `decrypted` holds every field that
    /// succeeded, plus `"id"`.
    #[error("failed to decrypt {} field(s): {}", .failures.len(), field_list(.failures))]
    Fields {
        decrypted: DecryptedBag,
        failures: BTreeMap<String, DecryptError>,
    },
}

impl BagError {
    /// The successfully decrypted subset, if any decryption was attempted.
    pub fn decrypted(&self) -> Option<&DecryptedBag> {
        match self {
            BagError::InputShape(_) => None,
            BagError::Fields { decrypted, .. } => Some(decrypted),
        }
    }

    /// Names of the failing fields in lexical order.
    pub fn failed_fields(&self) -> Vec<&str> {
        match self {
            BagError::InputShape(_) => Vec::new(),
            BagError::Fields { failures, .. } => failures.keys().map(String::as_str).collect(),
        }
    }

    /// Serialisable per-field report.
    ///
    /// An [`BagError::InputShape`] error has no field to name, so it is
    /// reported as a single row with an empty `field`.
    pub fn report(&self) -> Vec<FieldFailure> {
        match self {
            BagError::InputShape(msg) => vec![FieldFailure::new("", "input_shape", msg.clone())],
            BagError::Fields { failures, .. } => failures
                .iter()
                .map(|(field, e)| FieldFailure::new(field.clone(), e.code(), e.to_string()))
                .collect(),
        }
    }

    /// Split into the decrypted subset and the per-field failures.
    ///
    /// # Errors
    ///
    /// Returns the [`BagError::InputShape`] message when the bag was rejected
    /// before any field was attempted.
    pub fn into_parts(self) -> Result<(DecryptedBag, BTreeMap<String, DecryptError>), String> {
        match self {
            BagError::InputShape(msg) => Err(msg),
            BagError::Fields {
                decrypted,
                failures,
            } => Ok((decrypted, failures)),
        }
    }
}

fn field_list(failures: &BTreeMap<String, DecryptError>) -> String {
    failures.keys().cloned().collect::<Vec<_>>().join(", ")
}
