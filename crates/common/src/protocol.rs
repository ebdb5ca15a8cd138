//! Bag shapes and the encrypted-value record format.
//!
//! Bags arrive as loosely-typed JSON objects from whatever client fetched them;
//! decrypted bags and failure reports leave as plain serde types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Reserved key holding the bag identifier. Its value is never encrypted.
pub const ID_KEY: &str = "id";

/// The only cipher identifier accepted by the version-2 scheme.
pub const CIPHER_AES_256_CBC: &str = "aes-256-cbc";

/// Scheme version written by [`EncryptedValueRecord`] producers.
pub const SCHEME_VERSION: i64 = 2;

/// Raw bag as delivered by a retrieval client: `"id"` plus encrypted records.
pub type Bag = serde_json::Map<String, serde_json::Value>;

/// Decrypted bag: field name to plaintext, always including `"id"`.
pub type DecryptedBag = HashMap<String, String>;

// ---------------------------------------------------------------------------
// Encrypted value record
// ---------------------------------------------------------------------------

/// Strictly-typed form of one encrypted field.
///
/// ```text
/// {
///   "encrypted_data": "<base64>",
///   "hmac": "<base64>",
///   "iv": "<base64>",
///   "version": 2,
///   "cipher": "aes-256-cbc"
/// }
/// ```
///
/// The base64 text is kept exactly as stored (including line breaks) because
/// the HMAC is computed over that text, not over the decoded ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValueRecord {
    pub encrypted_data: String,
    pub hmac: String,
    pub iv: String,
    pub version: i64,
    pub cipher: String,
}

// ---------------------------------------------------------------------------
// Failure report
// ---------------------------------------------------------------------------

/// Serialisable description of one field that failed to decrypt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFailure {
    /// Name of the bag field.
    pub field: String,
    /// Short machine-readable error code (e.g. `"integrity"`).
    pub code: String,
    /// Human-readable description. Never contains key material or plaintext.
    pub message: String,
}

impl FieldFailure {
    /// Construct a [`FieldFailure`] from its parts.
    pub fn new(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}
