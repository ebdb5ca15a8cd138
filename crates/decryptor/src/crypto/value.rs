//! [`EncryptedValue`]: typed view of one encrypted bag field.

use common::{DecryptError, EncryptedValueRecord};
use serde_json::Value;

use super::cipher;

/// Raw parts of one encrypted field, immutable after construction.
///
/// `encrypted_data`, `hmac` and `iv` hold the stored base64 *text* as bytes.
/// Nothing is validated here: missing or mistyped fields stay empty and the
/// decrypt algorithm rejects them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedValue {
    encrypted_data: Vec<u8>,
    hmac: Vec<u8>,
    iv: Vec<u8>,
    version: i64,
    cipher: String,
}

impl EncryptedValue {
    /// Build an [`EncryptedValue`] from loosely-typed JSON.
    ///
    /// Returns `None` if `input` is not a JSON object. Byte fields accept a
    /// string or an array of byte values; `version` accepts integer or
    /// floating-point numbers; `cipher` accepts only a string.
    pub fn from_value(input: &Value) -> Option<Self> {
        let values = input.as_object()?;
        Some(Self {
            encrypted_data: bytes_field(values.get("encrypted_data")),
            hmac: bytes_field(values.get("hmac")),
            iv: bytes_field(values.get("iv")),
            version: values.get("version").map(integer_field).unwrap_or_default(),
            cipher: values
                .get("cipher")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        })
    }

    /// Stored base64 text of the ciphertext.
    pub fn encrypted_data(&self) -> &[u8] {
        &self.encrypted_data
    }

    /// Stored base64 text of the HMAC.
    pub fn hmac(&self) -> &[u8] {
        &self.hmac
    }

    /// Stored base64 text of the IV.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Scheme version as recorded; informational only.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Cipher name, expected to be `"aes-256-cbc"`.
    pub fn cipher(&self) -> &str {
        &self.cipher
    }

    /// Run the full version-2 decrypt protocol against `secret`.
    ///
    /// # Errors
    ///
    /// See [`cipher::decrypt`].
    pub fn decrypt(&self, secret: &[u8]) -> Result<String, DecryptError> {
        cipher::decrypt(self, secret)
    }

    /// Check only the HMAC over the stored ciphertext text.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptError::Encoding`] if the stored HMAC is not base64 and
    /// [`DecryptError::Integrity`] if it does not match.
    pub fn verify_hmac(&self, secret: &[u8]) -> Result<(), DecryptError> {
        cipher::verify_hmac(self, secret)
    }
}

impl From<EncryptedValueRecord> for EncryptedValue {
    fn from(record: EncryptedValueRecord) -> Self {
        Self {
            encrypted_data: record.encrypted_data.into_bytes(),
            hmac: record.hmac.into_bytes(),
            iv: record.iv.into_bytes(),
            version: record.version,
            cipher: record.cipher,
        }
    }
}

fn bytes_field(value: Option<&Value>) -> Vec<u8> {
    match value {
        Some(Value::String(s)) => s.as_bytes().to_vec(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect::<Option<Vec<u8>>>()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn integer_field(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        _ => 0,
    }
}
