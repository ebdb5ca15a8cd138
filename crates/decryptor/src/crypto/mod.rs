//! Version-2 encrypted value primitives.
//!
//! This module has no async or concurrency dependencies. It provides the
//! single-value operations the bag layer fans out.
//!
//! # Stored value format
//!
//! ```text
//! encrypted_data = base64(AES-256-CBC(SHA-256(secret), iv, {"json_wrapper":"<value>"}))
//! hmac           = base64(HMAC-SHA256(secret, encrypted_data as stored))
//! ```
//!
//! Base64 text is line-wrapped at 60 columns with a trailing newline.

pub mod cipher;
pub mod secret;
pub mod unwrap;
pub mod value;

pub use cipher::{decrypt, encrypt, encrypt_with_iv};
pub use secret::Secret;
pub use value::EncryptedValue;
