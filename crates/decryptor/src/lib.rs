//! Decryption of version-2 encrypted data bag items.
//!
//! A bag is a JSON object with a plain `"id"` and one encrypted record per
//! remaining field. [`BagDecryptor`] verifies, decrypts and unwraps every
//! field concurrently and returns a map of plaintext strings.
//!
//! ```no_run
//! # async fn run(bag: databag_decryptor::Bag, secret: Vec<u8>) -> anyhow::Result<()> {
//! use databag_decryptor::{BagDecryptor, DecryptorConfig};
//!
//! let cfg = DecryptorConfig::from_env()?;
//! let decrypted = BagDecryptor::new(&cfg)?.decrypt_bag(&bag, &secret).await?;
//! println!("{}", decrypted["id"]);
//! # Ok(())
//! # }
//! ```

pub mod bag;
pub mod config;
pub mod crypto;
pub mod telemetry;

pub use bag::{BagDecryptor, SchemeV2, ValueDecryptor};
pub use common::{Bag, BagError, DecryptError, DecryptedBag, EncryptedValueRecord, FieldFailure};
pub use config::{DecryptorConfig, LogFormat};
pub use crypto::{decrypt, encrypt, EncryptedValue};

/// Decrypt `bag` with an unbounded version-2 [`BagDecryptor`].
///
/// # Errors
///
/// See [`BagDecryptor::decrypt_bag`].
pub async fn decrypt_bag(bag: &Bag, secret: &[u8]) -> Result<DecryptedBag, BagError> {
    <BagDecryptor>::default().decrypt_bag(bag, secret).await
}
