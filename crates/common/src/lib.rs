//! Common types, wire formats, and errors shared across `databag-decryptor` crates.

pub mod error;
pub mod protocol;

pub use error::{BagError, DecryptError};
pub use protocol::{Bag, DecryptedBag, EncryptedValueRecord, FieldFailure};
