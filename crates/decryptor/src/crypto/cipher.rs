//! Version-2 encrypted value protocol: HMAC-SHA256 over the stored ciphertext
//! text, AES-256-CBC with key = SHA-256(secret), JSON-wrapped plaintext.
//!
//! **Order matters.** The HMAC is checked before the cipher name is looked at
//! and before any base64 or block-cipher work on the ciphertext, so tampered
//! input never reaches the decryptor.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{
    block_padding::{NoPadding, Pkcs7},
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use common::protocol::{CIPHER_AES_256_CBC, SCHEME_VERSION};
use common::{DecryptError, EncryptedValueRecord};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::unwrap::unwrap_value;
use super::value::EncryptedValue;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// Byte length of the derived AES-256 key.
pub const KEY_LEN: usize = 32;

/// AES block size, which is also the IV length.
pub const BLOCK_LEN: usize = 16;

/// Key of the single-entry object every value is wrapped in before encryption.
pub const WRAPPER_KEY: &str = "json_wrapper";

/// Column width of the line-wrapped base64 this format stores.
const LINE_LEN: usize = 60;

/// Decrypt one encrypted value.
///
/// # Errors
///
/// Each step aborts the call:
/// 1. [`DecryptError::Encoding`] / [`DecryptError::Integrity`] from the HMAC check.
/// 2. [`DecryptError::UnsupportedCipher`] if the cipher is not `aes-256-cbc`.
/// 3. [`DecryptError::Encoding`] if the ciphertext or IV is not base64.
/// 4. [`DecryptError::CryptoInit`] on a bad IV size or ciphertext length.
/// 5. [`DecryptError::Unwrap`] if the plaintext holds no wrapped value.
pub fn decrypt(value: &EncryptedValue, secret: &[u8]) -> Result<String, DecryptError> {
    verify_hmac(value, secret)?;

    if value.cipher() != CIPHER_AES_256_CBC {
        return Err(DecryptError::UnsupportedCipher(value.cipher().to_owned()));
    }

    let mut buf = decode_field("encrypted_data", value.encrypted_data())?;
    let iv = decode_field("iv", value.iv())?;
    let key = derive_key(secret);

    let plaintext = decrypt_blocks(&key, &iv, &mut buf)?;
    unwrap_value(plaintext)
}

/// Verify the stored HMAC against one computed over the stored ciphertext text.
///
/// The MAC input is the base64 text exactly as stored, line breaks included.
/// The comparison is constant-time.
///
/// # Errors
///
/// Returns [`DecryptError::Encoding`] if the stored HMAC is not base64 and
/// [`DecryptError::Integrity`] on mismatch.
pub fn verify_hmac(value: &EncryptedValue, secret: &[u8]) -> Result<(), DecryptError> {
    let candidate = decode_field("hmac", value.hmac())?;
    let mut mac = new_mac(secret)?;
    mac.update(value.encrypted_data());
    mac.verify_slice(&candidate)
        .map_err(|_| DecryptError::Integrity)
}

/// Encrypt `plaintext` under `secret` with a fresh random IV.
///
/// # Errors
///
/// Returns [`DecryptError::CryptoInit`] if the block cipher cannot be set up
/// (unreachable with a generated IV).
pub fn encrypt(plaintext: &str, secret: &[u8]) -> Result<EncryptedValueRecord, DecryptError> {
    let mut iv = [0u8; BLOCK_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    encrypt_with_iv(plaintext, secret, &iv)
}

/// Encrypt `plaintext` under `secret` with a caller-supplied IV.
///
/// Produces the same record layout the configuration-management tool writes:
/// 60-column newline-terminated base64 and an HMAC over that text.
///
/// # Errors
///
/// Returns [`DecryptError::CryptoInit`] if `iv` is not [`BLOCK_LEN`] bytes.
pub fn encrypt_with_iv(
    plaintext: &str,
    secret: &[u8],
    iv: &[u8],
) -> Result<EncryptedValueRecord, DecryptError> {
    let key = derive_key(secret);
    let encryptor = Aes256CbcEnc::new_from_slices(&key, iv).map_err(|_| {
        DecryptError::CryptoInit(format!(
            "invalid IV length: expected {BLOCK_LEN} bytes, got {}",
            iv.len()
        ))
    })?;

    let mut envelope = serde_json::Map::new();
    envelope.insert(WRAPPER_KEY.to_owned(), Value::String(plaintext.to_owned()));
    let mut buf = Value::Object(envelope).to_string().into_bytes();

    // PKCS#7 always appends between 1 and BLOCK_LEN bytes.
    let msg_len = buf.len();
    buf.resize(msg_len + BLOCK_LEN - msg_len % BLOCK_LEN, 0);
    let ct_len = encryptor
        .encrypt_padded_mut::<Pkcs7>(&mut buf, msg_len)
        .map_err(|_| DecryptError::CryptoInit("padding buffer too small".into()))?
        .len();
    buf.truncate(ct_len);

    let encrypted_data = encode64(&buf);
    let mut mac = new_mac(secret)?;
    mac.update(encrypted_data.as_bytes());
    let hmac = encode64(&mac.finalize().into_bytes());

    Ok(EncryptedValueRecord {
        encrypted_data,
        hmac,
        iv: encode64(iv),
        version: SCHEME_VERSION,
        cipher: CIPHER_AES_256_CBC.into(),
    })
}

/// Single unsalted SHA-256 of the secret.
fn derive_key(secret: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&Sha256::digest(secret));
    key
}

fn new_mac(secret: &[u8]) -> Result<HmacSha256, DecryptError> {
    HmacSha256::new_from_slice(secret).map_err(|e| DecryptError::CryptoInit(e.to_string()))
}

/// AES-256-CBC decrypt `buf` in place, leaving any padding bytes in the output.
fn decrypt_blocks<'b>(
    key: &[u8; KEY_LEN],
    iv: &[u8],
    buf: &'b mut [u8],
) -> Result<&'b [u8], DecryptError> {
    if buf.len() % BLOCK_LEN != 0 {
        return Err(DecryptError::CryptoInit(format!(
            "ciphertext length {} is not a multiple of the {BLOCK_LEN}-byte block size",
            buf.len()
        )));
    }
    let decryptor = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| {
        DecryptError::CryptoInit(format!(
            "invalid IV length: expected {BLOCK_LEN} bytes, got {}",
            iv.len()
        ))
    })?;
    decryptor
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|_| DecryptError::CryptoInit("block decryption failed".into()))
}

/// Decode stored base64 text, skipping the line breaks it is wrapped with.
fn decode_field(field: &'static str, text: &[u8]) -> Result<Vec<u8>, DecryptError> {
    let compact: Vec<u8> = text
        .iter()
        .copied()
        .filter(|&b| !matches!(b, b'\r' | b'\n'))
        .collect();
    STANDARD
        .decode(compact)
        .map_err(|e| DecryptError::Encoding {
            field,
            reason: e.to_string(),
        })
}

fn encode64(bytes: &[u8]) -> String {
    let flat = STANDARD.encode(bytes);
    let mut out = String::with_capacity(flat.len() + flat.len() / LINE_LEN + 1);
    for (i, c) in flat.chars().enumerate() {
        if i > 0 && i % LINE_LEN == 0 {
            out.push('\n');
        }
        out.push(c);
    }
    if !flat.is_empty() {
        out.push('\n');
    }
    out
}
