//! Tracing subscriber setup for hosts embedding the decryptor.
//!
//! The decryptor itself only emits `tracing` events. Secrets, plaintext and
//! ciphertext never appear in any event field; field names and error codes do.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::{DecryptorConfig, LogFormat};

/// Install a global tracing subscriber at the configured level and format.
///
/// `RUST_LOG`, when set, takes precedence over `cfg.log_level`.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init(cfg: &DecryptorConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match cfg.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to initialise tracing subscriber: {e}"))
}
