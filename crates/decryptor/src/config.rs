//! Configuration loading and validation for the bag decryptor.
//!
//! Values are read from `DATABAG_`-prefixed environment variables. The secret
//! is never part of the configuration; callers pass it per decrypt call.

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::Semaphore;

/// Environment variable prefix, e.g. `DATABAG_MAX_CONCURRENCY`.
pub const ENV_PREFIX: &str = "DATABAG";

/// Output format of the tracing subscriber installed by [`crate::telemetry::init`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Validated decryptor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DecryptorConfig {
    /// Upper bound on concurrently decrypting fields within one
    /// `decrypt_bag` call. Absent means one unit per field with no cap.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for DecryptorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl DecryptorConfig {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_environment(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .context("failed to build decryptor configuration from environment")?;

        let c: DecryptorConfig = cfg
            .try_deserialize()
            .context("failed to deserialise decryptor configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        match self.max_concurrency {
            Some(0) => anyhow::bail!("{ENV_PREFIX}_MAX_CONCURRENCY must be > 0 when set"),
            Some(n) if n > Semaphore::MAX_PERMITS => anyhow::bail!(
                "{ENV_PREFIX}_MAX_CONCURRENCY must be <= {} (got {n})",
                Semaphore::MAX_PERMITS
            ),
            _ => {}
        }
        if self.log_level.trim().is_empty() {
            anyhow::bail!("{ENV_PREFIX}_LOG_LEVEL must not be empty");
        }
        Ok(())
    }
}
