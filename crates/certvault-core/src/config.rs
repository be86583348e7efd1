// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Runtime configuration.
//
// The library crates never read the process environment themselves; the
// binary hands a lookup function to `CertVaultConfig::from_lookup` and passes
// the resulting values down explicitly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CertVaultError, Result};

/// Key file location relative to the working directory.
pub const DEFAULT_KEY_FILE: &str = "secret.key";

/// Directory holding one ciphertext file per evidence upload.
pub const DEFAULT_STORAGE_DIR: &str = "secure_storage";

/// CERT ingest endpoint used when none is configured.
pub const DEFAULT_WEBHOOK_URL: &str = "http://nginx/api/v1/cert/ingest";

/// Development-only signing secret.
pub const DEFAULT_WEBHOOK_SECRET: &str = "dev_cert_secret";

/// Replay tolerance window in seconds.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Bound on a single outbound webhook POST.
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 5;

pub const ENV_WEBHOOK_URL: &str = "CERT_WEBHOOK_URL";
pub const ENV_WEBHOOK_SECRET: &str = "CERT_WEBHOOK_SECRET";
pub const ENV_TOLERANCE: &str = "CERT_SIGNATURE_TOLERANCE";
pub const ENV_WEBHOOK_TIMEOUT: &str = "CERT_WEBHOOK_TIMEOUT";
pub const ENV_KEY_FILE: &str = "CERTVAULT_KEY_FILE";
pub const ENV_STORAGE_DIR: &str = "CERTVAULT_STORAGE_DIR";

/// Settings for the vault, evidence store, and CERT webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertVaultConfig {
    /// Path of the raw 32-byte vault key.
    pub key_file: PathBuf,
    /// Directory that receives `.enc` evidence files.
    pub storage_dir: PathBuf,
    /// CERT ingest endpoint for escalation pushes.
    pub webhook_url: String,
    /// Shared HMAC secret. Not serialized back out.
    #[serde(skip_serializing, default = "default_secret")]
    pub webhook_secret: String,
    /// Maximum accepted age (either direction) of a signed timestamp.
    pub tolerance_secs: u64,
    /// Timeout for one outbound POST.
    pub webhook_timeout_secs: u64,
}

fn default_secret() -> String {
    DEFAULT_WEBHOOK_SECRET.to_owned()
}

impl Default for CertVaultConfig {
    fn default() -> Self {
        Self {
            key_file: PathBuf::from(DEFAULT_KEY_FILE),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            webhook_url: DEFAULT_WEBHOOK_URL.to_owned(),
            webhook_secret: default_secret(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            webhook_timeout_secs: DEFAULT_WEBHOOK_TIMEOUT_SECS,
        }
    }
}

impl CertVaultConfig {
    /// Build a config from a key/value lookup, falling back to defaults for
    /// anything missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get(ENV_WEBHOOK_URL) {
            config.webhook_url = url;
        }
        if let Some(secret) = get(ENV_WEBHOOK_SECRET) {
            config.webhook_secret = secret;
        }
        if let Some(raw) = get(ENV_TOLERANCE) {
            config.tolerance_secs = parse_secs(ENV_TOLERANCE, &raw)?;
        }
        if let Some(raw) = get(ENV_WEBHOOK_TIMEOUT) {
            config.webhook_timeout_secs = parse_secs(ENV_WEBHOOK_TIMEOUT, &raw)?;
            if config.webhook_timeout_secs == 0 {
                return Err(CertVaultError::Configuration(format!(
                    "{ENV_WEBHOOK_TIMEOUT} must be at least 1 second"
                )));
            }
        }
        if let Some(path) = get(ENV_KEY_FILE) {
            config.key_file = PathBuf::from(path);
        }
        if let Some(path) = get(ENV_STORAGE_DIR) {
            config.storage_dir = PathBuf::from(path);
        }

        Ok(config)
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|e| {
        CertVaultError::Configuration(format!("{key}={raw:?} is not a number of seconds: {e}"))
    })
}
