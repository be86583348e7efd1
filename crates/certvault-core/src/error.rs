// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for CertVault.

use thiserror::Error;

/// Top-level error type for all CertVault operations.
#[derive(Debug, Error)]
pub enum CertVaultError {
    // -- Evidence storage --
    #[error("evidence storage failed: {0}")]
    Storage(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("invalid fingerprint {0:?}: expected 64 lowercase hex characters")]
    InvalidFingerprint(String),

    // -- Vault --
    #[error("vault configuration error: {0}")]
    Configuration(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Ring reports nothing beyond "unspecified", and that is all callers get.
    #[error("decryption failed: ciphertext rejected")]
    Decryption,

    // -- Webhooks --
    /// Deliberately carries no detail: malformed header, stale timestamp and
    /// digest mismatch all look the same from the outside.
    #[error("signature invalid")]
    SignatureInvalid,

    #[error("webhook delivery failed: {0}")]
    Delivery(String),

    #[error("ingest server error: {0}")]
    IngestServer(String),

    // -- Plumbing --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CertVaultError>;
