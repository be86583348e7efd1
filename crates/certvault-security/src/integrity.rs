// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Evidence integrity: SHA-256 fingerprints for content addressing.

use certvault_core::error::CertVaultError;
use certvault_core::types::Fingerprint;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 fingerprint of `data`.
///
/// Plain SHA-256 with no salt, so any independent implementation can
/// reproduce the value a reporter was given.
pub fn fingerprint(data: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest: [u8; 32] = hasher.finalize().into();
    Fingerprint::from_digest(&digest)
}

/// Verify that `data` matches the expected fingerprint.
///
/// Returns `Err(CertVaultError::IntegrityMismatch)` with the expected and
/// actual values when it does not.
pub fn verify_fingerprint(data: &[u8], expected: &Fingerprint) -> Result<(), CertVaultError> {
    let actual = fingerprint(data);
    if &actual == expected {
        Ok(())
    } else {
        Err(CertVaultError::IntegrityMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
