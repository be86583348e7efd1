// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! certvault-security: cryptographic foundation for evidence handling.
//!
//! Fingerprints evidence with SHA-256, encrypts it at rest under a single
//! vault key (AES-256-GCM), writes ciphertext under content-derived names, and
//! signs / verifies CERT webhook payloads with timestamped HMAC-SHA256.

pub mod evidence;
pub mod integrity;
pub mod signature;
pub mod vault;

// PUBLIC API: Re-export core security primitives
pub use evidence::{EvidenceStore, FileNaming};
pub use integrity::{fingerprint, verify_fingerprint};
pub use signature::{SignatureHeader, WebhookSigner, WebhookVerifier, sign, verify, verify_at};
pub use vault::{EncryptionVault, VaultKey};
