// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ingest verifier: the CERT side of the webhook. The signature is checked
// against the raw body before any JSON parsing happens; a payload that fails
// verification is never deserialized, not even partially.

use secrecy::SecretString;
use tracing::{info, warn};

use certvault_core::error::{CertVaultError, Result};
use certvault_core::types::IngestAck;
use certvault_security::signature::{self, DEFAULT_TOLERANCE_SECS, WebhookVerifier};

/// Check an inbound body against its signature header with the default
/// tolerance window.
pub fn verify_incoming(raw_body: &[u8], header: &str, secret: &[u8]) -> bool {
    signature::verify(secret, raw_body, header, DEFAULT_TOLERANCE_SECS)
}

/// Verifies then parses signed escalation payloads.
#[derive(Clone)]
pub struct IngestVerifier {
    verifier: WebhookVerifier,
}

impl IngestVerifier {
    pub fn new(secret: SecretString, tolerance_secs: u64) -> Self {
        Self {
            verifier: WebhookVerifier::new(secret).with_tolerance(tolerance_secs),
        }
    }

    pub fn verify_incoming(&self, raw_body: &[u8], header: &str) -> bool {
        self.verifier.verify(raw_body, header)
    }

    /// Verify, then parse, then acknowledge.
    ///
    /// A missing or invalid signature is `SignatureInvalid` with no further
    /// detail. A verified body that is not JSON is a `Serialization` error. A
    /// verified JSON body without `incident_id` is still accepted.
    pub fn accept(&self, raw_body: &[u8], header: Option<&str>) -> Result<IngestAck> {
        self.accept_parsed(raw_body, header).map(|(ack, _)| ack)
    }

    /// Like [`accept`](Self::accept) but also hands back the parsed payload.
    pub fn accept_parsed(
        &self,
        raw_body: &[u8],
        header: Option<&str>,
    ) -> Result<(IngestAck, serde_json::Value)> {
        let verified = header.is_some_and(|h| self.verifier.verify(raw_body, h));
        if !verified {
            warn!(body_len = raw_body.len(), "rejected unsigned or mis-signed escalation");
            return Err(CertVaultError::SignatureInvalid);
        }

        let payload: serde_json::Value = serde_json::from_slice(raw_body)?;
        let incident_id = payload
            .get("incident_id")
            .filter(|id| !id.is_null())
            .cloned();

        info!(incident_id = ?incident_id, "escalation accepted");
        Ok((IngestAck::accepted(incident_id), payload))
    }
}
