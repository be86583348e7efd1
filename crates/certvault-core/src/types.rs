// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for evidence storage and CERT escalation.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CertVaultError, Result};

/// Length of a SHA-256 digest rendered as lowercase hex.
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// SHA-256 content fingerprint, always 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Render a raw SHA-256 digest.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    /// Wrap an existing hex digest, rejecting anything that is not exactly
    /// 64 lowercase hex characters.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        let well_formed = hex.len() == FINGERPRINT_HEX_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(Self(hex))
        } else {
            Err(CertVaultError::InvalidFingerprint(hex))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `len` hex characters (clamped to the full digest).
    pub fn prefix(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = CertVaultError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where one evidence upload ended up on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub storage_path: PathBuf,
    pub fingerprint: Fingerprint,
}

impl StorageRecord {
    /// Bare filename of the ciphertext, as reported to the CERT.
    pub fn file_name(&self) -> Option<String> {
        self.storage_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// Risk classification attached to an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum RiskLabel {
    #[default]
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "Safe",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLabel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown risk label '{other}'")),
        }
    }
}

/// Kind of evidence a reporter submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceType {
    Url,
    File,
    Text,
}

impl std::str::FromStr for EvidenceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "url" => Ok(Self::Url),
            "file" => Ok(Self::File),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown evidence type '{other}'")),
        }
    }
}

/// Notification payload pushed to the CERT when an incident turns critical.
///
/// Field order here is the JSON key order on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub incident_id: i64,
    pub reporter_id: String,
    pub evidence_type: EvidenceType,
    pub risk_label: RiskLabel,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_sha256: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_filename: Option<String>,
}

impl EscalationEvent {
    /// Build an event stamped with the current UTC time.
    pub fn new(
        incident_id: i64,
        reporter_id: impl Into<String>,
        evidence_type: EvidenceType,
        risk_label: RiskLabel,
    ) -> Self {
        Self {
            incident_id,
            reporter_id: reporter_id.into(),
            evidence_type,
            risk_label,
            timestamp: Utc::now(),
            evidence_sha256: None,
            evidence_filename: None,
        }
    }

    /// Attach the most recent evidence upload.
    pub fn with_evidence(mut self, record: &StorageRecord) -> Self {
        self.evidence_sha256 = Some(record.fingerprint.clone());
        self.evidence_filename = record.file_name();
        self
    }

    /// Compact JSON, serialized exactly once per dispatch.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Status and raw body returned by the CERT endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub status: u16,
    pub body: String,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Acknowledgment produced by the ingest side after a verified delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestAck {
    pub status: String,
    /// Copied verbatim from the payload's `incident_id`, if it had one.
    pub incident_id: Option<serde_json::Value>,
}

impl IngestAck {
    pub fn accepted(incident_id: Option<serde_json::Value>) -> Self {
        Self {
            status: "accepted".into(),
            incident_id,
        }
    }
}

/// What the escalation orchestration records about a push attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    pub delivered: bool,
    pub status: Option<u16>,
    pub detail: String,
}

/// A change of an incident's risk label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskTransition {
    pub previous: RiskLabel,
    pub current: RiskLabel,
}

impl RiskTransition {
    pub fn new(previous: RiskLabel, current: RiskLabel) -> Self {
        Self { previous, current }
    }

    /// Only entering `Critical` triggers a push; staying there does not.
    pub fn requires_escalation(&self) -> bool {
        self.current == RiskLabel::Critical && self.previous != RiskLabel::Critical
    }
}

/// Classification of errors for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network blip, timeout, server-side failure; retry may help.
    Transient,
    /// Bad signature, bad payload, client error; retrying will not help.
    Permanent,
}
