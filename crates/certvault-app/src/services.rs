// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: binds the configuration to the backend crates so each
// subcommand is one method call.
//
// The vault is opened per operation rather than at startup, so commands that
// never touch evidence (fingerprint, sign, verify) never create a key file.

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tracing::info;

use certvault_core::error::Result;
use certvault_core::types::{
    EscalationEvent, EvidenceType, Fingerprint, PushReport, RiskLabel, RiskTransition,
    StorageRecord,
};
use certvault_core::CertVaultConfig;
use certvault_notify::{
    EscalationDispatcher, IngestServer, IngestVerifier, RetryConfig, RetryingSink,
    escalate_on_transition,
};
use certvault_security::{EncryptionVault, EvidenceStore, FileNaming, fingerprint, signature};

/// Everything `escalate` needs from the command line.
#[derive(Debug)]
pub struct EscalationRequest {
    pub incident_id: i64,
    pub reporter_id: String,
    pub evidence_type: EvidenceType,
    pub previous: RiskLabel,
    pub current: RiskLabel,
    pub evidence: Option<PathBuf>,
    pub retries: u32,
}

pub struct AppServices {
    config: CertVaultConfig,
}

impl AppServices {
    pub fn new(config: CertVaultConfig) -> Self {
        Self { config }
    }

    fn open_vault(&self) -> Result<EncryptionVault> {
        EncryptionVault::open(&self.config.key_file)
    }

    pub fn fingerprint_file(&self, file: &Path) -> Result<Fingerprint> {
        Ok(fingerprint(&std::fs::read(file)?))
    }

    /// Encrypt `file` into the storage directory. The hint defaults to the
    /// input's file name.
    pub fn store_file(
        &self,
        file: &Path,
        hint: Option<&str>,
        naming: FileNaming,
    ) -> Result<StorageRecord> {
        let raw = std::fs::read(file)?;
        let hint = match hint {
            Some(hint) => hint.to_owned(),
            None => file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        let vault = self.open_vault()?;
        EvidenceStore::new(&self.config.storage_dir, &vault)
            .with_naming(naming)
            .store_encrypted(&raw, &hint)
    }

    /// Decrypt a stored file to `out`, or to stdout when `out` is `None`.
    pub fn decrypt_file(
        &self,
        path: &Path,
        out: Option<&Path>,
        expected: Option<String>,
    ) -> Result<()> {
        let expected = expected.map(Fingerprint::from_hex).transpose()?;
        let vault = self.open_vault()?;
        let plaintext =
            EvidenceStore::new(&self.config.storage_dir, &vault).load_decrypted(path, expected.as_ref())?;

        match out {
            Some(out) => std::fs::write(out, &plaintext)?,
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&plaintext)?;
                stdout.flush()?;
            }
        }
        Ok(())
    }

    pub fn sign_file(&self, file: &Path, timestamp: Option<i64>) -> Result<String> {
        let body = std::fs::read(file)?;
        Ok(signature::sign(self.config.webhook_secret.as_bytes(), &body, timestamp))
    }

    pub fn verify_file(&self, file: &Path, header: &str) -> Result<bool> {
        let body = std::fs::read(file)?;
        Ok(signature::verify(
            self.config.webhook_secret.as_bytes(),
            &body,
            header,
            self.config.tolerance_secs,
        ))
    }

    /// Store any attached evidence, then push if the risk change enters
    /// Critical. Delivery problems come back in the report, not as `Err`.
    pub async fn escalate(&self, request: EscalationRequest) -> Result<Option<PushReport>> {
        let mut event = EscalationEvent::new(
            request.incident_id,
            request.reporter_id,
            request.evidence_type,
            request.current,
        );
        if let Some(path) = &request.evidence {
            let record = self.store_file(path, None, FileNaming::Unique)?;
            event = event.with_evidence(&record);
        }

        let transition = RiskTransition::new(request.previous, request.current);
        let dispatcher = EscalationDispatcher::from_config(&self.config)?;

        let report = if request.retries == 0 {
            escalate_on_transition(&dispatcher, transition, &event).await
        } else {
            let config = RetryConfig {
                max_retries: request.retries,
                ..RetryConfig::default()
            };
            escalate_on_transition(&RetryingSink::new(dispatcher, config), transition, &event).await
        };
        Ok(report)
    }

    /// Run the ingest endpoint until Ctrl-C.
    pub async fn serve_ingest(&self, bind: SocketAddr) -> Result<()> {
        let verifier = IngestVerifier::new(
            SecretString::from(self.config.webhook_secret.clone()),
            self.config.tolerance_secs,
        );
        let mut server = IngestServer::new(bind, verifier);
        let addr = server.start().await?;
        info!(%addr, "press Ctrl-C to stop");

        tokio::signal::ctrl_c().await?;

        server.stop().await?;
        info!(accepted = server.accepted_total(), "ingest endpoint shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use certvault_core::error::CertVaultError;

    use super::*;

    fn services_in(dir: &Path) -> AppServices {
        AppServices::new(CertVaultConfig {
            key_file: dir.join("secret.key"),
            storage_dir: dir.join("secure_storage"),
            webhook_secret: "app-secret".into(),
            webhook_timeout_secs: 1,
            ..CertVaultConfig::default()
        })
    }

    #[test]
    fn store_then_decrypt_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let services = services_in(dir.path());
        let input = dir.path().join("report.txt");
        std::fs::write(&input, b"phishing screenshot").unwrap();

        let record = services
            .store_file(&input, None, FileNaming::Compatible)
            .unwrap();
        assert!(record.storage_path.starts_with(dir.path().join("secure_storage")));
        assert!(record.file_name().unwrap().starts_with("report.txt_"));

        let out = dir.path().join("plain.txt");
        services
            .decrypt_file(
                &record.storage_path,
                Some(&out),
                Some(record.fingerprint.to_string()),
            )
            .unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"phishing screenshot");
    }

    #[test]
    fn decrypt_rejects_malformed_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let services = services_in(dir.path());
        let err = services
            .decrypt_file(&dir.path().join("missing.enc"), None, Some("xyz".into()))
            .unwrap_err();
        assert!(matches!(err, CertVaultError::InvalidFingerprint(_)));
    }

    #[test]
    fn fingerprint_does_not_create_key() {
        let dir = tempfile::tempdir().unwrap();
        let services = services_in(dir.path());
        let input = dir.path().join("empty");
        std::fs::write(&input, b"").unwrap();

        let fp = services.fingerprint_file(&input).unwrap();
        assert_eq!(
            fp.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(!dir.path().join("secret.key").exists());
    }

    #[test]
    fn sign_and_verify_files() {
        let dir = tempfile::tempdir().unwrap();
        let services = services_in(dir.path());
        let body = dir.path().join("body.json");
        std::fs::write(&body, br#"{"incident_id":3}"#).unwrap();

        let header = services.sign_file(&body, None).unwrap();
        assert!(services.verify_file(&body, &header).unwrap());

        let stale = services.sign_file(&body, Some(1_000)).unwrap();
        assert!(!services.verify_file(&body, &stale).unwrap());
    }

    #[tokio::test]
    async fn escalate_without_critical_transition_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let services = services_in(dir.path());
        let report = services
            .escalate(EscalationRequest {
                incident_id: 1,
                reporter_id: "u".into(),
                evidence_type: EvidenceType::Url,
                previous: RiskLabel::Low,
                current: RiskLabel::High,
                evidence: None,
                retries: 0,
            })
            .await
            .unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn unreachable_cert_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let services = AppServices::new(CertVaultConfig {
            webhook_url: format!("http://{addr}/api/v1/cert/ingest"),
            ..services_in(dir.path()).config
        });
        let evidence = dir.path().join("shot.png");
        std::fs::write(&evidence, b"png").unwrap();

        let report = services
            .escalate(EscalationRequest {
                incident_id: 7,
                reporter_id: "alice".into(),
                evidence_type: EvidenceType::File,
                previous: RiskLabel::High,
                current: RiskLabel::Critical,
                evidence: Some(evidence),
                retries: 0,
            })
            .await
            .unwrap()
            .unwrap();

        assert!(!report.delivered);
        assert_eq!(report.status, None);
        // Evidence was still stored before the push was attempted.
        assert_eq!(
            std::fs::read_dir(dir.path().join("secure_storage"))
                .unwrap()
                .count(),
            1
        );
    }
}
