// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Escalation dispatcher: one signed HTTP POST per escalation event.
//
// The event is serialized to compact JSON exactly once; those same bytes are
// signed and sent, so the receiver verifies precisely what was signed. There
// is no retry here: a single attempt bounded by the configured timeout is the
// whole contract (see `retry::RetryingSink` for a decorator). Dropping the
// returned future abandons the in-flight request.

use std::future::Future;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use secrecy::SecretString;
use tracing::{info, instrument, warn};

use certvault_core::config::CertVaultConfig;
use certvault_core::error::{CertVaultError, Result};
use certvault_core::types::{DispatchOutcome, EscalationEvent};
use certvault_security::signature::{SIGNATURE_HEADER, WebhookSigner};

/// Default bound on one outbound POST.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Anything that can deliver an escalation event and report what the remote
/// end answered.
///
/// Non-2xx answers are `Ok`; only transport failures and timeouts are `Err`.
pub trait EscalationSink {
    fn dispatch(
        &self,
        event: &EscalationEvent,
    ) -> impl Future<Output = Result<DispatchOutcome>> + Send;
}

/// HTTP sender for signed escalation events.
pub struct EscalationDispatcher {
    client: reqwest::Client,
    target_url: String,
    signer: WebhookSigner,
    timeout: Duration,
}

impl EscalationDispatcher {
    pub fn new(target_url: impl Into<String>, secret: SecretString, timeout: Duration) -> Result<Self> {
        // A redirect would re-send the signed body elsewhere; the CERT's own
        // answer is what gets reported.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CertVaultError::Delivery(format!("HTTP client setup: {e}")))?;

        Ok(Self {
            client,
            target_url: target_url.into(),
            signer: WebhookSigner::new(secret),
            timeout,
        })
    }

    pub fn from_config(config: &CertVaultConfig) -> Result<Self> {
        Self::new(
            config.webhook_url.clone(),
            SecretString::from(config.webhook_secret.clone()),
            Duration::from_secs(config.webhook_timeout_secs),
        )
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Sign and POST an already-serialized JSON body.
    #[instrument(skip_all, fields(url = %self.target_url, body_len = body.len()))]
    pub async fn post_signed(&self, body: Vec<u8>) -> Result<DispatchOutcome> {
        let signature = self.signer.sign(&body);

        let response = self
            .client
            .post(&self.target_url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| self.delivery_error(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.delivery_error(e))?;

        if (200..300).contains(&status) {
            info!(status, "CERT accepted escalation");
        } else {
            warn!(status, "CERT rejected escalation");
        }
        Ok(DispatchOutcome { status, body })
    }

    fn delivery_error(&self, e: reqwest::Error) -> CertVaultError {
        if e.is_timeout() {
            CertVaultError::Delivery(format!(
                "POST {} timed out after {}s",
                self.target_url,
                self.timeout.as_secs_f32()
            ))
        } else {
            CertVaultError::Delivery(format!("POST {}: {e}", self.target_url))
        }
    }
}

impl EscalationSink for EscalationDispatcher {
    #[instrument(skip_all, fields(incident_id = event.incident_id, risk = %event.risk_label))]
    async fn dispatch(&self, event: &EscalationEvent) -> Result<DispatchOutcome> {
        let body = event.to_json_bytes()?;
        self.post_signed(body).await
    }
}

/// One-shot convenience: build a dispatcher and send a single event.
pub async fn dispatch_escalation(
    event: &EscalationEvent,
    target_url: &str,
    secret: SecretString,
    timeout: Duration,
) -> Result<DispatchOutcome> {
    EscalationDispatcher::new(target_url, secret, timeout)?
        .dispatch(event)
        .await
}
