// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry decorator with exponential backoff + jitter for escalation pushes.
//
// The dispatcher itself makes exactly one attempt. Callers that want stronger
// delivery wrap it in `RetryingSink`, which classifies each failure into
// Transient (retry) or Permanent (give up). Transport failures and 5xx
// answers are transient; 4xx answers and local errors are permanent.

use std::time::Duration;

use tracing::{debug, info, warn};

use certvault_core::error::{CertVaultError, Result};
use certvault_core::types::{DispatchOutcome, ErrorClass, EscalationEvent};

use crate::dispatcher::EscalationSink;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first.
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry, the next attempt would fail the same way.
    GiveUp,
    /// Maximum retries exhausted.
    Exhausted,
}

/// Classify a `CertVaultError` for retry decisions.
pub fn classify_error(err: &CertVaultError) -> ErrorClass {
    match err {
        CertVaultError::Delivery(_) => ErrorClass::Transient,
        CertVaultError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::Interrupted => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        },
        CertVaultError::Storage(_)
        | CertVaultError::IntegrityMismatch { .. }
        | CertVaultError::InvalidFingerprint(_)
        | CertVaultError::Configuration(_)
        | CertVaultError::Encryption(_)
        | CertVaultError::Decryption
        | CertVaultError::SignatureInvalid
        | CertVaultError::IngestServer(_)
        | CertVaultError::Serialization(_) => ErrorClass::Permanent,
    }
}

/// Classify a remote answer. `None` means it succeeded.
pub fn classify_status(status: u16) -> Option<ErrorClass> {
    match status {
        200..=299 => None,
        408 | 429 | 500..=599 => Some(ErrorClass::Transient),
        _ => Some(ErrorClass::Permanent),
    }
}

/// Decide whether to retry given the failure class and attempt count.
pub fn should_retry(class: ErrorClass, attempt: u32, config: &RetryConfig) -> RetryDecision {
    match class {
        ErrorClass::Permanent => {
            info!("permanent failure, not retrying");
            RetryDecision::GiveUp
        }
        ErrorClass::Transient => {
            if attempt >= config.max_retries {
                warn!(attempt, max = config.max_retries, "retry limit exhausted");
                RetryDecision::Exhausted
            } else {
                let delay = compute_delay(attempt, config);
                debug!(attempt, delay_ms = delay.as_millis(), "scheduling retry");
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// Compute exponential backoff delay with jitter.
///
/// delay = min(base * 2^attempt + jitter, max_delay)
fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
    let capped_ms = total_ms.min(config.max_delay.as_millis() as u64);

    Duration::from_millis(capped_ms)
}

/// Deterministic jitter in [0, base) spread by a multiplicative hash of the
/// attempt number.
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}

/// Wraps any sink with bounded retries.
pub struct RetryingSink<S> {
    inner: S,
    config: RetryConfig,
}

impl<S> RetryingSink<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S> EscalationSink for RetryingSink<S>
where
    S: EscalationSink + Sync,
{
    async fn dispatch(&self, event: &EscalationEvent) -> Result<DispatchOutcome> {
        let mut attempt = 0;
        loop {
            let result = self.inner.dispatch(event).await;
            let class = match &result {
                Ok(outcome) => match classify_status(outcome.status) {
                    None => return result,
                    Some(class) => class,
                },
                Err(e) => classify_error(e),
            };

            match should_retry(class, attempt, &self.config) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        incident_id = event.incident_id,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "escalation push failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp | RetryDecision::Exhausted => return result,
            }
        }
    }
}
