// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Timestamped HMAC-SHA256 signatures for CERT webhooks.
//!
//! Header format: `X-CERT-Signature: t=<unix seconds>,v1=<hex digest>` where
//! the digest is `HMAC-SHA256(secret, "<t>." || body)`.
//!
//! The timestamp is part of the signed material, so a captured body cannot
//! be replayed under a fresh `t`. Verification recomputes the digest from the
//! claimed timestamp, checks that timestamp against a tolerance window, and
//! compares digests in constant time (`ring::hmac::verify`).
//!
//! Every verification failure collapses to `false`: a malformed header, a
//! stale timestamp, and a wrong digest are indistinguishable to the caller.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use ring::hmac;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

/// HTTP header carrying the signature.
pub const SIGNATURE_HEADER: &str = "X-CERT-Signature";

/// Default replay tolerance window in seconds.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Hex length of an HMAC-SHA256 digest on the wire.
const DIGEST_HEX_LEN: usize = 64;

fn is_canonical_digest(digest: &str) -> bool {
    digest.len() == DIGEST_HEX_LEN
        && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Parsed form of a signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    /// Lowercase hex HMAC-SHA256 digest.
    pub digest: String,
}

impl fmt::Display for SignatureHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={},v1={}", self.timestamp, self.digest)
    }
}

impl FromStr for SignatureHeader {
    type Err = ();

    /// Accepts comma-separated `key=value` pairs in any order. Both `t` and
    /// `v1` must be present exactly once; unknown keys are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut timestamp = None;
        let mut digest = None;

        for part in s.split(',') {
            let (key, value) = part.trim().split_once('=').ok_or(())?;
            match key.trim() {
                "t" => {
                    if timestamp.is_some() {
                        return Err(());
                    }
                    timestamp = Some(value.trim().parse::<i64>().map_err(|_| ())?);
                }
                "v1" => {
                    if digest.is_some() {
                        return Err(());
                    }
                    digest = Some(value.trim().to_owned());
                }
                _ => {}
            }
        }

        Ok(Self {
            timestamp: timestamp.ok_or(())?,
            digest: digest.ok_or(())?,
        })
    }
}

fn signing_key(secret: &[u8]) -> hmac::Key {
    hmac::Key::new(hmac::HMAC_SHA256, secret)
}

fn signed_material(timestamp: i64, body: &[u8]) -> Vec<u8> {
    let prefix = format!("{timestamp}.");
    let mut message = Vec::with_capacity(prefix.len() + body.len());
    message.extend_from_slice(prefix.as_bytes());
    message.extend_from_slice(body);
    message
}

/// Sign `body`, stamping it with `timestamp` or the current time.
pub fn sign(secret: &[u8], body: &[u8], timestamp: Option<i64>) -> String {
    let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp());
    let tag = hmac::sign(&signing_key(secret), &signed_material(timestamp, body));
    SignatureHeader {
        timestamp,
        digest: hex::encode(tag.as_ref()),
    }
    .to_string()
}

/// Verify `header` against `body` using the current wall clock.
pub fn verify(secret: &[u8], body: &[u8], header: &str, tolerance_secs: u64) -> bool {
    verify_at(secret, body, header, tolerance_secs, Utc::now().timestamp())
}

/// Verify `header` against `body` as if the clock read `now`.
pub fn verify_at(secret: &[u8], body: &[u8], header: &str, tolerance_secs: u64, now: i64) -> bool {
    let Ok(parsed) = header.parse::<SignatureHeader>() else {
        debug!("signature header unparseable");
        return false;
    };

    let age = (i128::from(now) - i128::from(parsed.timestamp)).unsigned_abs();
    if age > u128::from(tolerance_secs) {
        debug!("signature timestamp outside tolerance window");
        return false;
    }

    // Only the exact lowercase form `sign` emits is accepted.
    if !is_canonical_digest(&parsed.digest) {
        debug!("signature digest is not 64 lowercase hex characters");
        return false;
    }
    let Ok(claimed) = hex::decode(&parsed.digest) else {
        return false;
    };

    hmac::verify(
        &signing_key(secret),
        &signed_material(parsed.timestamp, body),
        &claimed,
    )
    .is_ok()
}

/// Sender-side capability: can sign, cannot verify.
#[derive(Clone)]
pub struct WebhookSigner {
    secret: SecretString,
}

impl WebhookSigner {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Produce the header value for `body`, stamped now.
    pub fn sign(&self, body: &[u8]) -> String {
        sign(self.secret.expose_secret().as_bytes(), body, None)
    }

    pub fn sign_at(&self, body: &[u8], timestamp: i64) -> String {
        sign(self.secret.expose_secret().as_bytes(), body, Some(timestamp))
    }
}

/// Receiver-side capability: can verify, cannot sign.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: u64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn tolerance_secs(&self) -> u64 {
        self.tolerance_secs
    }

    pub fn verify(&self, body: &[u8], header: &str) -> bool {
        verify(
            self.secret.expose_secret().as_bytes(),
            body,
            header,
            self.tolerance_secs,
        )
    }

    pub fn verify_at(&self, body: &[u8], header: &str, now: i64) -> bool {
        verify_at(
            self.secret.expose_secret().as_bytes(),
            body,
            header,
            self.tolerance_secs,
            now,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"incident_id":1}"#;

    fn compute_expected_digest(secret: &str, message: &[u8]) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
        hex::encode(hmac::sign(&key, message).as_ref())
    }

    #[test]
    fn header_format_matches_wire_contract() {
        let header = sign(b"s", BODY, Some(1000));
        let expected = compute_expected_digest("s", br#"1000.{"incident_id":1}"#);
        assert_eq!(header, format!("t=1000,v1={expected}"));
    }

    #[test]
    fn verifies_within_window_and_rejects_after() {
        let header = sign(b"s", BODY, Some(1000));
        assert!(verify_at(b"s", BODY, &header, 300, 1000));
        assert!(verify_at(b"s", BODY, &header, 300, 1300));
        assert!(!verify_at(b"s", BODY, &header, 300, 1400));
    }

    #[test]
    fn future_timestamps_are_bounded_too() {
        let header = sign(b"s", BODY, Some(1000));
        assert!(verify_at(b"s", BODY, &header, 300, 700));
        assert!(!verify_at(b"s", BODY, &header, 300, 699));
    }

    #[test]
    fn fresh_signature_verifies_against_wall_clock() {
        let header = sign(b"secret", BODY, None);
        assert!(verify(b"secret", BODY, &header, DEFAULT_TOLERANCE_SECS));
    }

    #[test]
    fn altered_body_fails() {
        let header = sign(b"s", BODY, None);
        assert!(!verify(b"s", br#"{"incident_id":2}"#, &header, 300));
    }

    #[test]
    fn different_secret_fails() {
        let header = sign(b"s", BODY, None);
        assert!(!verify(b"t", BODY, &header, 300));
    }

    #[test]
    fn swapped_timestamp_fails() {
        // Re-stamping a captured signature with a fresh time must not work.
        let old = sign(b"s", BODY, Some(1000));
        let digest = old.split_once(",v1=").unwrap().1;
        let forged = format!("t=5000,v1={digest}");
        assert!(!verify_at(b"s", BODY, &forged, 300, 5000));
    }

    #[test]
    fn malformed_headers_fail_closed() {
        let now = 1000;
        let good = sign(b"s", BODY, Some(now));
        let digest = good.split_once(",v1=").unwrap().1.to_owned();

        for header in [
            "".to_owned(),
            "garbage".to_owned(),
            format!("v1={digest}"),
            "t=1000".to_owned(),
            format!("t=abc,v1={digest}"),
            "t=1000,v1=zz".to_owned(),
            "t=1000,v1=abc".to_owned(),
            format!("t=1000,t=1000,v1={digest}"),
            format!("t=1000,v1={}", &digest[..10]),
        ] {
            assert!(!verify_at(b"s", BODY, &header, 300, now), "accepted {header:?}");
        }
    }

    #[test]
    fn uppercase_or_short_digest_is_rejected() {
        let body = b"payload";
        let header = sign(b"secret", body, Some(1_000));
        let parsed: SignatureHeader = header.parse().unwrap();
        assert!(verify_at(b"secret", body, &header, 300, 1_000));

        let upper = SignatureHeader {
            digest: parsed.digest.to_ascii_uppercase(),
            ..parsed.clone()
        };
        assert!(!verify_at(b"secret", body, &upper.to_string(), 300, 1_000));

        let short = SignatureHeader {
            digest: parsed.digest[..62].to_owned(),
            ..parsed
        };
        assert!(!verify_at(b"secret", body, &short.to_string(), 300, 1_000));
    }

    #[test]
    fn header_fields_may_come_in_any_order() {
        let good = sign(b"s", BODY, Some(1000));
        let parsed: SignatureHeader = good.parse().unwrap();
        let reordered = format!("v1={},t={}", parsed.digest, parsed.timestamp);
        assert!(verify_at(b"s", BODY, &reordered, 300, 1000));
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        let header = sign(b"s", BODY, Some(i64::MIN));
        assert!(!verify_at(b"s", BODY, &header, u64::MAX - 1, i64::MAX));
    }

    #[test]
    fn empty_body_signs_and_verifies() {
        let header = sign(b"s", b"", Some(42));
        assert!(verify_at(b"s", b"", &header, 0, 42));
    }

    #[test]
    fn signer_and_verifier_capabilities_agree() {
        let signer = WebhookSigner::new(SecretString::from("shared"));
        let verifier = WebhookVerifier::new(SecretString::from("shared")).with_tolerance(60);

        let header = signer.sign_at(BODY, 2_000);
        assert!(verifier.verify_at(BODY, &header, 2_060));
        assert!(!verifier.verify_at(BODY, &header, 2_061));
        assert!(verifier.verify(BODY, &signer.sign(BODY)));
    }

    #[test]
    fn display_round_trips_through_parse() {
        let header = SignatureHeader {
            timestamp: 1_700_000_000,
            digest: "ab".repeat(32),
        };
        assert_eq!(header.to_string().parse::<SignatureHeader>().unwrap(), header);
    }
}
