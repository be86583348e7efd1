// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CertVault Notify: pushes signed escalation events to the CERT and hosts
// the receiving side that verifies them before trusting a single byte.

pub mod dispatcher;
pub mod escalation;
pub mod ingest;
pub mod ingest_server;
pub mod retry;

pub use dispatcher::{EscalationDispatcher, EscalationSink, dispatch_escalation};
pub use escalation::escalate_on_transition;
pub use ingest::{IngestVerifier, verify_incoming};
pub use ingest_server::{INGEST_PATH, IngestServer};
pub use retry::{RetryConfig, RetryingSink};

#[cfg(test)]
pub(crate) mod testing;
