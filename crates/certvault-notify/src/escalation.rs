// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Escalation trigger: decides whether a risk-label change warrants a CERT
// push and turns whatever happens into a `PushReport`.
//
// The label change itself is never blocked or rolled back by this module:
// every outcome, including transport failure, comes back as a report for the
// caller to record next to the incident.

use tracing::{debug, info, warn};

use certvault_core::types::{EscalationEvent, PushReport, RiskTransition};

use crate::dispatcher::EscalationSink;

/// Push `event` through `sink` if `transition` enters `Critical`.
///
/// Returns `None` when no push was due.
pub async fn escalate_on_transition<S: EscalationSink>(
    sink: &S,
    transition: RiskTransition,
    event: &EscalationEvent,
) -> Option<PushReport> {
    if !transition.requires_escalation() {
        debug!(
            from = %transition.previous,
            to = %transition.current,
            "risk change does not require escalation"
        );
        return None;
    }

    let report = match sink.dispatch(event).await {
        Ok(outcome) if outcome.is_success() => {
            info!(incident_id = event.incident_id, status = outcome.status, "CERT push delivered");
            PushReport {
                delivered: true,
                status: Some(outcome.status),
                detail: outcome.body,
            }
        }
        Ok(outcome) => {
            warn!(incident_id = event.incident_id, status = outcome.status, "CERT push refused");
            PushReport {
                delivered: false,
                status: Some(outcome.status),
                detail: outcome.body,
            }
        }
        Err(e) => {
            warn!(incident_id = event.incident_id, error = %e, "CERT push failed");
            PushReport {
                delivered: false,
                status: None,
                detail: e.to_string(),
            }
        }
    };

    Some(report)
}
