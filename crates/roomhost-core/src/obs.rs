//! Structured observability hooks for the acquisition lifecycle.
//!
//! This module provides:
//! - Acquisition- and attempt-scoped tracing spans
//! - Emission functions for key lifecycle events: attempt start/settle,
//!   every observed signal (discarded ones included), timer checks,
//!   backoff waits and the final verdict
//!
//! Events are emitted at `info!` level, discarded signals and failures at
//! `warn!`. Filter with `RUST_LOG`; for JSON output pass `--json`.

use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::attempt::{Outcome, SignalEffect, SignalKind};
use crate::credential::CredentialIssue;

/// Span covering a whole acquisition (all attempts).
pub fn acquisition_span(acquisition_id: &Uuid, room: &str) -> tracing::Span {
    tracing::info_span!("roomhost.acquisition", acquisition_id = %acquisition_id, room = %room)
}

/// Span covering one attempt.
pub fn attempt_span(attempt: u32, max_attempts: u32) -> tracing::Span {
    tracing::info_span!("roomhost.attempt", attempt = attempt, max_attempts = max_attempts)
}

pub fn emit_acquisition_started(max_attempts: u32) {
    info!(event = "acquisition.started", max_attempts = max_attempts);
}

pub fn emit_attempt_started(attempt: u32, max_attempts: u32) {
    info!(event = "attempt.started", attempt = attempt, max_attempts = max_attempts);
}

/// Emit event: a backend signal reached the attempt.
///
/// ```ignore
/// emit_signal_observed(SignalKind::Link, SignalEffect::Discarded, Some("https://…"));
/// // logs: event=signal.observed kind=link effect=Discarded detail=https://…
/// ```
pub fn emit_signal_observed(kind: SignalKind, effect: SignalEffect, detail: Option<&str>) {
    let detail = detail.unwrap_or("");
    match effect {
        SignalEffect::Discarded => warn!(
            event = "signal.discarded",
            kind = kind.as_str(),
            detail = %detail,
            "signal arrived after the attempt settled"
        ),
        _ => info!(
            event = "signal.observed",
            kind = kind.as_str(),
            effect = ?effect,
            detail = %detail,
        ),
    }
}

/// Emit event: a sanity-check or hard-timeout timer elapsed.
pub fn emit_check_fired(kind: SignalKind, effect: SignalEffect, after: Duration) {
    warn!(
        event = "check.fired",
        kind = kind.as_str(),
        effect = ?effect,
        after_ms = after.as_millis() as u64,
    );
}

pub fn emit_attempt_settled(attempt: u32, outcome: &Outcome, elapsed_ms: u64) {
    if outcome.is_success() {
        info!(
            event = "attempt.settled",
            attempt = attempt,
            outcome = outcome.label(),
            elapsed_ms = elapsed_ms,
        );
    } else {
        warn!(
            event = "attempt.settled",
            attempt = attempt,
            outcome = outcome.label(),
            elapsed_ms = elapsed_ms,
            reason = %outcome,
        );
    }
}

pub fn emit_backoff(attempt: u32, delay: Duration) {
    info!(
        event = "retry.backoff",
        attempt = attempt,
        delay_ms = delay.as_millis() as u64,
    );
}

pub fn emit_credential_rejected(issue: CredentialIssue) {
    warn!(event = "credential.rejected", reason = issue.reason());
}

/// Emit event: acquisition finished with the number of attempts used.
pub fn emit_acquisition_finished(success: bool, attempts: u32, total_ms: u64) {
    if success {
        info!(
            event = "acquisition.finished",
            success = success,
            attempts = attempts,
            total_ms = total_ms,
        );
    } else {
        warn!(
            event = "acquisition.finished",
            success = success,
            attempts = attempts,
            total_ms = total_ms,
        );
    }
}
