//! Single provisioning attempt.
//!
//! Invokes the backend, binds its callback slots into a [`SettleGate`],
//! attaches a [`TimeoutSupervisor`] and waits for the first signal. Every
//! signal is journaled and logged, including the ones that arrive after
//! the attempt already settled.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::gate::SettleGate;
use crate::handle::{
    LoggingObserver, ProvisionHandle, ProvisionRequest, Provisioner, RoomObserver,
};
use crate::obs;
use crate::supervisor::{TimeoutPolicy, TimeoutSupervisor};

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    SanityCheckFailed,
    BackendError(String),
    InvalidCredential(String),
}

impl FailureReason {
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::SanityCheckFailed => "sanity_check_failed",
            FailureReason::BackendError(_) => "backend_error",
            FailureReason::InvalidCredential(_) => "invalid_credential",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => f.write_str("timed out waiting for the room link"),
            FailureReason::SanityCheckFailed => {
                f.write_str("sanity check failed: backend made no progress")
            }
            FailureReason::BackendError(message) => write!(f, "backend error: {message}"),
            FailureReason::InvalidCredential(reason) => write!(f, "invalid credential: {reason}"),
        }
    }
}

/// Result of one attempt. Produced exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success(String),
    Failure(FailureReason),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Failure(reason) => reason.label(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(link) => write!(f, "room ready at {link}"),
            Outcome::Failure(reason) => reason.fmt(f),
        }
    }
}

/// Source of an observed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Link,
    Error,
    SpecificError,
    ParticipantJoin,
    ParticipantLeave,
    SanityCheck,
    HardTimeout,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Link => "link",
            SignalKind::Error => "error",
            SignalKind::SpecificError => "specific_error",
            SignalKind::ParticipantJoin => "participant_join",
            SignalKind::ParticipantLeave => "participant_leave",
            SignalKind::SanityCheck => "sanity_check",
            SignalKind::HardTimeout => "hard_timeout",
        }
    }
}

/// What a signal did to the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalEffect {
    /// Won the gate.
    Settled,
    /// Arrived after the gate settled.
    Discarded,
    /// Participant traffic; forwarded, never settles.
    Informational,
}

impl SignalEffect {
    pub fn from_settle(won: bool) -> Self {
        if won {
            SignalEffect::Settled
        } else {
            SignalEffect::Discarded
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalObservation {
    pub kind: SignalKind,
    pub effect: SignalEffect,
    /// Offset from the start of the attempt.
    pub at: Duration,
    pub detail: Option<String>,
}

/// Append-only record of every signal an attempt observed.
#[derive(Debug, Clone)]
pub struct SignalJournal {
    started: Instant,
    entries: Arc<Mutex<Vec<SignalObservation>>>,
}

impl Default for SignalJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalJournal {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record(&self, kind: SignalKind, effect: SignalEffect, detail: Option<String>) {
        let observation = SignalObservation {
            kind,
            effect,
            at: self.started.elapsed(),
            detail,
        };
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observation);
    }

    pub fn entries(&self) -> Vec<SignalObservation> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn discarded(&self) -> Vec<SignalObservation> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.effect == SignalEffect::Discarded)
            .collect()
    }
}

/// What [`AttemptRunner::run`] hands back.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub outcome: Outcome,
    pub elapsed: Duration,
    /// Keeps recording after the report is returned.
    pub journal: SignalJournal,
}

/// Runs one attempt against a provisioner.
#[derive(Clone)]
pub struct AttemptRunner {
    timeouts: TimeoutPolicy,
    observer: Arc<dyn RoomObserver>,
}

impl fmt::Debug for AttemptRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttemptRunner")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl Default for AttemptRunner {
    fn default() -> Self {
        Self::new(TimeoutPolicy::default())
    }
}

impl AttemptRunner {
    pub fn new(timeouts: TimeoutPolicy) -> Self {
        Self {
            timeouts,
            observer: Arc::new(LoggingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RoomObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.timeouts
    }

    /// Provision once and wait for the first settling signal.
    pub async fn run(
        &self,
        provisioner: &dyn Provisioner,
        request: ProvisionRequest,
    ) -> AttemptReport {
        let started = Instant::now();
        let journal = SignalJournal::new();
        let progress = Arc::new(AtomicBool::new(false));

        let handle = provisioner.provision(request);
        let (gate, settlement) = SettleGate::new();
        let supervisor = TimeoutSupervisor::attach(
            &gate,
            &self.timeouts,
            Arc::clone(&progress),
            journal.clone(),
        );
        handle.bind_atomically(|handle| self.bind(handle, &gate, &progress, &journal));

        let outcome = settlement.wait().await.unwrap_or_else(|| {
            Outcome::Failure(FailureReason::BackendError(
                "attempt abandoned before settling".to_string(),
            ))
        });
        let exit = supervisor.join().await;
        debug!(
            sanity_check = ?exit.sanity_check,
            hard_timeout = ?exit.hard_timeout,
            "attempt timers stopped"
        );

        AttemptReport {
            outcome,
            elapsed: started.elapsed(),
            journal,
        }
    }

    fn bind(
        &self,
        handle: &ProvisionHandle,
        gate: &SettleGate<Outcome>,
        progress: &Arc<AtomicBool>,
        journal: &SignalJournal,
    ) {
        {
            let gate = gate.clone();
            let progress = Arc::clone(progress);
            let journal = journal.clone();
            handle.on_link(move |link| {
                progress.store(true, Ordering::Release);
                let effect = SignalEffect::from_settle(gate.settle(Outcome::Success(link.clone())));
                obs::emit_signal_observed(SignalKind::Link, effect, Some(link.as_str()));
                journal.record(SignalKind::Link, effect, Some(link));
            });
        }

        {
            let gate = gate.clone();
            let journal = journal.clone();
            handle.on_error(move |message| {
                settle_backend_error(&gate, &journal, SignalKind::Error, message);
            });
        }

        let bound = {
            let gate = gate.clone();
            let journal = journal.clone();
            handle.on_specific_error(move |message| {
                settle_backend_error(&gate, &journal, SignalKind::SpecificError, message);
            })
        };
        if !bound {
            debug!("backend exposes no specific-error channel");
        }

        {
            let observer = Arc::clone(&self.observer);
            let journal = journal.clone();
            handle.on_participant_join(move |participant| {
                obs::emit_signal_observed(
                    SignalKind::ParticipantJoin,
                    SignalEffect::Informational,
                    Some(participant.name.as_str()),
                );
                journal.record(
                    SignalKind::ParticipantJoin,
                    SignalEffect::Informational,
                    Some(participant.name.clone()),
                );
                observer.participant_joined(&participant);
            });
        }

        {
            let observer = Arc::clone(&self.observer);
            let journal = journal.clone();
            handle.on_participant_leave(move |participant| {
                obs::emit_signal_observed(
                    SignalKind::ParticipantLeave,
                    SignalEffect::Informational,
                    Some(participant.name.as_str()),
                );
                journal.record(
                    SignalKind::ParticipantLeave,
                    SignalEffect::Informational,
                    Some(participant.name.clone()),
                );
                observer.participant_left(&participant);
            });
        }
    }
}

fn settle_backend_error(
    gate: &SettleGate<Outcome>,
    journal: &SignalJournal,
    kind: SignalKind,
    message: String,
) {
    let won = gate.settle(Outcome::Failure(FailureReason::BackendError(message.clone())));
    let effect = SignalEffect::from_settle(won);
    obs::emit_signal_observed(kind, effect, Some(message.as_str()));
    journal.record(kind, effect, Some(message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Participant, RoomSettings};

    fn request() -> ProvisionRequest {
        ProvisionRequest::new(RoomSettings::default(), "thr1.0123456789")
    }

    #[test]
    fn test_outcome_serde_shape() {
        let success = serde_json::to_value(Outcome::Success("https://x".into())).unwrap();
        assert_eq!(success, serde_json::json!({"success": "https://x"}));

        let failure =
            serde_json::to_value(Outcome::Failure(FailureReason::BackendError("boom".into())))
                .unwrap();
        assert_eq!(
            failure,
            serde_json::json!({"failure": {"reason": "backend_error", "message": "boom"}})
        );
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::Success("l".into()).label(), "success");
        assert_eq!(
            Outcome::Failure(FailureReason::SanityCheckFailed).label(),
            "sanity_check_failed"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_before_timers_settles_success() {
        let runner = AttemptRunner::default();
        let provisioner = |_req: ProvisionRequest| {
            let handle = ProvisionHandle::new();
            handle.emit_link("https://rooms.example/play?c=fast");
            handle
        };

        let report = runner.run(&provisioner, request()).await;
        assert_eq!(
            report.outcome,
            Outcome::Success("https://rooms.example/play?c=fast".into())
        );
        assert!(report.elapsed < Duration::from_secs(1));
        let entries = report.journal.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].effect, SignalEffect::Settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_then_link_keeps_error() {
        let runner = AttemptRunner::default();
        let provisioner = |_req: ProvisionRequest| {
            let handle = ProvisionHandle::new();
            handle.emit_error("token rejected");
            handle.emit_link("https://rooms.example/play?c=late");
            handle
        };

        let report = runner.run(&provisioner, request()).await;
        assert_eq!(
            report.outcome,
            Outcome::Failure(FailureReason::BackendError("token rejected".into()))
        );
        // Buffered signals replay in arrival order, so the link is discarded.
        let discarded = report.journal.discarded();
        assert_eq!(discarded.len(), 1);
        assert_eq!(discarded[0].kind, SignalKind::Link);
    }

    #[tokio::test(start_paused = true)]
    async fn test_specific_error_settles_as_backend_error() {
        let runner = AttemptRunner::default();
        let provisioner = |_req: ProvisionRequest| {
            let handle = ProvisionHandle::new();
            handle.emit_specific_error("recaptcha required");
            handle
        };

        let report = runner.run(&provisioner, request()).await;
        assert_eq!(
            report.outcome,
            Outcome::Failure(FailureReason::BackendError("recaptcha required".into()))
        );
        assert_eq!(report.journal.entries()[0].kind, SignalKind::SpecificError);
    }

    #[derive(Default)]
    struct Counting {
        joined: Mutex<Vec<String>>,
    }

    impl RoomObserver for Counting {
        fn participant_joined(&self, participant: &Participant) {
            self.joined.lock().unwrap().push(participant.name.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_participants_are_forwarded_but_never_settle() {
        let observer = Arc::new(Counting::default());
        let runner = AttemptRunner::new(TimeoutPolicy {
            sanity_check: None,
            hard_timeout: Duration::from_secs(30),
        })
        .with_observer(observer.clone());
        let provisioner = |_req: ProvisionRequest| {
            let handle = ProvisionHandle::new();
            handle.emit_participant_join(Participant::new(1, "ahmad"));
            handle
        };

        let report = runner.run(&provisioner, request()).await;
        assert_eq!(report.outcome, Outcome::Failure(FailureReason::Timeout));
        assert_eq!(*observer.joined.lock().unwrap(), vec!["ahmad"]);
        let kinds: Vec<SignalKind> = report.journal.entries().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![SignalKind::ParticipantJoin, SignalKind::HardTimeout]);
    }
}
