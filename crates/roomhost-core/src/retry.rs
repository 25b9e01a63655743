//! Retry controller: strictly sequential attempts with backoff between
//! failures, aggregating every failure into the final error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::attempt::{AttemptRunner, Outcome};
use crate::credential;
use crate::error::{AcquireError, AcquireResult};
use crate::handle::{ProvisionRequest, Provisioner, RoomObserver, RoomSettings};
use crate::obs;
use crate::supervisor::TimeoutPolicy;

/// Delay inserted after a failed attempt. A pure function of the attempt
/// index (1-based), so it can be tested without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// `attempt * step`: 5 s, 10 s, 15 s … with the default step.
    Linear { step_ms: u64 },
    /// `base * 2^(attempt - 1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Linear { step_ms: 5_000 }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt_index: u32) -> Duration {
        let ms = match *self {
            BackoffPolicy::Linear { step_ms } => step_ms.saturating_mul(u64::from(attempt_index)),
            BackoffPolicy::Exponential { base_ms, max_ms } => {
                let exp = attempt_index.saturating_sub(1).min(32);
                base_ms.saturating_mul(2u64.saturating_pow(exp)).min(max_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Diagnostics for one attempt. Lives only as long as the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_index: u32,
    pub outcome: Outcome,
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(attempt_index: u32, outcome: Outcome, elapsed_ms: u64) -> Self {
        Self {
            attempt_index,
            outcome,
            elapsed_ms,
            recorded_at: Utc::now(),
        }
    }
}

/// A successful acquisition together with every attempt it took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acquisition {
    pub link: String,
    pub attempts: Vec<AttemptRecord>,
}

/// Drives [`AttemptRunner`] across bounded, backed-off attempts.
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    room: RoomSettings,
    runner: AttemptRunner,
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(room: RoomSettings, timeouts: TimeoutPolicy, policy: RetryPolicy) -> Self {
        Self {
            room,
            runner: AttemptRunner::new(timeouts),
            policy,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RoomObserver>) -> Self {
        self.runner = self.runner.with_observer(observer);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Acquire a room link.
    pub async fn acquire(
        &self,
        provisioner: &dyn Provisioner,
        credential: &str,
    ) -> AcquireResult<String> {
        self.acquire_detailed(provisioner, credential)
            .await
            .map(|acquisition| acquisition.link)
    }

    /// Like [`Self::acquire`], keeping the per-attempt history on success too.
    pub async fn acquire_detailed(
        &self,
        provisioner: &dyn Provisioner,
        credential: &str,
    ) -> AcquireResult<Acquisition> {
        if self.policy.max_attempts == 0 {
            return Err(AcquireError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        let span = obs::acquisition_span(&Uuid::new_v4(), &self.room.name);
        self.run_attempts(provisioner, credential)
            .instrument(span)
            .await
    }

    async fn run_attempts(
        &self,
        provisioner: &dyn Provisioner,
        credential: &str,
    ) -> AcquireResult<Acquisition> {
        let max_attempts = self.policy.max_attempts;
        let started = Instant::now();
        let mut history = Vec::new();
        obs::emit_acquisition_started(max_attempts);

        for attempt_index in 1..=max_attempts {
            // Re-checked every attempt; a bad token is a config error, not a retry.
            if let Err(issue) = credential::check(credential) {
                obs::emit_credential_rejected(issue);
                return Err(AcquireError::InvalidCredential { issue });
            }

            obs::emit_attempt_started(attempt_index, max_attempts);
            let request = ProvisionRequest::new(self.room.clone(), credential);
            let report = self
                .runner
                .run(provisioner, request)
                .instrument(obs::attempt_span(attempt_index, max_attempts))
                .await;

            let elapsed_ms = report.elapsed.as_millis() as u64;
            obs::emit_attempt_settled(attempt_index, &report.outcome, elapsed_ms);
            history.push(AttemptRecord::new(
                attempt_index,
                report.outcome.clone(),
                elapsed_ms,
            ));

            if let Outcome::Success(link) = report.outcome {
                obs::emit_acquisition_finished(
                    true,
                    attempt_index,
                    started.elapsed().as_millis() as u64,
                );
                return Ok(Acquisition {
                    link,
                    attempts: history,
                });
            }

            if attempt_index < max_attempts {
                let delay = self.policy.backoff.delay(attempt_index);
                obs::emit_backoff(attempt_index, delay);
                tokio::time::sleep(delay).await;
            }
        }

        obs::emit_acquisition_finished(false, max_attempts, started.elapsed().as_millis() as u64);
        Err(AcquireError::AcquisitionFailed { attempts: history })
    }
}

/// Acquire a room link with default room settings, timeouts and linear
/// backoff, making at most `max_attempts` attempts.
pub async fn acquire_with_retry(
    provisioner: &dyn Provisioner,
    credential: &str,
    max_attempts: u32,
) -> AcquireResult<String> {
    let policy = RetryPolicy {
        max_attempts,
        ..RetryPolicy::default()
    };
    RetryController::new(RoomSettings::default(), TimeoutPolicy::default(), policy)
        .acquire(provisioner, credential)
        .await
}
