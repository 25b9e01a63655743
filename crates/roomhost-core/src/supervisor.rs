//! Deadline checks bound to a [`SettleGate`].
//!
//! Two timers race the provisioning callbacks:
//!
//! - **sanity check** (default +1 s): fails the attempt when the backend
//!   handed back a handle but no link has arrived. Catches backends that
//!   never call back at all, long before the hard timeout.
//! - **hard timeout** (default +30 s): fails the attempt unconditionally.
//!
//! Both timers hand their abort handles to the gate, which cancels them in
//! the same critical section that settles it.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::attempt::{FailureReason, Outcome, SignalEffect, SignalJournal, SignalKind};
use crate::gate::SettleGate;
use crate::obs;

/// Deadlines for a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Early silent-backend check. `None` disables it for slow-but-healthy backends.
    pub sanity_check: Option<Duration>,
    pub hard_timeout: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            sanity_check: Some(Duration::from_secs(1)),
            hard_timeout: Duration::from_secs(30),
        }
    }
}

/// How a supervised timer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerExit {
    /// Elapsed and settled the gate.
    Fired,
    /// Elapsed but had nothing to do (gate settled or progress seen).
    Skipped,
    /// Aborted by settlement before elapsing.
    Cancelled,
    /// Never scheduled.
    Disabled,
    /// The check itself panicked.
    Panicked,
}

/// Final state of both timers, reported by [`TimeoutSupervisor::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorExit {
    pub sanity_check: TimerExit,
    pub hard_timeout: TimerExit,
}

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const SKIPPED: u8 = 2;

/// A spawned check plus the exit it reported. The status is stored by the
/// task itself because a timer that settles the gate also aborts its own
/// handle, which makes the join result unreliable.
#[derive(Debug)]
struct Timer {
    task: JoinHandle<()>,
    status: Arc<AtomicU8>,
}

impl Timer {
    fn spawn<F>(delay: Duration, check: F) -> Self
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let status = Arc::new(AtomicU8::new(PENDING));
        let reported = Arc::clone(&status);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let fired = check();
            reported.store(if fired { FIRED } else { SKIPPED }, Ordering::Release);
        });
        Self { task, status }
    }

    async fn join(self) -> TimerExit {
        if let Err(err) = self.task.await {
            if err.is_panic() {
                warn!(error = %err, "timeout check panicked");
                return TimerExit::Panicked;
            }
        }
        match self.status.load(Ordering::Acquire) {
            FIRED => TimerExit::Fired,
            SKIPPED => TimerExit::Skipped,
            _ => TimerExit::Cancelled,
        }
    }
}

/// Owner of the two timer tasks for one attempt.
#[derive(Debug)]
pub struct TimeoutSupervisor {
    sanity_check: Option<Timer>,
    hard_timeout: Timer,
}

impl TimeoutSupervisor {
    /// Schedule both checks against `gate`. Must run inside a tokio runtime.
    ///
    /// `progress` is raised by the link callback; the sanity check stands
    /// down once it is set.
    pub fn attach(
        gate: &SettleGate<Outcome>,
        policy: &TimeoutPolicy,
        progress: Arc<AtomicBool>,
        journal: SignalJournal,
    ) -> Self {
        let sanity_check = policy.sanity_check.map(|delay| {
            let gate = gate.clone();
            let journal = journal.clone();
            Timer::spawn(delay, move || {
                if gate.is_settled() || progress.load(Ordering::Acquire) {
                    return false;
                }
                let won = gate.settle(Outcome::Failure(FailureReason::SanityCheckFailed));
                let effect = SignalEffect::from_settle(won);
                journal.record(SignalKind::SanityCheck, effect, None);
                obs::emit_check_fired(SignalKind::SanityCheck, effect, delay);
                won
            })
        });

        let hard_timeout = {
            let gate = gate.clone();
            let delay = policy.hard_timeout;
            Timer::spawn(delay, move || {
                if gate.is_settled() {
                    return false;
                }
                let won = gate.settle(Outcome::Failure(FailureReason::Timeout));
                let effect = SignalEffect::from_settle(won);
                journal.record(SignalKind::HardTimeout, effect, None);
                obs::emit_check_fired(SignalKind::HardTimeout, effect, delay);
                won
            })
        };

        if let Some(timer) = &sanity_check {
            gate.register_cancel(timer.task.abort_handle());
        }
        gate.register_cancel(hard_timeout.task.abort_handle());

        Self {
            sanity_check,
            hard_timeout,
        }
    }

    /// Whether any timer task is still running.
    pub fn is_armed(&self) -> bool {
        let sanity_running = self
            .sanity_check
            .as_ref()
            .is_some_and(|timer| !timer.task.is_finished());
        sanity_running || !self.hard_timeout.task.is_finished()
    }

    /// Wait for both timers to finish. Returns promptly once the gate has
    /// settled, because settlement aborts whatever is still pending.
    pub async fn join(self) -> SupervisorExit {
        let sanity_check = match self.sanity_check {
            Some(timer) => timer.join().await,
            None => TimerExit::Disabled,
        };
        let hard_timeout = self.hard_timeout.join().await;
        SupervisorExit {
            sanity_check,
            hard_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(sanity_ms: Option<u64>, hard_ms: u64) -> TimeoutPolicy {
        TimeoutPolicy {
            sanity_check: sanity_ms.map(Duration::from_millis),
            hard_timeout: Duration::from_millis(hard_ms),
        }
    }

    #[test]
    fn test_default_policy() {
        let p = TimeoutPolicy::default();
        assert_eq!(p.sanity_check, Some(Duration::from_secs(1)));
        assert_eq!(p.hard_timeout, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sanity_check_fires_before_hard_timeout() {
        let (gate, settlement) = SettleGate::new();
        let journal = SignalJournal::new();
        let start = tokio::time::Instant::now();
        let supervisor = TimeoutSupervisor::attach(
            &gate,
            &policy(Some(1_000), 30_000),
            Arc::new(AtomicBool::new(false)),
            journal.clone(),
        );

        let outcome = settlement.wait().await.unwrap();
        assert_eq!(outcome, Outcome::Failure(FailureReason::SanityCheckFailed));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));

        let exit = supervisor.join().await;
        assert_eq!(exit.sanity_check, TimerExit::Fired);
        assert_eq!(exit.hard_timeout, TimerExit::Cancelled);
        assert_eq!(journal.entries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout_when_sanity_disabled() {
        let (gate, settlement) = SettleGate::new();
        let start = tokio::time::Instant::now();
        let supervisor = TimeoutSupervisor::attach(
            &gate,
            &policy(None, 30_000),
            Arc::new(AtomicBool::new(false)),
            SignalJournal::new(),
        );

        let outcome = settlement.wait().await.unwrap();
        assert_eq!(outcome, Outcome::Failure(FailureReason::Timeout));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));

        let exit = supervisor.join().await;
        assert_eq!(exit.sanity_check, TimerExit::Disabled);
        assert_eq!(exit.hard_timeout, TimerExit::Fired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_stands_down_sanity_check() {
        let (gate, settlement) = SettleGate::new();
        let progress = Arc::new(AtomicBool::new(true));
        let supervisor = TimeoutSupervisor::attach(
            &gate,
            &policy(Some(1_000), 5_000),
            progress,
            SignalJournal::new(),
        );

        let outcome = settlement.wait().await.unwrap();
        assert_eq!(outcome, Outcome::Failure(FailureReason::Timeout));
        let exit = supervisor.join().await;
        assert_eq!(exit.sanity_check, TimerExit::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_check_is_not_reported_as_cancelled() {
        let timer = Timer::spawn(Duration::from_millis(10), || -> bool {
            panic!("check blew up")
        });
        assert_eq!(timer.join().await, TimerExit::Panicked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_settle_cancels_both_timers() {
        let (gate, settlement) = SettleGate::new();
        let journal = SignalJournal::new();
        let supervisor = TimeoutSupervisor::attach(
            &gate,
            &TimeoutPolicy::default(),
            Arc::new(AtomicBool::new(false)),
            journal.clone(),
        );
        assert!(supervisor.is_armed());

        assert!(gate.settle(Outcome::Success("https://rooms.example/play?c=abc".into())));
        let exit = supervisor.join().await;
        assert_eq!(exit.sanity_check, TimerExit::Cancelled);
        assert_eq!(exit.hard_timeout, TimerExit::Cancelled);
        assert!(matches!(settlement.wait().await, Some(Outcome::Success(_))));

        // Nothing fires later on the virtual clock.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(journal.entries().is_empty());
    }
}
