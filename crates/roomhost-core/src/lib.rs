//! roomhost Core Library
//!
//! Turns a fire-and-forget, callback-reporting room provisioning call into a
//! bounded, retried acquisition that settles exactly once per attempt.
//!
//! # Modules
//!
//! - [`credential`] — token validation (`validate`, `Credential`)
//! - [`gate`]       — `SettleGate`, the first-signal-wins primitive
//! - [`supervisor`] — sanity-check and hard-timeout timers bound to a gate
//! - [`handle`]     — `ProvisionRequest`, `ProvisionHandle`, `Provisioner`
//! - [`attempt`]    — one provisioning attempt wired into gate + supervisor
//! - [`retry`]      — `RetryController`, backoff policy, `acquire_with_retry()`
//! - [`config`]     — `HostConfig` from defaults, JSON file and environment
//! - [`fakes`]      — `ScriptedProvisioner` for tests and dry runs
//! - [`obs`] / [`telemetry`] — structured tracing events and subscriber setup

pub mod attempt;
pub mod config;
pub mod credential;
pub mod error;
pub mod fakes;
pub mod gate;
pub mod handle;
pub mod obs;
pub mod retry;
pub mod supervisor;
pub mod telemetry;

pub use attempt::{
    AttemptReport, AttemptRunner, FailureReason, Outcome, SignalEffect, SignalJournal, SignalKind,
    SignalObservation,
};
pub use config::{CredentialPolicy, HostConfig, HostMode};
pub use credential::{check, validate, Credential, CredentialIssue, TokenVerdict};
pub use error::{AcquireError, AcquireResult, ConfigError, ConfigResult};
pub use fakes::{ScriptStep, ScriptedProvisioner};
pub use gate::{SettleGate, Settlement};
pub use handle::{
    LoggingObserver, Participant, ProvisionHandle, ProvisionRequest, Provisioner, RoomObserver,
    RoomSettings, Signal, Visibility,
};
pub use retry::{
    acquire_with_retry, Acquisition, AttemptRecord, BackoffPolicy, RetryController, RetryPolicy,
};
pub use supervisor::{SupervisorExit, TimeoutPolicy, TimeoutSupervisor, TimerExit};
pub use telemetry::{init_tracing, LogFormat};
