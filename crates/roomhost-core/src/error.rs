//! Error types for room acquisition and host configuration.

use crate::attempt::{FailureReason, Outcome};
use crate::credential::CredentialIssue;
use crate::retry::AttemptRecord;

/// Errors surfaced by [`crate::retry::RetryController`].
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// Configuration error; never retried.
    #[error("invalid credential: {issue}")]
    InvalidCredential { issue: CredentialIssue },

    #[error("room acquisition failed after {} attempt(s): {}", .attempts.len(), last_reason(.attempts))]
    AcquisitionFailed { attempts: Vec<AttemptRecord> },

    #[error("invalid retry configuration: {0}")]
    InvalidConfig(String),
}

impl AcquireError {
    /// Per-attempt history when all attempts were exhausted.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            AcquireError::AcquisitionFailed { attempts } => attempts,
            _ => &[],
        }
    }

    /// The attempt-level reason behind this error: the rejected credential,
    /// or the failure of the last attempt. `None` for configuration errors.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            AcquireError::InvalidCredential { issue } => {
                Some(FailureReason::InvalidCredential(issue.reason().to_string()))
            }
            AcquireError::AcquisitionFailed { attempts } => {
                attempts.last().and_then(|record| match &record.outcome {
                    Outcome::Failure(reason) => Some(reason.clone()),
                    Outcome::Success(_) => None,
                })
            }
            AcquireError::InvalidConfig(_) => None,
        }
    }
}

fn last_reason(attempts: &[AttemptRecord]) -> String {
    attempts
        .last()
        .map(|record| record.outcome.to_string())
        .unwrap_or_else(|| "no attempts recorded".to_string())
}

/// Result type for acquisition operations.
pub type AcquireResult<T> = std::result::Result<T, AcquireError>;

/// Errors produced while loading [`crate::config::HostConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_failed_message_names_last_reason() {
        let attempts = vec![
            AttemptRecord::new(1, Outcome::Failure(FailureReason::SanityCheckFailed), 1_000),
            AttemptRecord::new(2, Outcome::Failure(FailureReason::Timeout), 30_000),
        ];
        let err = AcquireError::AcquisitionFailed { attempts };
        let msg = err.to_string();
        assert!(msg.contains("2 attempt(s)"), "got: {msg}");
        assert!(msg.contains("timed out"), "got: {msg}");
        assert_eq!(err.attempts().len(), 2);
        assert_eq!(err.failure_reason(), Some(FailureReason::Timeout));
    }

    #[test]
    fn test_invalid_credential_has_no_history() {
        let err = AcquireError::InvalidCredential {
            issue: CredentialIssue::TooShort,
        };
        assert_eq!(err.to_string(), "invalid credential: too short");
        assert!(err.attempts().is_empty());
        assert_eq!(
            err.failure_reason(),
            Some(FailureReason::InvalidCredential("too short".into()))
        );
        assert_eq!(
            err.failure_reason().map(|reason| reason.to_string()),
            Some("invalid credential: too short".into())
        );
    }

    #[test]
    fn test_config_error_has_no_failure_reason() {
        let err = AcquireError::InvalidConfig("max_attempts must be at least 1".into());
        assert_eq!(err.failure_reason(), None);
    }
}
