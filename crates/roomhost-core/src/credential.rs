//! Access-token validation.
//!
//! Rules are checked in order and the first failure wins:
//! empty → `missing`, fewer than [`MIN_LENGTH`] characters → `too short`,
//! anything outside `[a-zA-Z0-9._-]` → `illegal characters`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Minimum credential length, in characters.
pub const MIN_LENGTH: usize = 10;

/// Why a credential was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialIssue {
    Missing,
    TooShort,
    IllegalCharacters,
}

impl CredentialIssue {
    pub fn reason(&self) -> &'static str {
        match self {
            CredentialIssue::Missing => "missing",
            CredentialIssue::TooShort => "too short",
            CredentialIssue::IllegalCharacters => "illegal characters",
        }
    }
}

impl fmt::Display for CredentialIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Verdict returned by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenVerdict {
    pub valid: bool,
    pub reason: String,
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Typed form of [`validate`].
pub fn check(credential: &str) -> Result<(), CredentialIssue> {
    if credential.is_empty() {
        return Err(CredentialIssue::Missing);
    }
    if credential.chars().count() < MIN_LENGTH {
        return Err(CredentialIssue::TooShort);
    }
    if !credential.chars().all(is_allowed) {
        return Err(CredentialIssue::IllegalCharacters);
    }
    Ok(())
}

/// Validate a credential. Total over every `&str`, never panics.
pub fn validate(credential: &str) -> TokenVerdict {
    match check(credential) {
        Ok(()) => TokenVerdict {
            valid: true,
            reason: "ok".to_string(),
        },
        Err(issue) => TokenVerdict {
            valid: false,
            reason: issue.reason().to_string(),
        },
    }
}

/// A credential that passed [`check`]. Redacted in `Debug` and `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn parse(raw: impl Into<String>) -> Result<Self, CredentialIssue> {
        let raw = raw.into();
        check(&raw)?;
        Ok(Self(raw))
    }

    /// Parse an optional value; `None` counts as missing.
    pub fn from_optional(raw: Option<&str>) -> Result<Self, CredentialIssue> {
        Self::parse(raw.unwrap_or_default())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", redact(&self.0))
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact(&self.0))
    }
}

/// Keep the first four characters, mask the rest.
pub fn redact(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let head: String = raw.chars().take(4).collect();
    format!("{head}***")
}
