//! Host configuration.
//!
//! Sources, later wins: built-in defaults, an optional JSON file, then
//! `ROOMHOST_*` environment variables. The environment is read through an
//! injectable lookup so tests never touch the process environment.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credential::redact;
use crate::error::{ConfigError, ConfigResult};
use crate::handle::{RoomSettings, Visibility};
use crate::retry::{BackoffPolicy, RetryPolicy};
use crate::supervisor::TimeoutPolicy;

pub const ENV_TOKEN: &str = "ROOMHOST_TOKEN";
pub const ENV_PROXY: &str = "ROOMHOST_PROXY";
pub const ENV_MODE: &str = "ROOMHOST_MODE";
pub const ENV_ROOM_NAME: &str = "ROOMHOST_ROOM_NAME";
pub const ENV_CAPACITY: &str = "ROOMHOST_CAPACITY";
pub const ENV_PUBLIC: &str = "ROOMHOST_PUBLIC";
pub const ENV_DEBUG: &str = "ROOMHOST_DEBUG";
pub const ENV_MAX_ATTEMPTS: &str = "ROOMHOST_MAX_ATTEMPTS";
pub const ENV_SANITY_CHECK_MS: &str = "ROOMHOST_SANITY_CHECK_MS";
pub const ENV_TIMEOUT_MS: &str = "ROOMHOST_TIMEOUT_MS";
pub const ENV_BACKOFF_STEP_MS: &str = "ROOMHOST_BACKOFF_STEP_MS";

/// Upper bound accepted for `max_attempts`.
pub const MAX_ATTEMPTS_LIMIT: u32 = 100;

/// Deployment mode; decides how a bad credential is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostMode {
    Production,
    #[default]
    Development,
}

impl FromStr for HostMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> ConfigResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(HostMode::Production),
            "development" | "dev" => Ok(HostMode::Development),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_MODE.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// What to do when the credential is missing or invalid at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPolicy {
    /// Refuse to start.
    Fatal,
    /// Log a warning and skip room acquisition.
    WarnAndSkip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub room_name: String,
    pub capacity: u16,
    pub public: bool,
    pub token: Option<String>,
    pub proxy: Option<String>,
    pub debug: bool,
    pub mode: HostMode,
    pub max_attempts: u32,
    /// `0` disables the sanity check.
    pub sanity_check_ms: u64,
    pub hard_timeout_ms: u64,
    pub backoff_step_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        let room = RoomSettings::default();
        Self {
            room_name: room.name,
            capacity: room.capacity,
            public: room.visibility == Visibility::Public,
            token: None,
            proxy: None,
            debug: false,
            mode: HostMode::default(),
            max_attempts: 3,
            sanity_check_ms: 1_000,
            hard_timeout_ms: 30_000,
            backoff_step_ms: 5_000,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> ConfigResult<T> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_flag(key: &str, raw: &str) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

impl HostConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::load(None)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Overlay values found through `lookup`. Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(token) = get(ENV_TOKEN) {
            self.token = Some(token);
        }
        if let Some(proxy) = get(ENV_PROXY) {
            self.proxy = Some(proxy);
        }
        if let Some(mode) = get(ENV_MODE) {
            self.mode = mode.parse()?;
        }
        if let Some(name) = get(ENV_ROOM_NAME) {
            self.room_name = name;
        }
        if let Some(raw) = get(ENV_CAPACITY) {
            self.capacity = parse_value(ENV_CAPACITY, &raw)?;
        }
        if let Some(raw) = get(ENV_PUBLIC) {
            self.public = parse_flag(ENV_PUBLIC, &raw)?;
        }
        if let Some(raw) = get(ENV_DEBUG) {
            self.debug = parse_flag(ENV_DEBUG, &raw)?;
        }
        if let Some(raw) = get(ENV_MAX_ATTEMPTS) {
            self.max_attempts = parse_value(ENV_MAX_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = get(ENV_SANITY_CHECK_MS) {
            self.sanity_check_ms = parse_value(ENV_SANITY_CHECK_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_TIMEOUT_MS) {
            self.hard_timeout_ms = parse_value(ENV_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_BACKOFF_STEP_MS) {
            self.backoff_step_ms = parse_value(ENV_BACKOFF_STEP_MS, &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |key: &str, value: String| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        };
        if self.capacity == 0 {
            return Err(invalid("capacity", self.capacity.to_string()));
        }
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(invalid("max_attempts", self.max_attempts.to_string()));
        }
        if self.hard_timeout_ms == 0 {
            return Err(invalid("hard_timeout_ms", self.hard_timeout_ms.to_string()));
        }
        Ok(())
    }

    pub fn credential_policy(&self) -> CredentialPolicy {
        match self.mode {
            HostMode::Production => CredentialPolicy::Fatal,
            HostMode::Development => CredentialPolicy::WarnAndSkip,
        }
    }

    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            name: self.room_name.clone(),
            capacity: self.capacity,
            visibility: if self.public {
                Visibility::Public
            } else {
                Visibility::Private
            },
            proxy: self.proxy.clone(),
            debug: self.debug,
        }
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            sanity_check: (self.sanity_check_ms > 0)
                .then(|| Duration::from_millis(self.sanity_check_ms)),
            hard_timeout: Duration::from_millis(self.hard_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: BackoffPolicy::Linear {
                step_ms: self.backoff_step_ms,
            },
        }
    }

    /// Copy safe to print: the token is masked.
    pub fn redacted(&self) -> Self {
        Self {
            token: self.token.as_deref().map(redact),
            ..self.clone()
        }
    }
}
