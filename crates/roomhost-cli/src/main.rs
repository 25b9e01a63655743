//! roomhost - host a room on a callback-driven provisioning backend
//!
//! ## Commands
//!
//! - `check-token`: validate the access token without contacting anything
//! - `config`: print the effective configuration (token masked)
//! - `acquire`: acquire a room link with timeouts and retries

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn, Level};

use roomhost_core::{
    validate, AcquireError, Acquisition, Credential, CredentialPolicy, FailureReason, HostConfig,
    LogFormat,
    LoggingObserver, Participant, RetryController, ScriptStep, ScriptedProvisioner,
};

#[derive(Parser)]
#[command(name = "roomhost")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Resilient room acquisition for headless game hosts", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an access token
    CheckToken {
        /// Token to check (defaults to ROOMHOST_TOKEN)
        #[arg(long, env = "ROOMHOST_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Print the effective configuration as JSON
    Config {
        /// JSON config file, overlaid by ROOMHOST_* variables
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Acquire a room link
    Acquire {
        /// JSON config file, overlaid by ROOMHOST_* variables
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Backend behaviour to simulate
        #[arg(long, value_enum, default_value_t = Simulation::Succeed)]
        simulate: Simulation,

        /// Override the configured attempt limit
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}

/// Scripted backend behaviours available for dry runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Simulation {
    /// Link after 300 ms, then a participant joins
    Succeed,
    /// Backend error on every attempt
    Error,
    /// Backend never calls back
    Silent,
    /// First attempt errors, second succeeds
    Flaky,
    /// Link arrives after 5 s (trips the sanity check unless disabled)
    Late,
}

impl Simulation {
    fn backend(self) -> ScriptedProvisioner {
        let link = |code: &str| format!("https://rooms.example/play?c={code}");
        match self {
            Simulation::Succeed => ScriptedProvisioner::always(vec![
                ScriptStep::link(Duration::from_millis(300), link("sim-ok")),
                ScriptStep::join(Duration::from_millis(800), Participant::new(1, "guest")),
            ]),
            Simulation::Error => ScriptedProvisioner::always(vec![ScriptStep::error(
                Duration::from_millis(100),
                "simulated backend failure",
            )]),
            Simulation::Silent => ScriptedProvisioner::silent(),
            Simulation::Flaky => ScriptedProvisioner::sequence(vec![
                vec![ScriptStep::specific_error(
                    Duration::from_millis(100),
                    "simulated token rejection",
                )],
                vec![ScriptStep::link(Duration::from_millis(300), link("sim-flaky"))],
            ]),
            Simulation::Late => ScriptedProvisioner::always(vec![ScriptStep::link(
                Duration::from_secs(5),
                link("sim-late"),
            )]),
        }
    }
}

/// What `acquire` printed, for callers and tests.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AcquireSummary {
    Acquired(Acquisition),
    Skipped { reason: String },
    Failed {
        error: String,
        reason: Option<FailureReason>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    roomhost_core::init_tracing(format, level);

    match cli.command {
        Commands::CheckToken { token } => cmd_check_token(token.as_deref()),
        Commands::Config { config } => cmd_config(config.as_deref()),
        Commands::Acquire {
            config,
            simulate,
            max_attempts,
        } => {
            let mut config = load_config(config.as_deref())?;
            override_max_attempts(&mut config, max_attempts)?;
            let summary = cmd_acquire(&config, simulate).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<HostConfig> {
    HostConfig::load(path).context("Failed to load roomhost configuration")
}

fn override_max_attempts(config: &mut HostConfig, max_attempts: Option<u32>) -> Result<()> {
    if let Some(max_attempts) = max_attempts {
        config.max_attempts = max_attempts;
        config
            .validate()
            .context("Invalid --max-attempts override")?;
    }
    Ok(())
}

fn cmd_check_token(token: Option<&str>) -> Result<()> {
    let verdict = validate(token.unwrap_or_default());
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    if !verdict.valid {
        bail!("token rejected: {}", verdict.reason);
    }
    Ok(())
}

fn cmd_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

/// Acquire a room against the simulated backend, applying the credential
/// and failure policy of the configured mode.
async fn cmd_acquire(config: &HostConfig, simulation: Simulation) -> Result<AcquireSummary> {
    let credential = match Credential::from_optional(config.token.as_deref()) {
        Ok(credential) => credential,
        Err(issue) => match config.credential_policy() {
            CredentialPolicy::Fatal => {
                bail!("ROOMHOST_TOKEN is {issue}; refusing to start in production mode")
            }
            CredentialPolicy::WarnAndSkip => {
                warn!(reason = issue.reason(), "ROOMHOST_TOKEN unusable; skipping room acquisition");
                return Ok(AcquireSummary::Skipped {
                    reason: format!("token {issue}"),
                });
            }
        },
    };
    info!(token = %credential, room = %config.room_name, "acquiring room");

    let backend = simulation.backend();
    let controller = RetryController::new(
        config.room_settings(),
        config.timeout_policy(),
        config.retry_policy(),
    )
    .with_observer(Arc::new(LoggingObserver));

    match controller
        .acquire_detailed(&backend, credential.expose())
        .await
    {
        Ok(acquisition) => {
            info!(link = %acquisition.link, "room ready");
            Ok(AcquireSummary::Acquired(acquisition))
        }
        Err(err @ AcquireError::AcquisitionFailed { .. }) => match config.credential_policy() {
            CredentialPolicy::Fatal => Err(err).context("room acquisition exhausted all attempts"),
            CredentialPolicy::WarnAndSkip => {
                warn!(error = %err, "continuing without a room");
                Ok(AcquireSummary::Failed {
                    error: err.to_string(),
                    reason: err.failure_reason(),
                })
            }
        },
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomhost_core::HostMode;

    fn config(mode: HostMode, token: Option<&str>) -> HostConfig {
        HostConfig {
            mode,
            token: token.map(str::to_string),
            ..HostConfig::default()
        }
    }

    #[test]
    fn test_cli_parses_acquire() {
        let cli = Cli::try_parse_from([
            "roomhost",
            "--json",
            "acquire",
            "--simulate",
            "flaky",
            "--max-attempts",
            "2",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Acquire {
                simulate,
                max_attempts,
                ..
            } => {
                assert_eq!(simulate, Simulation::Flaky);
                assert_eq!(max_attempts, Some(2));
            }
            _ => panic!("expected acquire"),
        }
    }

    #[test]
    fn test_check_token() {
        assert!(cmd_check_token(Some("thr1.0123456789")).is_ok());
        assert!(cmd_check_token(Some("short")).is_err());
        assert!(cmd_check_token(None).is_err());
    }

    #[test]
    fn test_max_attempts_override_is_validated() {
        let mut config = config(HostMode::Development, Some("thr1.0123456789"));
        override_max_attempts(&mut config, Some(5)).unwrap();
        assert_eq!(config.max_attempts, 5);

        assert!(override_max_attempts(&mut config, Some(u32::MAX)).is_err());
        assert!(override_max_attempts(&mut config, Some(0)).is_err());
        override_max_attempts(&mut config, None).unwrap();
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roomhost.json");
        std::fs::write(&path, r#"{"room_name": "Night league", "capacity": 8}"#).unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.capacity, 8);
        assert_eq!(config.room_settings().capacity, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_succeeds() {
        let summary = cmd_acquire(
            &config(HostMode::Production, Some("thr1.0123456789")),
            Simulation::Succeed,
        )
        .await
        .unwrap();
        match summary {
            AcquireSummary::Acquired(acquisition) => {
                assert_eq!(acquisition.link, "https://rooms.example/play?c=sim-ok");
                assert_eq!(acquisition.attempts.len(), 1);
            }
            other => panic!("expected Acquired, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_backend_recovers() {
        let summary = cmd_acquire(
            &config(HostMode::Development, Some("thr1.0123456789")),
            Simulation::Flaky,
        )
        .await
        .unwrap();
        assert!(matches!(summary, AcquireSummary::Acquired(ref a) if a.attempts.len() == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_token_policy() {
        let skipped = cmd_acquire(&config(HostMode::Development, None), Simulation::Succeed)
            .await
            .unwrap();
        assert_eq!(
            skipped,
            AcquireSummary::Skipped {
                reason: "token missing".into()
            }
        );

        let fatal = cmd_acquire(&config(HostMode::Production, None), Simulation::Succeed).await;
        assert!(fatal.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_policy() {
        let token = Some("thr1.0123456789");
        let dev = cmd_acquire(&config(HostMode::Development, token), Simulation::Silent)
            .await
            .unwrap();
        match dev {
            AcquireSummary::Failed { reason, .. } => {
                assert_eq!(reason, Some(FailureReason::SanityCheckFailed));
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        let prod = cmd_acquire(&config(HostMode::Production, token), Simulation::Silent).await;
        let err = prod.unwrap_err();
        assert!(err.downcast_ref::<AcquireError>().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_link_succeeds_when_sanity_check_disabled() {
        let mut cfg = config(HostMode::Production, Some("thr1.0123456789"));
        cfg.sanity_check_ms = 0;
        let summary = cmd_acquire(&cfg, Simulation::Late).await.unwrap();
        assert!(matches!(summary, AcquireSummary::Acquired(_)));
    }
}
