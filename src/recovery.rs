//! Fixed-manifest recovery.
//!
//! Keeps trying a full connect-and-execute cycle until one succeeds. Any
//! failure, including a non-zero command after earlier commands already
//! ran, restarts the cycle from the first manifest command, so every
//! manifest command has to be idempotent.

use crate::commands::CommandManifest;
use crate::config::{
    Environment, RetryPolicy, DEFAULT_PORT, DEFAULT_USER, ENV_HOST, ENV_MANIFEST, ENV_PASSWORD,
    ENV_USER,
};
use crate::error::RunnerError;
use crate::runner::{Connector, RunOutcome, Runner};
use crate::ssh::ConnectionParams;
use secrecy::SecretString;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RECOVERY_HOST: &str = "192.227.147.140";
pub const RECOVERY_ATTEMPTS: i64 = 120;
pub const RECOVERY_DELAY_SECS: i64 = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const AUTH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("failed to recover via ssh after retries")]
    Exhausted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Target, manifest and retry bounds of the recovery loop.
#[derive(Clone, Debug)]
pub struct RecoveryConfig {
    pub params: ConnectionParams,
    pub manifest: CommandManifest,
    pub retry: RetryPolicy,
}

impl RecoveryConfig {
    /// Resolve from the environment. `REMOTE_PASSWORD` has no default.
    pub fn from_env(env: &Environment) -> Result<Self, RunnerError> {
        let password = env
            .get(ENV_PASSWORD)
            .ok_or_else(|| RunnerError::InvalidConfig(format!("{} is required", ENV_PASSWORD)))?;
        let params = ConnectionParams::new(
            env.get(ENV_HOST).unwrap_or(DEFAULT_RECOVERY_HOST),
            env.port()?.unwrap_or(DEFAULT_PORT),
            env.get(ENV_USER).unwrap_or(DEFAULT_USER),
            SecretString::new(password.to_string()),
            CONNECT_TIMEOUT,
            AUTH_TIMEOUT,
        );
        let manifest = match env.get(ENV_MANIFEST) {
            Some(path) => CommandManifest::load(Path::new(path))?,
            None => CommandManifest::profile_remediation(),
        };

        Ok(Self {
            params,
            manifest,
            retry: RetryPolicy::new(RECOVERY_ATTEMPTS, RECOVERY_DELAY_SECS),
        })
    }
}

/// Run cycles until one completes. Returns the successful attempt number.
pub async fn recover<C: Connector, W: Write>(
    runner: &mut Runner<C, W>,
    config: &RecoveryConfig,
) -> Result<u32, RecoveryError> {
    log::info!(
        "recovering {} with manifest {} ({} commands)",
        config.params.addr(),
        config.manifest.name,
        config.manifest.commands.len()
    );

    let attempts = config.retry.attempts();
    for attempt in 1..=attempts {
        match cycle(runner, config, attempt).await {
            Ok(RunOutcome::Completed) => {
                runner.reporter().line(format_args!("recovery commands sent"))?;
                return Ok(attempt);
            }
            Ok(RunOutcome::CommandFailed { command, exit_code }) => {
                runner.reporter().line(format_args!(
                    "attempt {} failed: RemoteCommandFailure: `{}` exited with {}",
                    attempt, command, exit_code
                ))?;
            }
            Err(err) => {
                runner.reporter().line(format_args!(
                    "attempt {} failed: {}: {}",
                    attempt,
                    err.kind(),
                    err
                ))?;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.retry.delay()).await;
        }
    }

    log::error!(
        "giving up on {} after {} attempts",
        config.params.addr(),
        attempts
    );
    Err(RecoveryError::Exhausted)
}

async fn cycle<C: Connector, W: Write>(
    runner: &mut Runner<C, W>,
    config: &RecoveryConfig,
    attempt: u32,
) -> Result<RunOutcome, RunnerError> {
    let session = runner
        .connect_with_retry(&config.params, &RetryPolicy::once())
        .await?;
    runner
        .reporter()
        .line(format_args!("connected on attempt {}", attempt))?;
    runner
        .execute(session, &[], &config.manifest.commands)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Reporter, TailLimits};
    use crate::runner::fake::FakeConnector;
    use secrecy::ExposeSecret;

    fn config(commands: &[&str], attempts: i64) -> RecoveryConfig {
        let env = Environment::from_pairs([(ENV_PASSWORD, "pw")]);
        let mut config = RecoveryConfig::from_env(&env).unwrap();
        config.manifest = CommandManifest {
            name: "test".to_string(),
            commands: commands.iter().map(|c| c.to_string()).collect(),
        };
        config.retry = RetryPolicy::new(attempts, RECOVERY_DELAY_SECS);
        config
    }

    fn runner(connector: FakeConnector) -> Runner<FakeConnector, Vec<u8>> {
        Runner::new(
            connector,
            Reporter::new(Vec::new(), TailLimits::RECOVERY).compact(),
        )
    }

    #[test]
    fn test_password_required() {
        let err = RecoveryConfig::from_env(&Environment::default()).unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: REMOTE_PASSWORD is required");
    }

    #[test]
    fn test_defaults() {
        let env = Environment::from_pairs([(ENV_PASSWORD, "pw")]);
        let config = RecoveryConfig::from_env(&env).unwrap();
        assert_eq!(config.params.host, DEFAULT_RECOVERY_HOST);
        assert_eq!(config.params.port, 22);
        assert_eq!(config.params.username, "root");
        assert_eq!(config.params.password().expose_secret(), "pw");
        assert_eq!(config.params.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.params.auth_timeout(), Duration::from_secs(20));
        assert_eq!(config.retry.attempts(), 120);
        assert_eq!(config.retry.delay(), Duration::from_secs(5));
        assert_eq!(config.manifest, CommandManifest::profile_remediation());
    }

    #[test]
    fn test_manifest_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart-nginx.txt");
        std::fs::write(&path, "systemctl restart nginx\n").unwrap();

        let env = Environment::from_pairs([
            (ENV_PASSWORD.to_string(), "pw".to_string()),
            (ENV_MANIFEST.to_string(), path.display().to_string()),
        ]);
        let config = RecoveryConfig::from_env(&env).unwrap();
        assert_eq!(config.manifest.name, "restart-nginx");
        assert_eq!(config.manifest.commands, vec!["systemctl restart nginx"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_trying_until_host_is_reachable() {
        let mut runner = runner(FakeConnector::failing(3));
        let attempt = recover(&mut runner, &config(&["true", "reboot"], 120))
            .await
            .unwrap();

        assert_eq!(attempt, 4);
        let out = String::from_utf8(runner.into_reporter().into_inner()).unwrap();
        assert!(out.starts_with("attempt 1 failed: Timeout: connect timed out after 10s\n"));
        assert!(out.contains("connected on attempt 4\n>>> true\nexit=0\n"));
        assert!(out.ends_with("recovery commands sent\n"));
        assert!(!out.contains("[connect]"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_failure_after_all_attempts() {
        let start = tokio::time::Instant::now();
        let mut runner = runner(FakeConnector::failing(10));
        let err = recover(&mut runner, &config(&["true"], 3)).await.unwrap_err();

        assert!(matches!(err, RecoveryError::Exhausted));
        assert_eq!(err.to_string(), "failed to recover via ssh after retries");
        // No sleep after the final attempt.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_command_restarts_whole_cycle() {
        let connector = FakeConnector::new();
        let events = connector.events.clone();
        let mut runner = runner(connector);
        let err = recover(&mut runner, &config(&["true", "exit 1", "reboot"], 2))
            .await
            .unwrap_err();

        assert!(matches!(err, RecoveryError::Exhausted));
        let events = events.lock().unwrap().clone();
        assert_eq!(events.iter().filter(|e| *e == "exec true").count(), 2);
        assert_eq!(events.iter().filter(|e| *e == "close").count(), 2);
        assert!(!events.iter().any(|e| e == "exec reboot"));

        let out = String::from_utf8(runner.into_reporter().into_inner()).unwrap();
        assert!(out.contains("attempt 1 failed: RemoteCommandFailure: `exit 1` exited with 1\n"));
    }
}
