//! Run configuration, assembled once at startup.
//!
//! Environment variables supply defaults and explicit flags override them.
//! The result is a plain value handed to the runner; nothing reads the
//! process environment after this point.

use crate::cli::Args;
use crate::commands::{assemble_commands, Transfer};
use crate::error::RunnerError;
use crate::ssh::{ConnectionParams, HostKeyPolicy};
use secrecy::SecretString;
use std::collections::HashMap;
use std::time::Duration;

pub const ENV_HOST: &str = "REMOTE_HOST";
pub const ENV_PORT: &str = "REMOTE_PORT";
pub const ENV_USER: &str = "REMOTE_USER";
pub const ENV_PASSWORD: &str = "REMOTE_PASSWORD";
pub const ENV_HOST_KEY_FINGERPRINT: &str = "REMOTE_HOST_KEY_FINGERPRINT";
pub const ENV_MANIFEST: &str = "REMOTE_MANIFEST";

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_USER: &str = "root";
/// Lower bound for the banner/auth timeout.
pub const MIN_AUTH_TIMEOUT_SECS: u64 = 20;

/// Snapshot of the `REMOTE_*` environment variables.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn capture() -> Self {
        Self::from_pairs(std::env::vars().filter(|(key, _)| key.starts_with("REMOTE_")))
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Empty values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn port(&self) -> Result<Option<u16>, RunnerError> {
        self.get(ENV_PORT)
            .map(|raw| {
                raw.trim().parse::<u16>().map_err(|_| {
                    RunnerError::InvalidConfig(format!("{} is not a valid port: {:?}", ENV_PORT, raw))
                })
            })
            .transpose()
    }
}

/// Bounded connection retry. Both values are floored at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: i64, delay_secs: i64) -> Self {
        Self {
            attempts: attempts.clamp(1, i64::from(u32::MAX)) as u32,
            delay: Duration::from_secs(delay_secs.max(1) as u64),
        }
    }

    /// One attempt, no waiting.
    pub fn once() -> Self {
        Self::new(1, 1)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Everything one `remote-exec` invocation needs.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub params: ConnectionParams,
    pub transfers: Vec<Transfer>,
    pub commands: Vec<String>,
    pub retry: RetryPolicy,
}

impl RunConfig {
    /// Merge flags over the environment.
    ///
    /// Credentials are checked before anything touches the filesystem, so a
    /// missing host or password always fails with exit code 2 and nothing
    /// else happens.
    pub fn resolve(args: Args, env: &Environment) -> Result<Self, RunnerError> {
        let host = args
            .host
            .filter(|h| !h.is_empty())
            .or_else(|| env.get(ENV_HOST).map(str::to_string));
        let password = args
            .password
            .filter(|p| !p.is_empty())
            .or_else(|| env.get(ENV_PASSWORD).map(str::to_string));
        let (host, password) = match (host, password) {
            (Some(host), Some(password)) => (host, password),
            _ => return Err(RunnerError::MissingCredentials),
        };

        let port = match args.port {
            Some(port) => port,
            None => env.port()?.unwrap_or(DEFAULT_PORT),
        };
        let user = args
            .user
            .or_else(|| env.get(ENV_USER).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        let host_key = args
            .host_key_fingerprint
            .or_else(|| env.get(ENV_HOST_KEY_FINGERPRINT).map(str::to_string))
            .map(HostKeyPolicy::Pinned)
            .unwrap_or_default();

        let timeout = args.timeout.max(1);
        let params = ConnectionParams::new(
            host,
            port,
            user,
            SecretString::new(password),
            Duration::from_secs(timeout),
            Duration::from_secs(MIN_AUTH_TIMEOUT_SECS),
        )
        .with_host_key_policy(host_key);

        let commands = assemble_commands(&args.cmd, &args.cmd_file)?;

        Ok(Self {
            params,
            transfers: args.upload,
            commands,
            retry: RetryPolicy::new(args.retries, args.retry_delay),
        })
    }
}
