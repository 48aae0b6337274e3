pub mod session;
pub mod sftp;

use crate::error::RunnerError;
use crate::runner::Connector;
use async_trait::async_trait;
use secrecy::SecretString;
use std::time::Duration;

use self::session::SshSession;

/// How the server's host key is checked during the handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Trust on first use: any key is accepted.
    #[default]
    AcceptAny,
    /// Only accept a key whose SHA-256 fingerprint (`SHA256:...`) matches.
    Pinned(String),
}

/// SSH connection parameters, built once and never mutated.
#[derive(Clone, Debug)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    password: SecretString,
    connect_timeout: Duration,
    auth_timeout: Duration,
    pub host_key: HostKeyPolicy,
}

impl ConnectionParams {
    /// The auth/banner timeout is raised to `connect_timeout` when smaller.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: SecretString,
        connect_timeout: Duration,
        auth_timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password,
            connect_timeout,
            auth_timeout: auth_timeout.max(connect_timeout),
            host_key: HostKeyPolicy::default(),
        }
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key = policy;
        self
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn auth_timeout(&self) -> Duration {
        self.auth_timeout
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opens real SSH sessions with russh.
#[derive(Clone, Copy, Debug, Default)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, params: &ConnectionParams) -> Result<SshSession, RunnerError> {
        SshSession::connect(params.clone()).await
    }
}
