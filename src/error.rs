use std::path::PathBuf;
use thiserror::Error;

/// Everything that can stop a remote run.
///
/// Connect-phase variants are the only ones the runner retries; every
/// other variant aborts the phase it happened in.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("missing --host/--password (or REMOTE_HOST/REMOTE_PASSWORD)")]
    MissingCredentials,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: russh::Error,
    },

    #[error("{phase} timed out after {seconds}s")]
    Timeout { phase: &'static str, seconds: u64 },

    #[error("authentication failed for user {user}")]
    AuthenticationFailed { user: String },

    #[error("server host key {fingerprint} did not match the pinned fingerprint")]
    HostKeyRejected { fingerprint: String },

    #[error("{}", .0.display())]
    MissingLocalFile(PathBuf),

    #[error("upload of {local} -> {remote} failed: {reason}")]
    Transfer {
        local: String,
        remote: String,
        reason: String,
    },

    #[error("failed to read output of `{command}`: {reason}")]
    StreamRead { command: String, reason: String },

    #[error("ssh channel error: {0}")]
    Channel(#[from] russh::Error),

    #[error("sftp error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Stable short name used in attempt reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "MissingCredentials",
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::Connect { .. } => "ConnectFailure",
            Self::Timeout { .. } => "Timeout",
            Self::AuthenticationFailed { .. } => "AuthenticationFailed",
            Self::HostKeyRejected { .. } => "HostKeyRejected",
            Self::MissingLocalFile(_) => "MissingLocalFile",
            Self::Transfer { .. } | Self::Sftp(_) => "TransferFailure",
            Self::StreamRead { .. } => "StreamReadFailure",
            Self::Channel(_) => "ChannelFailure",
            Self::Io(_) => "IoError",
        }
    }

    /// Process exit code for errors that end the program on their own.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingCredentials | Self::InvalidConfig(_) => 2,
            _ => 1,
        }
    }
}
