use crate::commands::Transfer;
use clap::Parser;
use std::path::PathBuf;

/// Run remote SSH commands and optional uploads.
///
/// Connection flags fall back to REMOTE_HOST, REMOTE_PORT, REMOTE_USER and
/// REMOTE_PASSWORD when omitted.
#[derive(Debug, Clone, Parser)]
#[command(name = "remote-exec", version)]
pub struct Args {
    /// Remote host name or address
    #[arg(long)]
    pub host: Option<String>,

    /// SSH port [default: 22]
    #[arg(long)]
    pub port: Option<u16>,

    /// Remote user [default: root]
    #[arg(long)]
    pub user: Option<String>,

    /// Password for password authentication
    #[arg(long)]
    pub password: Option<String>,

    /// Upload a file before running commands, as local=remote (repeatable)
    #[arg(long, value_name = "LOCAL=REMOTE")]
    pub upload: Vec<Transfer>,

    /// Command to run (repeatable, runs before --cmd-file commands)
    #[arg(long)]
    pub cmd: Vec<String>,

    /// File with one command per line; blank lines and # comments are skipped (repeatable)
    #[arg(long, value_name = "PATH")]
    pub cmd_file: Vec<PathBuf>,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 20)]
    pub timeout: u64,

    /// Connection attempts before giving up (minimum 1)
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub retries: i64,

    /// Seconds between connection attempts (minimum 1)
    #[arg(long, default_value_t = 3, allow_negative_numbers = true)]
    pub retry_delay: i64,

    /// Only accept a server key with this SHA-256 fingerprint (SHA256:...)
    #[arg(long)]
    pub host_key_fingerprint: Option<String>,
}
