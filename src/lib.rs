//! remote-exec: run command sequences on a remote host over SSH.
//!
//! Provides connection retry, SFTP uploads, fail-fast command execution and
//! a manifest-driven recovery loop, shared by the `remote-exec` and
//! `remote-recover` binaries.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod recovery;
pub mod runner;
pub mod ssh;
