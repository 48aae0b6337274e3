//! The connect / upload / execute engine shared by both binaries.

use crate::commands::Transfer;
use crate::config::{RetryPolicy, RunConfig};
use crate::error::RunnerError;
use crate::output::Reporter;
use crate::ssh::ConnectionParams;
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;

/// Exit code and captured output of one remote command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: u32,
    pub stdout: String,
    pub stderr: String,
}

/// A file-transfer channel opened on a session.
#[async_trait]
pub trait TransferChannel: Send {
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RunnerError>;
    async fn close(&mut self) -> Result<(), RunnerError>;
}

/// An authenticated session able to transfer files and run commands.
#[async_trait]
pub trait RemoteSession: Send {
    type Transfer: TransferChannel;

    async fn open_transfer(&mut self) -> Result<Self::Transfer, RunnerError>;
    async fn exec(&mut self, command: &str) -> Result<ExecutionResult, RunnerError>;
    async fn close(&mut self) -> Result<(), RunnerError>;
}

/// Opens sessions. One call is one connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: RemoteSession;

    async fn connect(&self, params: &ConnectionParams) -> Result<Self::Session, RunnerError>;
}

/// How a command sequence ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    CommandFailed { command: String, exit_code: u32 },
}

impl RunOutcome {
    pub fn exit_code(&self) -> u32 {
        match self {
            Self::Completed => 0,
            Self::CommandFailed { exit_code, .. } => *exit_code,
        }
    }

    /// Exit code for the local process. Codes above 255 become 255.
    pub fn process_exit_code(&self) -> u8 {
        u8::try_from(self.exit_code()).unwrap_or(u8::MAX)
    }
}

pub struct Runner<C, W: Write> {
    connector: C,
    reporter: Reporter<W>,
}

impl<C: Connector, W: Write> Runner<C, W> {
    pub fn new(connector: C, reporter: Reporter<W>) -> Self {
        Self {
            connector,
            reporter,
        }
    }

    pub fn reporter(&mut self) -> &mut Reporter<W> {
        &mut self.reporter
    }

    pub fn into_reporter(self) -> Reporter<W> {
        self.reporter
    }

    /// Connect, upload, run, disconnect.
    pub async fn run(&mut self, config: &RunConfig) -> Result<RunOutcome, RunnerError> {
        let session = self.connect_with_retry(&config.params, &config.retry).await?;
        self.execute(session, &config.transfers, &config.commands)
            .await
    }

    /// Try to connect up to `retry.attempts()` times.
    ///
    /// Every failure except the last is reported and followed by the retry
    /// delay. The last failure is returned as is.
    pub async fn connect_with_retry(
        &mut self,
        params: &ConnectionParams,
        retry: &RetryPolicy,
    ) -> Result<C::Session, RunnerError> {
        let mut attempt = 1;
        loop {
            match self.connector.connect(params).await {
                Ok(session) => return Ok(session),
                Err(err) if attempt >= retry.attempts() => return Err(err),
                Err(err) => {
                    log::debug!("connect attempt {} to {} failed: {:?}", attempt, params.addr(), err);
                    self.reporter.connect_failed(attempt, &err)?;
                    tokio::time::sleep(retry.delay()).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Upload then run commands on `session`, closing it on every path.
    pub async fn execute(
        &mut self,
        mut session: C::Session,
        transfers: &[Transfer],
        commands: &[String],
    ) -> Result<RunOutcome, RunnerError> {
        let outcome = self.drive(&mut session, transfers, commands).await;
        if let Err(e) = session.close().await {
            log::error!("SSH disconnect error: {}", e);
        }
        outcome
    }

    async fn drive(
        &mut self,
        session: &mut C::Session,
        transfers: &[Transfer],
        commands: &[String],
    ) -> Result<RunOutcome, RunnerError> {
        self.upload_all(session, transfers).await?;
        self.run_commands(session, commands).await
    }

    /// Upload every transfer over one channel, stopping at the first error.
    ///
    /// No channel is opened when there is nothing to upload. The channel is
    /// closed even when an upload fails.
    pub async fn upload_all(
        &mut self,
        session: &mut C::Session,
        transfers: &[Transfer],
    ) -> Result<(), RunnerError> {
        if transfers.is_empty() {
            return Ok(());
        }

        let mut channel = session.open_transfer().await?;
        let uploaded = self.upload_each(&mut channel, transfers).await;
        let closed = channel.close().await;
        uploaded?;
        closed
    }

    async fn upload_each(
        &mut self,
        channel: &mut <C::Session as RemoteSession>::Transfer,
        transfers: &[Transfer],
    ) -> Result<(), RunnerError> {
        for transfer in transfers {
            if !transfer.local.exists() {
                return Err(RunnerError::MissingLocalFile(transfer.local.clone()));
            }
            channel.upload(&transfer.local, &transfer.remote).await?;
            self.reporter.uploaded(&transfer.local, &transfer.remote)?;
        }
        Ok(())
    }

    /// Run commands in order until one exits non-zero.
    pub async fn run_commands(
        &mut self,
        session: &mut C::Session,
        commands: &[String],
    ) -> Result<RunOutcome, RunnerError> {
        for command in commands {
            let result = session.exec(command).await?;
            self.reporter.command_finished(command, &result)?;
            if result.exit_code != 0 {
                return Ok(RunOutcome::CommandFailed {
                    command: command.clone(),
                    exit_code: result.exit_code,
                });
            }
        }
        Ok(RunOutcome::Completed)
    }
}

/// Scripted stand-ins for an SSH server.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    pub type Events = Arc<Mutex<Vec<String>>>;

    /// Fails the first `failures` connects, then hands out sessions.
    ///
    /// Commands named `exit N` exit with N, `false` exits 1, everything
    /// else exits 0 and echoes itself to stdout.
    pub struct FakeConnector {
        pub events: Events,
        failures: Mutex<VecDeque<RunnerError>>,
        /// Commands that make the session's exec call error out.
        pub broken_commands: Vec<String>,
    }

    impl FakeConnector {
        pub fn new() -> Self {
            Self::failing(0)
        }

        pub fn failing(failures: usize) -> Self {
            Self {
                events: Arc::new(Mutex::new(Vec::new())),
                failures: Mutex::new(
                    (0..failures)
                        .map(|_| RunnerError::Timeout {
                            phase: "connect",
                            seconds: 10,
                        })
                        .collect(),
                ),
                broken_commands: Vec::new(),
            }
        }

        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        pub fn count(&self, event: &str) -> usize {
            self.events().iter().filter(|e| e.as_str() == event).count()
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Session = FakeSession;

        async fn connect(&self, _params: &ConnectionParams) -> Result<FakeSession, RunnerError> {
            self.events.lock().unwrap().push("connect".to_string());
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(FakeSession {
                events: Arc::clone(&self.events),
                broken_commands: self.broken_commands.clone(),
            })
        }
    }

    pub struct FakeSession {
        events: Events,
        broken_commands: Vec<String>,
    }

    #[async_trait]
    impl RemoteSession for FakeSession {
        type Transfer = FakeTransfer;

        async fn open_transfer(&mut self) -> Result<FakeTransfer, RunnerError> {
            self.events.lock().unwrap().push("open_transfer".to_string());
            Ok(FakeTransfer {
                events: Arc::clone(&self.events),
            })
        }

        async fn exec(&mut self, command: &str) -> Result<ExecutionResult, RunnerError> {
            self.events.lock().unwrap().push(format!("exec {}", command));
            if self.broken_commands.iter().any(|c| c == command) {
                return Err(RunnerError::StreamRead {
                    command: command.to_string(),
                    reason: "channel closed".to_string(),
                });
            }
            let exit_code = match command {
                "false" => 1,
                _ => command
                    .strip_prefix("exit ")
                    .and_then(|code| code.parse().ok())
                    .unwrap_or(0),
            };
            Ok(ExecutionResult {
                exit_code,
                stdout: format!("ran {}", command),
                stderr: String::new(),
            })
        }

        async fn close(&mut self) -> Result<(), RunnerError> {
            self.events.lock().unwrap().push("close".to_string());
            Ok(())
        }
    }

    pub struct FakeTransfer {
        events: Events,
    }

    #[async_trait]
    impl TransferChannel for FakeTransfer {
        async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RunnerError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("upload {} {}", local.display(), remote));
            Ok(())
        }

        async fn close(&mut self) -> Result<(), RunnerError> {
            self.events.lock().unwrap().push("close_transfer".to_string());
            Ok(())
        }
    }
}
