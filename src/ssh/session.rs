use super::sftp::SftpClient;
use super::{ConnectionParams, HostKeyPolicy};
use crate::error::RunnerError;
use crate::runner::{ExecutionResult, RemoteSession};
use async_trait::async_trait;
use russh::keys::ssh_key::{HashAlg, PublicKey};
use russh::*;
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Exit code reported when a channel closes without sending an exit status.
pub const MISSING_EXIT_STATUS: u32 = 255;

/// One authenticated SSH connection.
pub struct SshSession {
    params: ConnectionParams,
    handle: Option<client::Handle<SshHandler>>,
}

/// Client handler enforcing the configured host key policy.
struct SshHandler {
    policy: HostKeyPolicy,
    /// Fingerprint of a rejected key, read back after the handshake fails.
    rejected: Arc<Mutex<Option<String>>>,
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                log::warn!("Accepting server key {} without verification", fingerprint);
                Ok(true)
            }
            HostKeyPolicy::Pinned(expected) if *expected == fingerprint => Ok(true),
            HostKeyPolicy::Pinned(_) => {
                if let Ok(mut slot) = self.rejected.lock() {
                    *slot = Some(fingerprint);
                }
                Ok(false)
            }
        }
    }
}

impl SshSession {
    /// Connect and authenticate with the password in `params`.
    ///
    /// The TCP connect is bounded by the connect timeout. The server banner,
    /// key exchange and authentication each get the auth timeout, which is
    /// never shorter. The SSH agent and local keys are never used.
    pub async fn connect(params: ConnectionParams) -> Result<Self, RunnerError> {
        let stream = open_tcp(&params).await?;

        let rejected = Arc::new(Mutex::new(None));
        let handler = SshHandler {
            policy: params.host_key.clone(),
            rejected: Arc::clone(&rejected),
        };
        let config = Arc::new(client::Config::default());

        let handshake = client::connect_stream(config, stream, handler);
        let mut handle = match timeout(params.auth_timeout(), handshake).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(source)) => {
                let pinned_mismatch = rejected.lock().ok().and_then(|mut slot| slot.take());
                return Err(match pinned_mismatch {
                    Some(fingerprint) => RunnerError::HostKeyRejected { fingerprint },
                    None => RunnerError::Connect {
                        addr: params.addr(),
                        source,
                    },
                });
            }
            Err(_) => {
                return Err(RunnerError::Timeout {
                    phase: "handshake",
                    seconds: params.auth_timeout().as_secs(),
                })
            }
        };

        let authenticating = handle.authenticate_password(
            params.username.clone(),
            params.password().expose_secret().clone(),
        );
        let result = match timeout(params.auth_timeout(), authenticating).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RunnerError::Timeout {
                    phase: "authentication",
                    seconds: params.auth_timeout().as_secs(),
                })
            }
        };

        match result {
            client::AuthResult::Success => {}
            client::AuthResult::Failure { .. } => {
                return Err(RunnerError::AuthenticationFailed {
                    user: params.username.clone(),
                });
            }
        }

        log::info!("SSH connected to {}", params.addr());
        Ok(Self {
            params,
            handle: Some(handle),
        })
    }

    fn handle(&self) -> Result<&client::Handle<SshHandler>, RunnerError> {
        self.handle
            .as_ref()
            .ok_or_else(|| RunnerError::Channel(russh::Error::Disconnect))
    }
}

/// Open the TCP stream under the connect timeout.
async fn open_tcp(params: &ConnectionParams) -> Result<TcpStream, RunnerError> {
    let connecting = TcpStream::connect((params.host.as_str(), params.port));
    match timeout(params.connect_timeout(), connecting).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(RunnerError::Connect {
            addr: params.addr(),
            source: e.into(),
        }),
        Err(_) => Err(RunnerError::Timeout {
            phase: "connect",
            seconds: params.connect_timeout().as_secs(),
        }),
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    type Transfer = SftpClient;

    async fn open_transfer(&mut self) -> Result<SftpClient, RunnerError> {
        let channel = self.handle()?.channel_open_session().await?;
        let mut sftp = SftpClient::new();
        sftp.init(channel).await?;
        Ok(sftp)
    }

    /// Run `command` on a PTY channel and drain it until the server closes it.
    async fn exec(&mut self, command: &str) -> Result<ExecutionResult, RunnerError> {
        let stream_error = |e: russh::Error| RunnerError::StreamRead {
            command: command.to_string(),
            reason: e.to_string(),
        };

        log::debug!("exec on {}: {}", self.params.addr(), command);
        let mut channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(stream_error)?;
        channel
            .request_pty(false, "xterm", 80, 24, 0, 0, &[])
            .await
            .map_err(stream_error)?;
        channel.exec(true, command).await.map_err(stream_error)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        // ExitStatus may arrive before or after Eof, so read until the channel is gone.
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        let exit_code = exit_status.unwrap_or_else(|| {
            log::warn!("No exit status received for `{}`", command);
            MISSING_EXIT_STATUS
        });

        Ok(ExecutionResult {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    /// Disconnect the SSH session. Safe to call more than once.
    async fn close(&mut self) -> Result<(), RunnerError> {
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await?;
            log::info!("SSH disconnected from {}", self.params.addr());
        }
        Ok(())
    }
}
