use crate::error::RunnerError;
use crate::runner::TransferChannel;
use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// SFTP channel used for all uploads of one run.
pub struct SftpClient {
    session: Option<SftpSession>,
}

impl SftpClient {
    pub fn new() -> Self {
        Self { session: None }
    }

    /// Initialize SFTP session from an existing SSH channel.
    pub async fn init(
        &mut self,
        channel: russh::Channel<russh::client::Msg>,
    ) -> Result<(), RunnerError> {
        channel.request_subsystem(false, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        self.session = Some(sftp);
        Ok(())
    }

    /// Fails like a dropped SSH channel when not initialized or already closed.
    fn session(&self) -> Result<&SftpSession, RunnerError> {
        self.session
            .as_ref()
            .ok_or_else(|| RunnerError::Channel(russh::Error::Disconnect))
    }
}

impl Default for SftpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferChannel for SftpClient {
    /// Upload a local file to remote path, creating or truncating it.
    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), RunnerError> {
        let failed = |reason: String| RunnerError::Transfer {
            local: local_path.display().to_string(),
            remote: remote_path.to_string(),
            reason,
        };

        let sftp = self.session()?;
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let mut file = sftp
            .create(remote_path)
            .await
            .map_err(|e| failed(e.to_string()))?;
        file.write_all(&data)
            .await
            .map_err(|e| failed(e.to_string()))?;
        file.shutdown().await.map_err(|e| failed(e.to_string()))?;

        log::info!(
            "Uploaded {} -> {} ({} bytes)",
            local_path.display(),
            remote_path,
            data.len()
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RunnerError> {
        if let Some(sftp) = self.session.take() {
            sftp.close().await?;
        }
        Ok(())
    }
}
