use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Uploads replace the remote file: created when missing, truncated when
/// a longer one is already there.
pub fn upload_flags() -> OpenFlags {
    OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE
}

/// SFTP upload wrapper over one session channel.
pub struct SftpClient {
    session: Option<SftpSession>,
}

impl SftpClient {
    pub fn new() -> Self {
        Self { session: None }
    }

    /// Start the SFTP subsystem on an open channel.
    pub async fn init(
        &mut self,
        channel: russh::Channel<russh::client::Msg>,
    ) -> Result<(), anyhow::Error> {
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        self.session = Some(sftp);
        Ok(())
    }

    /// Upload a local file. Relative remote paths resolve against the
    /// login user's home directory.
    pub async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), anyhow::Error> {
        let sftp = self
            .session
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SFTP session not initialized"))?;

        let data = tokio::fs::read(local_path).await?;
        let mut file = sftp.open_with_flags(remote_path, upload_flags()).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        file.shutdown().await?;

        log::info!("Uploaded {} -> {}", local_path.display(), remote_path);
        Ok(())
    }

    /// End the SFTP session. Errors are logged only.
    pub async fn close(&mut self) {
        if let Some(sftp) = self.session.take() {
            if let Err(e) = sftp.close().await {
                log::debug!("SFTP close: {}", e);
            }
        }
    }
}

impl Default for SftpClient {
    fn default() -> Self {
        Self::new()
    }
}
