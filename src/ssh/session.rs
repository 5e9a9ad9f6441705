use super::sftp::SftpClient;
use super::{CommandOutput, ConnectOptions, Connector, Credential, HostTarget, RemoteCommand, RemoteSession};
use crate::error::{HardenError, Result};
use async_trait::async_trait;
use russh::client;
use russh::keys::{load_secret_key, HashAlg, PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelMsg, Disconnect};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use zeroize::Zeroizing;

/// Opens russh sessions with bounded handshakes.
#[derive(Clone, Debug)]
pub struct SshConnector {
    options: ConnectOptions,
}

impl SshConnector {
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, target: &HostTarget, credential: &Credential) -> Result<SshSession> {
        let failed = |message: String| HardenError::Connection {
            target: target.address(),
            message,
        };

        // A bad key file is a local problem; report it before touching the network.
        let secret = match credential {
            Credential::Password(password) => LoginSecret::Password(password),
            Credential::KeyFile(path) => LoginSecret::Key(load_key(path)?),
        };

        let stream = tokio::time::timeout(
            self.options.connect_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        .map_err(|_| failed(format!("no answer within {:?}", self.options.connect_timeout)))?
        .map_err(|e| failed(e.to_string()))?;

        let handler = HostKeyPolicy {
            host: target.host.clone(),
            port: target.port,
            known_hosts: self.options.known_hosts.clone(),
        };

        let mut handle = tokio::time::timeout(
            self.options.banner_timeout,
            client::connect_stream(Arc::new(client::Config::default()), stream, handler),
        )
        .await
        .map_err(|_| failed(format!("handshake not completed within {:?}", self.options.banner_timeout)))?
        .map_err(|e| failed(e.to_string()))?;

        let result = match secret {
            LoginSecret::Password(password) => {
                handle
                    .authenticate_password(&target.user, password.expose_secret())
                    .await
            }
            LoginSecret::Key(key_pair) => {
                let rsa_hash = if key_pair.algorithm().is_rsa() {
                    handle
                        .best_supported_rsa_hash()
                        .await
                        .map_err(|e| failed(e.to_string()))?
                } else {
                    None
                };
                handle
                    .authenticate_publickey(&target.user, signing_key(key_pair, rsa_hash))
                    .await
            }
        }
        .map_err(|e| failed(e.to_string()))?;

        if !result.success() {
            log::info!("{} login as {} rejected", credential.kind(), target);
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(HardenError::Authentication {
                user: target.user.clone(),
                target: target.address(),
            });
        }

        log::info!("SSH connected to {} using {}", target, credential.kind());
        Ok(SshSession {
            handle: Some(handle),
            command_timeout: self.options.command_timeout,
        })
    }
}

enum LoginSecret<'a> {
    Password(&'a SecretString),
    Key(Arc<PrivateKey>),
}

fn load_key(path: &Path) -> Result<Arc<PrivateKey>> {
    load_secret_key(path, None).map(Arc::new).map_err(|e| {
        HardenError::local_io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
        )
    })
}

/// Pair the key with the signature hash the server asked for. RSA keys
/// otherwise sign with SHA-1, which current OpenSSH refuses.
fn signing_key(key: Arc<PrivateKey>, rsa_hash: Option<Option<HashAlg>>) -> PrivateKeyWithHashAlg {
    PrivateKeyWithHashAlg::new(key, rsa_hash.flatten())
}

/// Accept-and-remember host key policy.
///
/// Known keys are accepted, unknown hosts are trusted and appended to the
/// known-hosts file, a changed key is refused.
struct HostKeyPolicy {
    host: String,
    port: u16,
    known_hosts: PathBuf,
}

impl client::Handler for HostKeyPolicy {
    type Error = HardenError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match russh::keys::check_known_hosts_path(
            &self.host,
            self.port,
            server_public_key,
            &self.known_hosts,
        ) {
            Ok(true) => Ok(true),
            Ok(false) => {
                log::warn!(
                    "Trusting new host key for {}:{} and recording it in {}",
                    self.host,
                    self.port,
                    self.known_hosts.display()
                );
                if let Err(e) = russh::keys::known_hosts::learn_known_hosts_path(
                    &self.host,
                    self.port,
                    server_public_key,
                    &self.known_hosts,
                ) {
                    log::warn!("Could not record host key: {}", e);
                }
                Ok(true)
            }
            Err(russh::keys::Error::KeyChanged { line }) => {
                log::error!(
                    "Host key for {}:{} differs from {} line {}; refusing to connect",
                    self.host,
                    self.port,
                    self.known_hosts.display(),
                    line
                );
                Ok(false)
            }
            Err(e) => {
                log::error!("Cannot read {}: {}", self.known_hosts.display(), e);
                Ok(false)
            }
        }
    }
}

/// A live russh session. Each command runs on its own exec channel.
pub struct SshSession {
    handle: Option<client::Handle<HostKeyPolicy>>,
    command_timeout: Duration,
}

impl SshSession {
    fn handle(&self) -> Result<&client::Handle<HostKeyPolicy>> {
        self.handle.as_ref().ok_or_else(|| HardenError::Connection {
            target: "session".to_string(),
            message: "not connected".to_string(),
        })
    }

    async fn exec(&self, command: &RemoteCommand, stdin: Option<&[u8]>) -> Result<CommandOutput> {
        let handle = self.handle()?;
        let line = command.to_shell();
        log::debug!("exec: {}", line);

        let round_trip = async {
            let mut channel = handle.channel_open_session().await?;
            channel.exec(true, line.as_str()).await?;
            // The secret must be on the wire before any output is read.
            if let Some(input) = stdin {
                channel.data(input).await?;
            }
            channel.eof().await?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_status = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                    ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                        stderr.extend_from_slice(data)
                    }
                    // Data may still follow the exit status.
                    ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                    _ => {}
                }
            }
            Ok::<_, HardenError>((stdout, stderr, exit_status))
        };

        let (stdout, stderr, exit_status) = tokio::time::timeout(self.command_timeout, round_trip)
            .await
            .map_err(|_| HardenError::Connection {
                target: "session".to_string(),
                message: format!("`{}` did not finish within {:?}", line, self.command_timeout),
            })??;

        let exit_status = exit_status.ok_or_else(|| HardenError::Connection {
            target: "session".to_string(),
            message: format!("`{}` closed without an exit status", line),
        })?;
        Ok(CommandOutput::from_bytes(&stdout, &stderr, exit_status))
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&mut self, command: &RemoteCommand) -> Result<CommandOutput> {
        self.exec(command, None).await
    }

    async fn run_privileged(
        &mut self,
        command: &RemoteCommand,
        password: &SecretString,
    ) -> Result<CommandOutput> {
        let mut secret = Zeroizing::new(password.expose_secret().as_bytes().to_vec());
        secret.push(b'\n');
        self.exec(&command.privileged(), Some(secret.as_slice())).await
    }

    async fn put_file(&mut self, local_path: &Path, remote_path: &str) -> Result<()> {
        let transfer_err = |message: String| HardenError::Transfer {
            local: local_path.to_path_buf(),
            remote: remote_path.to_string(),
            message,
        };

        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| transfer_err(e.to_string()))?;

        let mut sftp = SftpClient::new();
        sftp.init(channel).await.map_err(|e| transfer_err(e.to_string()))?;
        let uploaded = sftp.upload(local_path, remote_path).await;
        sftp.close().await;
        uploaded.map_err(|e| transfer_err(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await?;
            log::debug!("SSH session closed");
        }
        Ok(())
    }
}
