pub mod command;
pub mod session;
pub mod sftp;

use crate::error::{HardenError, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use command::RemoteCommand;
pub use session::{SshConnector, SshSession};

/// The remote host a run operates on. Fixed for the whole run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl HostTarget {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
        }
    }

    /// `host:port`, used in diagnostics.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// The single credential used to authenticate one connection.
#[derive(Clone, Debug)]
pub enum Credential {
    Password(SecretString),
    /// Unencrypted private key; the public half lives at `<path>.pub`.
    KeyFile(PathBuf),
}

impl Credential {
    pub fn key_file(path: impl AsRef<Path>) -> Self {
        Credential::KeyFile(path.as_ref().to_path_buf())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::KeyFile(_) => "key",
        }
    }
}

/// Timeouts and host-key storage for new connections.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// TCP connect.
    pub connect_timeout: Duration,
    /// Server banner and key exchange.
    pub banner_timeout: Duration,
    /// One remote command round trip.
    pub command_timeout: Duration,
    /// Accept-and-remember store for server host keys.
    pub known_hosts: PathBuf,
}

/// Collected result of one remote command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_status: u32,
}

impl CommandOutput {
    pub fn from_bytes(stdout: &[u8], stderr: &[u8], exit_status: u32) -> Self {
        Self {
            stdout: split_lines(stdout),
            stderr: split_lines(stderr),
            exit_status,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }

    /// Turn a non-zero exit of an unprivileged command into an error.
    pub fn check(self, command: &RemoteCommand) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(HardenError::CommandFailed {
            command: command.to_shell(),
            status: self.exit_status,
            stderr: self.stderr_text(),
        })
    }

    /// Like [`check`](Self::check), but a rejected sudo secret becomes
    /// an elevation error.
    pub fn check_privileged(self, command: &RemoteCommand) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let stderr = self.stderr_text();
        if command::contains_sudo_failure(&stderr) {
            return Err(HardenError::Elevation {
                command: command.to_shell(),
                message: stderr,
            });
        }
        self.check(command)
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

/// One authenticated session bound to a single transport connection.
///
/// Each `run*` call is an independent command invocation; no working
/// directory or environment survives between calls. Relative remote paths
/// resolve against the login user's home directory.
#[async_trait]
pub trait RemoteSession: Send {
    async fn run(&mut self, command: &RemoteCommand) -> Result<CommandOutput>;

    /// Run `command` through `sudo`, feeding `password` on stdin.
    async fn run_privileged(
        &mut self,
        command: &RemoteCommand,
        password: &SecretString,
    ) -> Result<CommandOutput>;

    async fn put_file(&mut self, local_path: &Path, remote_path: &str) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens sessions. Authentication and network failures are distinct
/// error kinds and are returned immediately, never retried.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: RemoteSession;

    async fn connect(&self, target: &HostTarget, credential: &Credential) -> Result<Self::Session>;
}

/// Close `session` and hand back `result` unchanged.
///
/// Close failures are logged, never propagated, so every exit path
/// releases the transport without masking the primary outcome.
pub async fn release<S: RemoteSession + ?Sized, T>(session: &mut S, result: Result<T>) -> Result<T> {
    if let Err(e) = session.close().await {
        log::warn!("Failed to close SSH session cleanly: {}", e);
    }
    result
}
