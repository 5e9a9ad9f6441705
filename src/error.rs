use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while moving a host to key-only login.
#[derive(Error, Debug)]
pub enum HardenError {
    /// Network unreachable, handshake failure, timeout or rejected host key.
    #[error("connection to {target} failed: {message}")]
    Connection { target: String, message: String },

    /// The server rejected the credential.
    #[error("authentication as {user}@{target} rejected")]
    Authentication { user: String, target: String },

    /// `sudo` refused the command or the secret was wrong.
    #[error("privileged command `{command}` rejected: {message}")]
    Elevation { command: String, message: String },

    /// A remote command ran but exited non-zero.
    #[error("remote command `{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: u32,
        stderr: String,
    },

    /// SFTP upload failure.
    #[error("failed to upload {local} to {remote}: {message}")]
    Transfer {
        local: PathBuf,
        remote: String,
        message: String,
    },

    /// The local key generation utility failed.
    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    /// A post-condition check did not hold.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Directive or value that cannot be written into sshd_config safely.
    #[error("cannot patch directive {name}: {reason}")]
    InvalidDirective { name: String, reason: String },

    #[error("{path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid defaults file {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("ssh protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

pub type Result<T> = std::result::Result<T, HardenError>;

impl HardenError {
    pub(crate) fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HardenError::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// True when the server answered but refused the credential.
    pub fn is_authentication(&self) -> bool {
        matches!(self, HardenError::Authentication { .. })
    }
}
