//! Local key material.
//!
//! Key pairs are produced by the external `ssh-keygen` utility and are
//! write-once: an existing private key is never regenerated.

use crate::error::{HardenError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub const SSH_DIR_MODE: u32 = 0o700;
pub const PRIVATE_KEY_MODE: u32 = 0o600;
pub const PUBLIC_KEY_MODE: u32 = 0o644;

/// Produces key pairs. Generation succeeds or fails as a whole.
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Write a new pair to `private_key` and `<private_key>.pub`.
    async fn generate(&self, private_key: &Path) -> Result<()>;

    /// Recompute the public key line from an existing private key.
    async fn derive_public(&self, private_key: &Path) -> Result<String>;
}

/// `ssh-keygen` with an ed25519 key, strengthened KDF and empty passphrase.
#[derive(Clone, Debug)]
pub struct SshKeygen {
    program: String,
    kdf_rounds: u32,
}

impl SshKeygen {
    pub fn new(kdf_rounds: u32) -> Self {
        Self {
            program: "ssh-keygen".to_string(),
            kdf_rounds,
        }
    }

    pub fn generate_args(&self, private_key: &Path) -> Vec<String> {
        vec![
            "-t".to_string(),
            "ed25519".to_string(),
            "-a".to_string(),
            self.kdf_rounds.to_string(),
            "-f".to_string(),
            private_key.display().to_string(),
            "-N".to_string(),
            String::new(),
            "-q".to_string(),
        ]
    }

    async fn invoke(&self, args: &[String]) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| HardenError::ExternalTool {
                tool: self.program.clone(),
                message: format!("could not start: {}", e),
            })?;

        if !output.status.success() {
            return Err(HardenError::ExternalTool {
                tool: self.program.clone(),
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl KeyGenerator for SshKeygen {
    async fn generate(&self, private_key: &Path) -> Result<()> {
        self.invoke(&self.generate_args(private_key)).await?;
        Ok(())
    }

    async fn derive_public(&self, private_key: &Path) -> Result<String> {
        let args = ["-y".to_string(), "-f".to_string(), private_key.display().to_string()];
        let stdout = self.invoke(&args).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyStatus {
    Generated,
    Existing,
}

/// A key pair on the local disk: `<dir>/<name>` and `<dir>/<name>.pub`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalKey {
    private_key: PathBuf,
    public_key: PathBuf,
}

impl LocalKey {
    pub fn new(private_key: impl Into<PathBuf>) -> Self {
        let private_key = private_key.into();
        let mut public_key = private_key.clone().into_os_string();
        public_key.push(".pub");
        Self {
            private_key,
            public_key: PathBuf::from(public_key),
        }
    }

    pub fn private_key(&self) -> &Path {
        &self.private_key
    }

    pub fn public_key(&self) -> &Path {
        &self.public_key
    }

    /// Make sure the pair exists with safe permissions, generating it only
    /// when no private key is present.
    pub async fn ensure<G: KeyGenerator + ?Sized>(&self, generator: &G) -> Result<KeyStatus> {
        if let Some(dir) = self.private_key.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| HardenError::local_io(dir, e))?;
            }
            ensure_mode(dir, SSH_DIR_MODE)?;
        }

        let status = if self.private_key.exists() {
            log::info!(
                "SSH key {} already exists, skipping key generation",
                self.private_key.display()
            );
            if !self.public_key.exists() {
                log::warn!(
                    "{} missing, deriving it from the private key",
                    self.public_key.display()
                );
                let line = generator.derive_public(&self.private_key).await?;
                std::fs::write(&self.public_key, line)
                    .map_err(|e| HardenError::local_io(&self.public_key, e))?;
            }
            KeyStatus::Existing
        } else {
            generator.generate(&self.private_key).await?;
            log::info!("Generated {}", self.private_key.display());
            KeyStatus::Generated
        };

        ensure_mode(&self.private_key, PRIVATE_KEY_MODE)?;
        ensure_mode(&self.public_key, PUBLIC_KEY_MODE)?;
        Ok(status)
    }

    /// The public key line, without trailing whitespace.
    pub fn public_key_line(&self) -> Result<String> {
        std::fs::read_to_string(&self.public_key)
            .map(|text| text.trim().to_string())
            .map_err(|e| HardenError::local_io(&self.public_key, e))
    }
}

/// Set `path` to `mode` if it exists and differs.
#[cfg(unix)]
pub fn ensure_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return Ok(());
    };
    if metadata.permissions().mode() & 0o777 != mode {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| HardenError::local_io(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn ensure_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
