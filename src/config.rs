//! Run configuration.
//!
//! Every field has a documented default; the defaults only seed the
//! interactive prompts. A JSON file named by `SSH_HARDEN_CONFIG` may
//! override any subset of them. There is no default password.

use crate::error::{HardenError, Result};
use crate::ssh::{ConnectOptions, HostTarget};
use crate::sshd::SshdConfigFile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional JSON defaults file.
pub const CONFIG_ENV: &str = "SSH_HARDEN_CONFIG";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardenConfig {
    /// Alias written to the local client config (`Host <alias>`).
    pub alias: String,
    /// Address of the remote host.
    pub host: String,
    pub port: u16,
    /// Login user on the remote host.
    pub user: String,
    /// File name of the key pair under `ssh_dir`.
    pub key_name: String,
    /// Local ssh directory holding keys, `config` and `known_hosts`.
    pub ssh_dir: PathBuf,
    pub connect_timeout_secs: u64,
    pub banner_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Remote sshd configuration file.
    pub sshd_config_path: String,
    /// Remote sshd drop-in directory, emptied when password login is disabled.
    pub sshd_drop_in_dir: String,
    /// `ssh-keygen -a` work factor.
    pub kdf_rounds: u32,
}

impl Default for HardenConfig {
    fn default() -> Self {
        Self {
            alias: "vps".to_string(),
            host: "1.1.1.1".to_string(),
            port: 22,
            user: "admin".to_string(),
            key_name: "id_ed25519".to_string(),
            ssh_dir: default_ssh_dir(),
            connect_timeout_secs: 30,
            banner_timeout_secs: 60,
            command_timeout_secs: 60,
            sshd_config_path: "/etc/ssh/sshd_config".to_string(),
            sshd_drop_in_dir: "/etc/ssh/sshd_config.d".to_string(),
            kdf_rounds: 200,
        }
    }
}

fn default_ssh_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ssh")
}

impl HardenConfig {
    /// Load defaults from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|e| HardenError::local_io(path, e))?;
        serde_json::from_str(&text).map_err(|e| HardenError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Built-in defaults, overridden by the file in `SSH_HARDEN_CONFIG` if set.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => {
                let path = PathBuf::from(path);
                log::debug!("Loading defaults from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Reject values that cannot be used as typed.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("alias", validate_alias(&self.alias)),
            ("host", validate_token(&self.host)),
            ("user", validate_token(&self.user)),
            ("key_name", validate_key_name(&self.key_name)),
        ];
        for (field, check) in checks {
            if let Err(message) = check {
                return Err(HardenError::Config {
                    path: PathBuf::from(field),
                    message,
                });
            }
        }
        Ok(())
    }

    pub fn target(&self) -> HostTarget {
        HostTarget::new(self.host.clone(), self.port, self.user.clone())
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.ssh_dir.join(&self.key_name)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.ssh_dir.join(format!("{}.pub", self.key_name))
    }

    pub fn client_config_path(&self) -> PathBuf {
        self.ssh_dir.join("config")
    }

    pub fn known_hosts_path(&self) -> PathBuf {
        self.ssh_dir.join("known_hosts")
    }

    pub fn sshd_config(&self) -> SshdConfigFile {
        SshdConfigFile::new(&self.sshd_config_path, &self.sshd_drop_in_dir)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            banner_timeout: Duration::from_secs(self.banner_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            known_hosts: self.known_hosts_path(),
        }
    }
}

/// A single non-empty token without whitespace.
pub fn validate_token(value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        return Err("must not be empty".to_string());
    }
    if value.chars().any(char::is_whitespace) {
        return Err("must not contain whitespace".to_string());
    }
    Ok(())
}

/// A `Host` alias: one token, and not a wildcard pattern.
pub fn validate_alias(alias: &str) -> std::result::Result<(), String> {
    validate_token(alias)?;
    if alias.contains(['*', '?', '!']) {
        return Err("must not contain pattern characters".to_string());
    }
    Ok(())
}

/// A plain file name inside the ssh directory.
pub fn validate_key_name(name: &str) -> std::result::Result<(), String> {
    validate_token(name)?;
    if name.contains('/') || name.starts_with('.') {
        return Err("must be a plain file name".to_string());
    }
    if name.ends_with(".pub") {
        return Err("name the private key, not the .pub file".to_string());
    }
    Ok(())
}
