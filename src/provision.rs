//! Key provisioning state machine.
//!
//! Moves a host from password login to verified key login:
//!
//! ```text
//! NoLocalKey -> LocalKeyExists -> UploadedPublicKey
//!            -> InstalledInAuthorizedKeys -> DaemonConfigured -> Verified
//! ```
//!
//! Every step is safe to repeat. If key login already works the run ends
//! right after `LocalKeyExists` without ever using the password. Password
//! login is left untouched here, so a failure at any point still leaves
//! the password as a way back in.

use crate::config::HardenConfig;
use crate::error::{HardenError, Result};
use crate::keys::{KeyGenerator, KeyStatus, LocalKey};
use crate::ssh::{release, Connector, Credential, HostTarget, RemoteCommand, RemoteSession};
use crate::sshd::SshdConfigFile;
use secrecy::SecretString;
use std::fmt;
use std::path::{Path, PathBuf};

/// `$1` staged public key, `$2` authorized_keys. Keeps the file line-terminated.
pub const APPEND_KEY_SCRIPT: &str = r#"if [ -s "$2" ] && [ -n "$(tail -c 1 "$2")" ]; then echo >> "$2"; fi; cat -- "$1" >> "$2""#;

pub const REMOTE_SSH_DIR: &str = ".ssh";
pub const REMOTE_AUTHORIZED_KEYS: &str = ".ssh/authorized_keys";

/// Succeeds only when every line of the staged key is already present
/// as a whole line of `authorized_keys`.
fn key_lookup_command(staged: &str) -> RemoteCommand {
    RemoteCommand::new("grep").args(["-qxF", "-f", staged, REMOTE_AUTHORIZED_KEYS])
}

fn append_key_command(staged: &str) -> RemoteCommand {
    RemoteCommand::script(APPEND_KEY_SCRIPT, [staged, REMOTE_AUTHORIZED_KEYS])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProvisionState {
    NoLocalKey,
    LocalKeyExists,
    UploadedPublicKey,
    InstalledInAuthorizedKeys,
    DaemonConfigured,
    Verified,
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionState::NoLocalKey => "no local key",
            ProvisionState::LocalKeyExists => "local key exists",
            ProvisionState::UploadedPublicKey => "public key uploaded",
            ProvisionState::InstalledInAuthorizedKeys => "installed in authorized_keys",
            ProvisionState::DaemonConfigured => "sshd configured",
            ProvisionState::Verified => "verified",
        };
        f.write_str(name)
    }
}

/// Proof that key login to `target` succeeded during this run.
///
/// Only a successful key-based connection made by [`KeyProvisioning`]
/// produces one, and disabling password login requires it.
#[derive(Debug)]
pub struct KeyVerified {
    target: HostTarget,
    private_key: PathBuf,
}

impl KeyVerified {
    pub fn target(&self) -> &HostTarget {
        &self.target
    }

    pub fn private_key(&self) -> &Path {
        &self.private_key
    }
}

#[derive(Debug)]
pub struct ProvisionOutcome {
    pub state: ProvisionState,
    /// Key login already worked; nothing remote was touched.
    pub already_provisioned: bool,
    pub key_status: KeyStatus,
    pub verified: KeyVerified,
}

pub struct KeyProvisioning<'a, C: Connector, G: KeyGenerator> {
    connector: &'a C,
    keygen: &'a G,
    target: HostTarget,
    password: SecretString,
    key: LocalKey,
    key_name: String,
    sshd: SshdConfigFile,
    state: ProvisionState,
}

impl<'a, C: Connector, G: KeyGenerator> KeyProvisioning<'a, C, G> {
    pub fn new(connector: &'a C, keygen: &'a G, config: &HardenConfig, password: SecretString) -> Self {
        Self {
            connector,
            keygen,
            target: config.target(),
            password,
            key: LocalKey::new(config.private_key_path()),
            key_name: config.key_name.clone(),
            sshd: config.sshd_config(),
            state: ProvisionState::NoLocalKey,
        }
    }

    /// Furthest state reached, also after a failure.
    pub fn state(&self) -> ProvisionState {
        self.state
    }

    fn advance(&mut self, next: ProvisionState) {
        log::info!("{}: {} -> {}", self.target, self.state, next);
        self.state = next;
    }

    fn staged_key_path(&self) -> String {
        format!("{}/{}.pub.upload", REMOTE_SSH_DIR, self.key_name)
    }

    fn verified(&self) -> KeyVerified {
        KeyVerified {
            target: self.target.clone(),
            private_key: self.key.private_key().to_path_buf(),
        }
    }

    /// Try a key login and close it again straight away.
    async fn key_login_works(&self) -> Result<()> {
        let credential = Credential::key_file(self.key.private_key());
        let mut session = self.connector.connect(&self.target, &credential).await?;
        release(&mut session, Ok(())).await
    }

    /// Drive the state machine to `Verified`. The first failing step ends the
    /// run; nothing already done on the remote host is undone.
    pub async fn run(&mut self) -> Result<ProvisionOutcome> {
        let key_status = self.key.ensure(self.keygen).await?;
        self.advance(ProvisionState::LocalKeyExists);

        match self.key_login_works().await {
            Ok(()) => {
                log::info!("Key {} already accepted by {}, skipping", self.key_name, self.target);
                self.advance(ProvisionState::Verified);
                return Ok(ProvisionOutcome {
                    state: self.state,
                    already_provisioned: true,
                    key_status,
                    verified: self.verified(),
                });
            }
            Err(e) => log::info!("Key login not possible yet: {}", e),
        }

        let password = Credential::Password(self.password.clone());
        let mut session = self.connector.connect(&self.target, &password).await?;
        let installed = self.install(&mut session).await;
        release(&mut session, installed).await?;

        self.key_login_works().await.map_err(|e| {
            HardenError::Verification(format!(
                "key login to {} still failing after installation ({}); password login is unchanged",
                self.target, e
            ))
        })?;
        self.advance(ProvisionState::Verified);

        Ok(ProvisionOutcome {
            state: self.state,
            already_provisioned: false,
            key_status,
            verified: self.verified(),
        })
    }

    async fn install(&mut self, session: &mut C::Session) -> Result<()> {
        let mkdir = RemoteCommand::new("mkdir").args(["-p", REMOTE_SSH_DIR]);
        session.run(&mkdir).await?.check(&mkdir)?;

        let staged = self.staged_key_path();
        session.put_file(self.key.public_key(), &staged).await?;
        self.advance(ProvisionState::UploadedPublicKey);

        let lookup = key_lookup_command(&staged);
        if session.run(&lookup).await?.success() {
            log::info!("Public key already in {}", REMOTE_AUTHORIZED_KEYS);
        } else {
            let append = append_key_command(&staged);
            session.run(&append).await?.check(&append)?;
        }

        for (mode, path) in [("700", REMOTE_SSH_DIR), ("600", REMOTE_AUTHORIZED_KEYS)] {
            let chmod = RemoteCommand::new("chmod").args([mode, path]);
            session.run(&chmod).await?.check(&chmod)?;
        }

        let cleanup = RemoteCommand::new("rm").args(["-f", "--", staged.as_str()]);
        if let Err(e) = session.run(&cleanup).await.and_then(|out| out.check(&cleanup)) {
            log::warn!("Could not remove {}: {}", staged, e);
        }
        self.advance(ProvisionState::InstalledInAuthorizedKeys);

        // The backup must hold the config as it was before any edit.
        self.sshd.backup(session, &self.password).await?;
        self.sshd
            .patch_directive(session, &self.password, "PubkeyAuthentication", "yes")
            .await?;
        self.sshd
            .patch_directive(session, &self.password, "AuthorizedKeysFile", REMOTE_AUTHORIZED_KEYS)
            .await?;
        self.sshd.reload(session, &self.password).await?;
        self.advance(ProvisionState::DaemonConfigured);
        Ok(())
    }
}
