//! Disabling password login.
//!
//! Only reachable with a [`KeyVerified`] token, so it cannot run before key
//! login has been shown to work in the same run. Success means the server
//! was observed rejecting the password afterwards.

use crate::error::{HardenError, Result};
use crate::provision::KeyVerified;
use crate::ssh::{release, Connector, Credential, RemoteSession};
use crate::sshd::SshdConfigFile;
use secrecy::SecretString;

/// Whether the password lockdown applies to this login user.
///
/// `root` keeps password login; it is expected to be restricted through
/// `PermitRootLogin` instead.
pub fn applies_to(user: &str) -> bool {
    user != "root"
}

pub async fn disable_password_auth<C: Connector>(
    connector: &C,
    verified: &KeyVerified,
    password: &SecretString,
    sshd: &SshdConfigFile,
) -> Result<()> {
    let target = verified.target();
    let key = Credential::key_file(verified.private_key());

    let mut session = connector.connect(target, &key).await?;
    let locked = lock_down(&mut session, password, sshd).await;
    release(&mut session, locked).await?;

    match connector
        .connect(target, &Credential::Password(password.clone()))
        .await
    {
        Ok(mut session) => {
            let _ = release(&mut session, Ok(())).await;
            log::error!("{} still accepts password login after reload", target);
            Err(HardenError::Verification(format!(
                "{} still accepts password login",
                target
            )))
        }
        Err(e) if e.is_authentication() => {
            log::info!("Password login to {} is now rejected", target);
            Ok(())
        }
        Err(e) => Err(HardenError::Verification(format!(
            "could not confirm password login is refused by {}: {}",
            target, e
        ))),
    }
}

async fn lock_down<S: RemoteSession + ?Sized>(
    session: &mut S,
    password: &SecretString,
    sshd: &SshdConfigFile,
) -> Result<()> {
    sshd.backup(session, password).await?;
    sshd.patch_directive(session, password, "PasswordAuthentication", "no")
        .await?;
    sshd.remove_drop_ins(session, password).await?;
    sshd.reload(session, password).await
}
