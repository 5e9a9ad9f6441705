//! Remote sshd configuration editing.
//!
//! All edits are idempotent line rewrites run through sudo. The only
//! rollback point is a single `.bak` copy taken before the first edit and
//! never overwritten afterwards.

use crate::error::{HardenError, Result};
use crate::ssh::{RemoteCommand, RemoteSession};
use secrecy::SecretString;

/// `$1` grep pattern, `$2` sed expression, `$3` file, `$4` replacement line.
/// Rewrites matching lines in place. When no match remains in the global
/// section, the line goes in front of the first `Match` block, or at the end
/// of the file when there is none.
pub const PATCH_DIRECTIVE_SCRIPT: &str = r#"m='^[[:space:]]*[Mm][Aa][Tt][Cc][Hh][[:space:]]'; if grep -qE -- "$1" "$3"; then sed -i -E -e "$2" "$3" || exit 1; fi; if sed -n "/$m/q;p" "$3" | grep -qE -- "$1"; then :; elif grep -q -- "$m" "$3"; then LINE="$4" awk -v m="$m" '!d && $0 ~ m { print ENVIRON["LINE"]; d = 1 } { print }' "$3" > "$3.tmp" && cat -- "$3.tmp" > "$3" && rm -f -- "$3.tmp"; else if [ -s "$3" ] && [ -n "$(tail -c 1 "$3")" ]; then echo >> "$3"; fi; printf '%s\n' "$4" >> "$3"; fi"#;

/// `$1` drop-in directory.
pub const REMOVE_DROP_INS_SCRIPT: &str = r#"rm -rf -- "$1"/*"#;

pub const RELOAD_SCRIPT: &str =
    "systemctl reload sshd 2>/dev/null || systemctl reload ssh 2>/dev/null || service ssh reload";

/// Candidate `s` command delimiters, none of which occur in the match pattern.
const SED_DELIMITERS: &[char] = &['|', '%', ',', '@', '~', ';', '!', '+'];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackupOutcome {
    Created,
    AlreadyPresent,
}

/// The remote daemon configuration file and its drop-in directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshdConfigFile {
    path: String,
    drop_in_dir: String,
}

impl SshdConfigFile {
    pub fn new(path: impl Into<String>, drop_in_dir: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            drop_in_dir: drop_in_dir.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn drop_in_dir(&self) -> &str {
        &self.drop_in_dir
    }

    pub fn backup_path(&self) -> String {
        format!("{}.bak", self.path)
    }

    pub fn patch_command(&self, name: &str, value: &str) -> Result<RemoteCommand> {
        let expression = sed_expression(name, value)?;
        Ok(RemoteCommand::script(
            PATCH_DIRECTIVE_SCRIPT,
            [match_pattern(name), expression, self.path.clone(), directive_line(name, value)],
        ))
    }

    pub fn remove_drop_ins_command(&self) -> RemoteCommand {
        RemoteCommand::script(REMOVE_DROP_INS_SCRIPT, [self.drop_in_dir.as_str()])
    }

    /// Copy the live config to the backup path unless a backup already exists.
    pub async fn backup<S>(&self, session: &mut S, password: &SecretString) -> Result<BackupOutcome>
    where
        S: RemoteSession + ?Sized,
    {
        let backup_path = self.backup_path();
        let probe = RemoteCommand::new("test").args(["-f", backup_path.as_str()]);
        if session.run(&probe).await?.success() {
            log::info!("Backup already exists at {}", backup_path);
            return Ok(BackupOutcome::AlreadyPresent);
        }

        let copy = RemoteCommand::new("cp").args(["-p", "--", self.path.as_str(), backup_path.as_str()]);
        session
            .run_privileged(&copy, password)
            .await?
            .check_privileged(&copy)?;
        log::info!("SSH config backed up to {}", backup_path);
        Ok(BackupOutcome::Created)
    }

    /// Set `name` to `value`, rewriting a live or commented-out occurrence
    /// or appending the directive when it is absent.
    pub async fn patch_directive<S>(
        &self,
        session: &mut S,
        password: &SecretString,
        name: &str,
        value: &str,
    ) -> Result<()>
    where
        S: RemoteSession + ?Sized,
    {
        let patch = self.patch_command(name, value)?;
        let line = directive_line(name, value);
        session
            .run_privileged(&patch, password)
            .await?
            .check_privileged(&patch)?;
        log::info!("{}: set `{}`", self.path, line);
        Ok(())
    }

    /// Delete everything in the drop-in directory so no leftover file can
    /// override the main config.
    pub async fn remove_drop_ins<S>(&self, session: &mut S, password: &SecretString) -> Result<()>
    where
        S: RemoteSession + ?Sized,
    {
        let remove = self.remove_drop_ins_command();
        session
            .run_privileged(&remove, password)
            .await?
            .check_privileged(&remove)?;
        log::info!("Cleared {}", self.drop_in_dir);
        Ok(())
    }

    /// Reload the daemon. Directive changes are not rolled back on failure.
    pub async fn reload<S>(&self, session: &mut S, password: &SecretString) -> Result<()>
    where
        S: RemoteSession + ?Sized,
    {
        let reload = RemoteCommand::script(RELOAD_SCRIPT, std::iter::empty::<String>());
        let result = session
            .run_privileged(&reload, password)
            .await
            .and_then(|output| output.check_privileged(&reload));
        match result {
            Ok(_) => {
                log::info!("sshd reloaded");
                Ok(())
            }
            Err(e) => {
                log::error!("sshd reload failed, config changes stay in place: {}", e);
                Err(e)
            }
        }
    }
}

/// The line a directive is rewritten to.
pub fn directive_line(name: &str, value: &str) -> String {
    format!("{} {}", name, value)
}

/// Extended regex matching the directive, optionally commented out.
fn match_pattern(name: &str) -> String {
    format!("^[[:space:]]*#*[[:space:]]*{}([[:space:]]|$)", name)
}

/// Build a delimiter-safe `sed -E` substitution for one directive.
pub fn sed_expression(name: &str, value: &str) -> Result<String> {
    let invalid = |reason: &str| HardenError::InvalidDirective {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid("directive names are ASCII letters and digits"));
    }
    if value.trim().is_empty() {
        return Err(invalid("value is empty"));
    }
    if value.contains(['\n', '\r']) {
        return Err(invalid("value contains a line break"));
    }

    let delimiter = SED_DELIMITERS
        .iter()
        .copied()
        .find(|d| !value.contains(*d))
        .ok_or_else(|| invalid("no safe sed delimiter for value"))?;

    let mut replacement = String::with_capacity(name.len() + value.len() + 1);
    replacement.push_str(name);
    replacement.push(' ');
    for c in value.chars() {
        if matches!(c, '\\' | '&') {
            replacement.push('\\');
        }
        replacement.push(c);
    }

    Ok(format!(
        "s{d}^[[:space:]]*#*[[:space:]]*{name}([[:space:]].*)?${d}{replacement}{d}",
        d = delimiter,
        name = name,
        replacement = replacement,
    ))
}
