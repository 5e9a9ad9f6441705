//! Local `~/.ssh/config` host entries.
//!
//! Entries are appended, never rewritten or reordered. An alias that is
//! already present is left alone, whatever it points at.

use crate::error::{HardenError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostEntry {
    pub alias: String,
    pub host_name: String,
    pub user: String,
    pub identity_file: PathBuf,
    pub port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExists,
}

impl HostEntry {
    pub fn render(&self) -> String {
        format!(
            "Host {}\n    HostName {}\n    User {}\n    IdentityFile {}\n    Port {}\n",
            self.alias,
            self.host_name,
            self.user,
            self.identity_file.display(),
            self.port
        )
    }
}

/// Aliases of every `Host` block, in file order. Only the first pattern
/// on each `Host` line names the block.
pub fn aliases(text: &str) -> Vec<&str> {
    text.lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some(keyword) if keyword.eq_ignore_ascii_case("host") => tokens.next(),
                _ => None,
            }
        })
        .collect()
}

/// Append `entry` to the config at `path` unless its alias is taken.
/// A missing file is created with mode 600.
pub fn add_entry(path: &Path, entry: &HostEntry) -> Result<AddOutcome> {
    let existing = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(HardenError::local_io(path, e)),
    };

    if aliases(&existing).contains(&entry.alias.as_str()) {
        log::info!("SSH config: Host '{}' already exists", entry.alias);
        return Ok(AddOutcome::AlreadyExists);
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| HardenError::local_io(dir, e))?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|e| HardenError::local_io(path, e))?;

    let mut block = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        block.push('\n');
    }
    block.push_str(&entry.render());
    file.write_all(block.as_bytes())
        .map_err(|e| HardenError::local_io(path, e))?;

    log::info!("Host '{}' added to {}", entry.alias, path.display());
    Ok(AddOutcome::Added)
}
