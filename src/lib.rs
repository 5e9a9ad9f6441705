//! Move a remote host from password to key-only SSH login
//!
//! Generates a key pair, installs it on the host, proves key login works,
//! and only then disables password authentication. The remote sshd config
//! is backed up once before the first edit; that copy is the only rollback.

pub mod client_config;
pub mod config;
pub mod error;
pub mod guard;
pub mod keys;
pub mod provision;
pub mod ssh;
pub mod sshd;

#[cfg(test)]
mod testing;

pub use config::HardenConfig;
pub use error::{HardenError, Result};
