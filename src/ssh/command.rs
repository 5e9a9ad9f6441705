//! Structured remote commands.
//!
//! A command is a program plus an argument list. Arguments are quoted
//! individually when rendered for the remote shell, so passwords, key
//! names and paths never get interpreted. Anything that needs redirection
//! or globbing goes through [`RemoteCommand::script`], where the script
//! text is a fixed constant and every variable part is a positional
//! parameter.

use shell_escape::unix::escape;
use std::borrow::Cow;
use std::fmt;

/// Output fragments that mean sudo refused the secret.
pub const SUDO_FAILURE_PATTERNS: &[&str] = &[
    "sorry, try again",
    "incorrect password",
    "authentication failure",
    "a password is required",
    "is not in the sudoers file",
    "no password was provided",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `sh -c <script> sh <args...>`; inside the script the arguments are `$1`, `$2`, ...
    pub fn script<I, A>(script: &str, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self::new("sh").arg("-c").arg(script).arg("sh").args(args)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Same command run through sudo reading the secret from stdin with an
    /// empty prompt, so nothing but command output reaches the channel.
    pub fn privileged(&self) -> Self {
        Self::new("sudo")
            .args(["-S", "-p", "", "--"])
            .arg(self.program.clone())
            .args(self.args.iter().cloned())
    }

    /// Render as a single line for the remote shell.
    pub fn to_shell(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| escape(Cow::Borrowed(part.as_str())).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

/// Check whether sudo output reports a rejected secret.
pub fn contains_sudo_failure(output: &str) -> bool {
    let lower = output.to_lowercase();
    SUDO_FAILURE_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}
