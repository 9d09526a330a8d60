//! Command gateway for the host package manager.
//!
//! Everything the rebuilder does to host state goes through one synchronous
//! chokepoint: build the command line, attach the installation scope and
//! interactivity flags uniformly, run the process to completion, and turn a
//! non-zero exit into a structured [`RebuildError::CommandFailed`].
//!
//! The gateway is a trait so the pin/verify/cleanup machinery can be
//! exercised against a scripted runner in tests without touching the host.

pub mod info;

use std::process::Command;

use crate::error::{RebuildError, Result};
use crate::pin::PinnedSet;

/// Captured outcome of one external process.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Exit code; negative when the process was killed by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs one external process to completion and captures its output.
///
/// The only error this returns is a spawn failure; a non-zero exit is
/// reported through [`RunOutput::status`] so callers that care about
/// specific exit codes (the diff tool does) can interpret them.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<RunOutput>;
}

/// Production runner backed by `std::process::Command`.
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<RunOutput> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| RebuildError::Spawn {
                program: program.to_string(),
                source,
            })?;
        Ok(RunOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a command and require a zero exit, returning captured stdout.
pub fn checked(runner: &dyn CommandRunner, program: &str, args: &[String]) -> Result<String> {
    let output = runner.run(program, args)?;
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(RebuildError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr: output.stderr,
        })
    }
}

/// Which package-manager installation a run operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Installation {
    User,
    System,
    Named(String),
}

impl Installation {
    /// The scope flag attached to every package-manager invocation.
    pub fn flag(&self) -> String {
        match self {
            Installation::User => "--user".to_string(),
            Installation::System => "--system".to_string(),
            Installation::Named(name) => format!("--installation={name}"),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "user" => Installation::User,
            "system" => Installation::System,
            other => Installation::Named(other.to_string()),
        }
    }
}

/// Subcommands that mutate host state and would otherwise prompt.
const MUTATING: &[&str] = &["install", "uninstall", "update"];

/// Shared context for one rebuild run.
///
/// Holds the target remote/installation/arch, the command gateway, and the
/// run's only piece of mutable shared state: the set of references this run
/// has masked. Grows through the pinner, shrinks through
/// [`crate::pin::release_all`], and must be empty by process exit.
pub struct RunContext<'a> {
    pub remote: String,
    pub installation: Installation,
    pub arch: String,
    pub interactive: bool,
    pub runner: &'a dyn CommandRunner,
    pub pinned: PinnedSet,
}

impl<'a> RunContext<'a> {
    pub fn new(
        remote: impl Into<String>,
        installation: Installation,
        arch: impl Into<String>,
        interactive: bool,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        RunContext {
            remote: remote.into(),
            installation,
            arch: arch.into(),
            interactive,
            runner,
            pinned: PinnedSet::default(),
        }
    }

    /// Invoke `flatpak <subcommand> ...` with the scope flag attached and,
    /// for mutating subcommands in a non-interactive run, prompts disabled.
    pub fn flatpak(&self, args: &[&str]) -> Result<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.push(args[0].to_string());
        full.push(self.installation.flag());
        if !self.interactive && MUTATING.contains(&args[0]) {
            full.push("--noninteractive".to_string());
        }
        full.extend(args[1..].iter().map(|arg| arg.to_string()));
        checked(self.runner, "flatpak", &full)
    }

    /// Invoke `flatpak-builder ...` with the scope flag attached.
    ///
    /// The builder accepts the same `--user`/`--system`/`--installation`
    /// scope flags as the package manager itself.
    pub fn flatpak_builder(&self, args: &[&str]) -> Result<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(self.installation.flag());
        full.extend(args.iter().map(|arg| arg.to_string()));
        checked(self.runner, "flatpak-builder", &full)
    }
}

impl Drop for RunContext<'_> {
    /// Backstop only: the run driver releases pins explicitly on every exit
    /// path. This catches a panic unwinding past the driver so masked
    /// references never outlive the process.
    fn drop(&mut self) {
        if !self.pinned.is_empty() {
            eprintln!(
                "[cleanup] context dropped with {} pinned reference(s), releasing",
                self.pinned.len()
            );
            crate::pin::release_all(self);
        }
    }
}
