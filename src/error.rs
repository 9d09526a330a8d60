//! Error kinds for a rebuild run.
//!
//! Every fallible operation in the core surfaces one of these kinds so the
//! run driver can decide between abort-with-cleanup, a one-shot heal, or
//! proceeding. The bin layer wraps them in `anyhow` for display.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the core modules.
pub type Result<T> = std::result::Result<T, RebuildError>;

/// Failure kinds a rebuild run can hit.
#[derive(Debug, Error)]
pub enum RebuildError {
    /// An external command exited non-zero. Carries the full command line
    /// and whatever the tool wrote to stderr.
    #[error("command `{command}` failed:\n{stderr}")]
    CommandFailed { command: String, stderr: String },

    /// An external command could not be spawned at all.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A directory listing produced zero or more than one candidate
    /// manifest where exactly one is required.
    #[error("expected exactly one manifest in '{dir}', found {found}")]
    AmbiguousManifest { dir: PathBuf, found: usize },

    /// The declared source-control location for the package does not exist.
    #[error("no source repository for '{package}' at {url}")]
    MissingSourceRepository { package: String, url: String },

    /// The manifest is not valid JSON or lacks required keys.
    #[error("invalid manifest '{path}': {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    /// A dependency stayed on the wrong commit after the single bounded
    /// self-heal attempt.
    #[error("'{reference}' is at commit {actual}, expected {expected}")]
    VersionMismatch {
        reference: String,
        expected: String,
        actual: String,
    },

    /// The requested branch is not among those the remote advertises.
    #[error("branch '{branch}' not found for '{package}'")]
    BranchNotFound { package: String, branch: String },

    /// Introspection output was missing a field we rely on.
    #[error("missing '{field}' in {context} output")]
    MissingField {
        field: &'static str,
        context: &'static str,
    },

    /// A commit date could not be parsed.
    #[error("unparseable date '{date}': {reason}")]
    BadDate { date: String, reason: String },

    /// No commit in the remote log is old enough for the requested date.
    #[error("no commit of '{reference}' at or before {date}")]
    NoCommitForDate { reference: String, date: String },

    /// Filesystem plumbing around the run (workdir, statistics file).
    #[error("i/o error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RebuildError {
    /// Helper for wrapping filesystem errors with the path they hit.
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> RebuildError {
        let path = path.into();
        move |source| RebuildError::Io { path, source }
    }
}
