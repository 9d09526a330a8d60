//! Flatpak reference handling.
//!
//! A reference names one package instance: id, architecture and branch,
//! plus the commit we intend to hold it at. Bare ids are expanded to the
//! full `id/arch/branch` triple before any pin or verify operation; a
//! reference that already carries an explicit commit is never re-expanded.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fully qualified identifier of a package instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    /// Application or runtime id, e.g. `org.freedesktop.Sdk`.
    pub id: String,
    /// Architecture, e.g. `x86_64`.
    pub arch: String,
    /// Branch, e.g. `21.08` or `stable`.
    pub branch: String,
    /// Exact commit this reference is held at, once known.
    pub commit: Option<String>,
}

impl Ref {
    /// Expand a possibly-bare id into a full triple.
    ///
    /// `org.freedesktop.Sdk` becomes `org.freedesktop.Sdk/<arch>/<branch>`;
    /// a partial `id/arch` or full `id/arch/branch` spelling keeps the
    /// parts it names and fills the rest from the defaults.
    pub fn expand(spec: &str, default_arch: &str, default_branch: &str) -> Self {
        let mut parts = spec.splitn(3, '/');
        let id = parts.next().unwrap_or_default().to_string();
        let arch = parts
            .next()
            .filter(|part| !part.is_empty())
            .unwrap_or(default_arch)
            .to_string();
        let branch = parts
            .next()
            .filter(|part| !part.is_empty())
            .unwrap_or(default_branch)
            .to_string();
        Ref {
            id,
            arch,
            branch,
            commit: None,
        }
    }

    /// Attach the commit this reference must be held at.
    pub fn at_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// The `id/arch/branch` form the package manager CLI accepts.
    pub fn triple(&self) -> String {
        format!("{}/{}/{}", self.id, self.arch, self.branch)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.id, self.arch, self.branch)
    }
}
