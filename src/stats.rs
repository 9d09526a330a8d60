//! Per-run build statistics.
//!
//! One accumulating record per run, mutated as steps complete and written
//! out exactly once: at the end of a successful run, or at the point of
//! fatal failure so a broken run is still diagnosable.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{RebuildError, Result};

#[derive(Debug, Serialize)]
pub struct BuildStatistics {
    pub package: String,
    pub commit: String,
    pub branch: String,
    pub remote: String,
    pub arch: String,
    /// RFC 3339 stamp taken when the run started.
    pub started_at: String,
    pub build_success: bool,
    /// Unset until the rebuilt artifact has been compared.
    pub is_reproducible: Option<bool>,
    /// Wall-clock duration of the build phase, not the fetch phase.
    pub build_time_secs: Option<f64>,
    pub cache_size_bytes: Option<u64>,
    pub git_size_bytes: Option<u64>,
    pub download_size_bytes: Option<u64>,
}

impl BuildStatistics {
    pub fn new(
        package: impl Into<String>,
        commit: impl Into<String>,
        branch: impl Into<String>,
        remote: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        BuildStatistics {
            package: package.into(),
            commit: commit.into(),
            branch: branch.into(),
            remote: remote.into(),
            arch: arch.into(),
            started_at: now.format(&Rfc3339).unwrap_or_else(|_| now.to_string()),
            build_success: false,
            is_reproducible: None,
            build_time_secs: None,
            cache_size_bytes: None,
            git_size_bytes: None,
            download_size_bytes: None,
        }
    }

    /// Default statistics directory under the user data dir.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flatpak-rebuilder")
    }

    /// `<package>-<commit>.json`, one file per (package, commit) pair.
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.package, self.commit)
    }

    /// Persist the record into `dir`, creating it as needed.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(RebuildError::io(dir))?;
        let path = dir.join(self.file_name());
        let body = serde_json::to_vec_pretty(self)
            .map_err(|err| RebuildError::io(&path)(std::io::Error::other(err)))?;
        fs::write(&path, body).map_err(RebuildError::io(&path))?;
        Ok(path)
    }
}
