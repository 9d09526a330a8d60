//! Build manifest loading.
//!
//! The manifest is the JSON build descriptor `flatpak-builder` consumed
//! when the package was originally produced. The copy under the installed
//! app's file tree carries the resolved `sdk-commit`/`runtime-commit`
//! fields we pin against; the copy in the packaging repository is what the
//! rebuild is driven from. Immutable once read.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{RebuildError, Result};

/// Parsed build descriptor. Unknown fields are tolerated; flatpak-builder
/// manifests carry plenty of keys this system never looks at.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(rename = "app-id", alias = "id")]
    pub app_id: Option<String>,
    pub sdk: String,
    #[serde(rename = "sdk-commit")]
    pub sdk_commit: Option<String>,
    pub runtime: String,
    #[serde(rename = "runtime-commit")]
    pub runtime_commit: Option<String>,
    #[serde(rename = "runtime-version")]
    pub runtime_version: String,
    #[serde(rename = "sdk-extensions", default)]
    pub sdk_extensions: Vec<String>,
    pub base: Option<String>,
    #[serde(rename = "base-version")]
    pub base_version: Option<String>,
    #[serde(rename = "base-extensions", default)]
    pub base_extensions: Vec<String>,
    pub var: Option<String>,
}

/// Read and parse a manifest file.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let bytes = fs::read(path).map_err(RebuildError::io(path))?;
    serde_json::from_slice(&bytes).map_err(|err| RebuildError::ManifestParse {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Locate the single candidate manifest in a directory listing.
///
/// Candidates are `manifest.json` (what flatpak-builder writes under the
/// installed file tree) and `<package>.json` (the packaging-repository
/// convention). Exactly one must exist; zero or several is
/// [`RebuildError::AmbiguousManifest`].
pub fn find_manifest(dir: &Path, package: &str) -> Result<PathBuf> {
    let names = [format!("{package}.json"), "manifest.json".to_string()];
    let mut candidates = Vec::new();
    let entries = fs::read_dir(dir).map_err(RebuildError::io(dir))?;
    for entry in entries {
        let entry = entry.map_err(RebuildError::io(dir))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|part| part.to_str()) else {
            continue;
        };
        if names.iter().any(|candidate| candidate == name) {
            candidates.push(path);
        }
    }
    if candidates.len() != 1 {
        return Err(RebuildError::AmbiguousManifest {
            dir: dir.to_path_buf(),
            found: candidates.len(),
        });
    }
    Ok(candidates.remove(0))
}
