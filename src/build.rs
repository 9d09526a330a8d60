//! Two-phase build orchestration.
//!
//! Phase 1 runs the builder with network fetch enabled and artifact
//! generation disabled, purely to populate the local cache; the cache,
//! source-control and plain-download subsets are then measured. Phase 2
//! runs with fetch disabled so the build consumes exactly what phase 1
//! populated — a second network fetch could silently pick up a newer
//! artifact than intended. Both phases must complete before the rebuilt
//! artifact exists; either failing aborts the run.

use std::path::{Path, PathBuf};
use std::time::Instant;

use walkdir::WalkDir;

use crate::error::Result;
use crate::flatpak::RunContext;
use crate::stats::BuildStatistics;

/// Tag that would otherwise mark the result as an upstream-maintained
/// build, which a local rebuild is not.
const PROVENANCE_TAG: &str = "upstream-maintained";

/// Layout of one rebuild working directory.
#[derive(Debug, Clone)]
pub struct BuildDirs {
    /// Builder state (cache) directory.
    pub state_dir: PathBuf,
    /// Scratch directory the builder assembles into.
    pub build_dir: PathBuf,
    /// Local export repository the finished build is committed to.
    pub repo_dir: PathBuf,
}

impl BuildDirs {
    pub fn under(workdir: &Path) -> Self {
        BuildDirs {
            state_dir: workdir.join(".flatpak-builder"),
            build_dir: workdir.join("build"),
            repo_dir: workdir.join("repo"),
        }
    }
}

/// Recursive byte size of a directory tree; zero when it does not exist.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum()
}

/// Run both build phases against the now-pinned environment.
///
/// Cache sizes land in `stats` as soon as the fetch phase completes, and
/// the build wall time right after the build phase, so a later fatal error
/// still leaves the measurements on record.
pub fn build(
    ctx: &RunContext,
    dirs: &BuildDirs,
    manifest_path: &Path,
    branch: &str,
    install: bool,
    stats: &mut BuildStatistics,
) -> Result<()> {
    let state_flag = format!("--state-dir={}", dirs.state_dir.display());
    let arch_flag = format!("--arch={}", ctx.arch);
    let build_dir = dirs.build_dir.to_string_lossy().into_owned();
    let manifest = manifest_path.to_string_lossy().into_owned();

    // Dependencies are already pinned and masked; the fetch phase only
    // downloads sources, it must not touch installed refs.
    println!("[build] fetch phase: populating builder cache");
    ctx.flatpak_builder(&[
        "--download-only",
        "--force-clean",
        &state_flag,
        &arch_flag,
        &build_dir,
        &manifest,
    ])?;

    stats.cache_size_bytes = Some(dir_size(&dirs.state_dir));
    stats.git_size_bytes = Some(dir_size(&dirs.state_dir.join("git")));
    stats.download_size_bytes = Some(dir_size(&dirs.state_dir.join("downloads")));

    println!("[build] build phase: fetch disabled, branch forced to '{branch}'");
    let branch_flag = format!("--default-branch={branch}");
    let tag_flag = format!("--remove-tag={PROVENANCE_TAG}");
    let repo_flag = format!("--repo={}", dirs.repo_dir.display());
    let mut args: Vec<&str> = vec![
        "--disable-download",
        "--force-clean",
        &state_flag,
        &arch_flag,
        &branch_flag,
        &tag_flag,
        &repo_flag,
    ];
    if install {
        args.push("--install");
    }
    args.push(&build_dir);
    args.push(&manifest);

    let started = Instant::now();
    ctx.flatpak_builder(&args)?;
    stats.build_time_secs = Some(started.elapsed().as_secs_f64());

    Ok(())
}
