//! Build source acquisition.
//!
//! The version-control client is an external collaborator consumed through
//! a narrow contract: probe the remote's advertised heads, clone the
//! packaging repository at the requested branch, and bring submodules in.
//! The probe doubles as the existence check for the declared source
//! location.

use std::path::Path;

use crate::error::{RebuildError, Result};
use crate::flatpak::{checked, CommandRunner};

/// Canonical packaging repository for a package published on flathub.
pub fn source_url(package: &str) -> String {
    format!("https://github.com/flathub/{package}.git")
}

/// Branch of the packaging repository that feeds a published branch.
///
/// Flathub publishes the `stable` branch from the repository's `master`;
/// every other branch (`beta`, version branches) is named identically on
/// both sides.
pub fn packaging_branch(published: &str) -> &str {
    if published == "stable" {
        "master"
    } else {
        published
    }
}

/// Heads the remote advertises, by bare branch name.
pub fn advertised_branches(
    runner: &dyn CommandRunner,
    package: &str,
    url: &str,
) -> Result<Vec<String>> {
    let args = vec![
        "ls-remote".to_string(),
        "--heads".to_string(),
        url.to_string(),
    ];
    let output = runner.run("git", &args)?;
    if !output.success() {
        return Err(RebuildError::MissingSourceRepository {
            package: package.to_string(),
            url: url.to_string(),
        });
    }
    Ok(parse_heads(&output.stdout))
}

/// Parse `git ls-remote --heads` output into branch names.
pub fn parse_heads(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (_, refname) = line.split_once('\t')?;
            refname
                .trim()
                .strip_prefix("refs/heads/")
                .map(str::to_string)
        })
        .collect()
}

/// Clone the packaging source for `package` at `branch` into `dest`.
///
/// Fails with [`RebuildError::MissingSourceRepository`] when the location
/// does not exist and [`RebuildError::BranchNotFound`] when the branch is
/// not among the advertised heads.
pub fn fetch_build_source(
    runner: &dyn CommandRunner,
    package: &str,
    branch: &str,
    dest: &Path,
) -> Result<()> {
    let url = source_url(package);
    let branches = advertised_branches(runner, package, &url)?;
    if !branches.iter().any(|head| head == branch) {
        return Err(RebuildError::BranchNotFound {
            package: package.to_string(),
            branch: branch.to_string(),
        });
    }

    println!("[source] cloning {url} at branch '{branch}'");
    let dest_str = dest.to_string_lossy().into_owned();
    checked(
        runner,
        "git",
        &[
            "clone".to_string(),
            "--branch".to_string(),
            branch.to_string(),
            url,
            dest_str.clone(),
        ],
    )?;
    checked(
        runner,
        "git",
        &[
            "-C".to_string(),
            dest_str,
            "submodule".to_string(),
            "update".to_string(),
            "--init".to_string(),
            "--recursive".to_string(),
        ],
    )?;
    Ok(())
}
