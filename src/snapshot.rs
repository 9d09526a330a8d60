//! Snapshot checkout and artifact comparison.
//!
//! Both tools are external collaborators: `ostree` materializes the file
//! content of one commit from a content-addressed repository into a plain
//! directory, and the diff tool renders the reproducibility verdict. Only
//! their exit contracts are relied on here.

use std::path::Path;

use crate::error::{RebuildError, Result};
use crate::flatpak::{checked, CommandRunner};

/// Materialize `committish` from `repo` into `dest`.
pub fn checkout(
    runner: &dyn CommandRunner,
    repo: &Path,
    committish: &str,
    dest: &Path,
) -> Result<()> {
    checked(
        runner,
        "ostree",
        &[
            format!("--repo={}", repo.display()),
            "checkout".to_string(),
            "--user-mode".to_string(),
            committish.to_string(),
            dest.to_string_lossy().into_owned(),
        ],
    )?;
    Ok(())
}

/// Compare two checked-out trees.
///
/// The diff tool's exit code is the verdict: zero means byte-identical,
/// one means differences were found, anything else is a tool failure. A
/// difference report is written next to the compared trees for diagnosis.
pub fn trees_identical(
    runner: &dyn CommandRunner,
    original: &Path,
    rebuilt: &Path,
    report: &Path,
) -> Result<bool> {
    let args = vec![
        format!("--text={}", report.display()),
        "--exclude-directory-metadata=recursive".to_string(),
        original.to_string_lossy().into_owned(),
        rebuilt.to_string_lossy().into_owned(),
    ];
    let output = runner.run("diffoscope", &args)?;
    match output.status {
        0 => Ok(true),
        1 => Ok(false),
        _ => Err(RebuildError::CommandFailed {
            command: format!("diffoscope {}", args.join(" ")),
            stderr: output.stderr,
        }),
    }
}
