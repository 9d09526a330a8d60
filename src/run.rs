//! Top-level rebuild driver.
//!
//! One run: read the published app's metadata, hold the app and every
//! resolved dependency at its historical commit, rebuild from the
//! packaging source against that frozen environment, compare the result
//! to the original, and record statistics. The build never starts against
//! a partially pinned environment, and every mask applied along the way is
//! released on every exit path — the mask release happens before the
//! outcome (success or failure) is surfaced to the caller.
//!
//! The design assumes no second rebuild runs concurrently against the
//! same installation; the package manager cannot isolate one run's pins
//! from another's, and there is no runtime guard for it.

use std::fs;
use std::path::{Path, PathBuf};

use crate::build::{self, BuildDirs};
use crate::error::{RebuildError, Result};
use crate::flatpak::{info, CommandRunner, Installation, RunContext};
use crate::manifest;
use crate::pin;
use crate::reference::Ref;
use crate::resolver;
use crate::snapshot;
use crate::source;
use crate::stats::BuildStatistics;
use crate::verify::{verify, Verification};

#[derive(Debug, Clone)]
pub struct RebuildOptions {
    /// Remote the package was published on, e.g. `flathub`.
    pub remote: String,
    /// Package id, e.g. `org.gnome.Baobab`.
    pub package: String,
    pub installation: Installation,
    pub arch: String,
    pub interactive: bool,
    /// Install the rebuilt app into the installation after the build.
    pub install: bool,
    /// Working directory; a path under the system temp dir by default.
    pub workdir: Option<PathBuf>,
    /// Where the statistics file lands; the user data dir by default.
    pub stats_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub reproducible: bool,
    pub stats_path: PathBuf,
}

/// Run one full rebuild. The process exit code is derived from
/// [`RunOutcome::reproducible`] by the caller.
pub fn rebuild(opts: &RebuildOptions, runner: &dyn CommandRunner) -> Result<RunOutcome> {
    let mut ctx = RunContext::new(
        opts.remote.clone(),
        opts.installation.clone(),
        opts.arch.clone(),
        opts.interactive,
        runner,
    );

    let published = info::published_app(&ctx, &opts.package)?;
    println!(
        "[run] {} published on '{}' at commit {}",
        opts.package, published.branch, published.commit
    );

    let mut stats = BuildStatistics::new(
        &opts.package,
        &published.commit,
        &published.branch,
        &opts.remote,
        &opts.arch,
    );
    let stats_dir = opts
        .stats_dir
        .clone()
        .unwrap_or_else(BuildStatistics::default_dir);
    let workdir = match &opts.workdir {
        Some(dir) => dir.clone(),
        None => std::env::temp_dir().join(format!("flatpak-rebuilder-{}", published.commit)),
    };
    fs::create_dir_all(&workdir).map_err(RebuildError::io(&workdir))?;

    let result = pin_and_build(&mut ctx, opts, &published, &workdir, &mut stats);

    // Unconditional: masks are host-global persistent state and must not
    // outlive the run, whatever happened above.
    pin::release_all(&mut ctx);

    match result {
        Ok(reproducible) => {
            stats.is_reproducible = Some(reproducible);
            let stats_path = stats.write_to(&stats_dir)?;
            println!(
                "[run] {}: {}",
                opts.package,
                if reproducible {
                    "reproducible"
                } else {
                    "NOT reproducible"
                }
            );
            Ok(RunOutcome {
                reproducible,
                stats_path,
            })
        }
        Err(err) => {
            // Whatever was measured before the failure stays diagnosable.
            if let Err(write_err) = stats.write_to(&stats_dir) {
                eprintln!("[run] failed to persist statistics: {write_err}");
            }
            Err(err)
        }
    }
}

/// Everything that may leave masks behind, grouped so the caller can
/// release them on one unconditional path.
fn pin_and_build(
    ctx: &mut RunContext,
    opts: &RebuildOptions,
    published: &info::PublishedApp,
    workdir: &Path,
    stats: &mut BuildStatistics,
) -> Result<bool> {
    // Hold the app itself at its published commit so the resolved manifest
    // under its file tree matches the build we are reproducing.
    let app_ref = Ref::expand(&opts.package, &ctx.arch, &published.branch);
    ensure_pinned(ctx, &app_ref, &published.commit)?;
    require_consistent(ctx, &app_ref, &published.commit)?;

    let location = info::installed_location(ctx, &app_ref.triple())?;
    let files_dir = location.join("files");
    let installed_manifest = manifest::find_manifest(&files_dir, &opts.package)?;
    let parsed = manifest::load_manifest(&installed_manifest)?;

    let staging = workdir.join("deps");
    let deps = resolver::resolve(ctx, &parsed, &installed_manifest, &staging, published.date)?;
    println!("[run] resolved {} dependencies to pin", deps.len());

    // All pins and verifications must succeed before the build phase may
    // begin; a single inconsistent reference aborts the run here.
    for dep in &deps {
        ensure_pinned(ctx, &dep.reference, &dep.commit)?;
        require_consistent(ctx, &dep.reference, &dep.commit)?;
    }

    let src_dir = workdir.join("source");
    if src_dir.exists() {
        println!("[source] reusing existing checkout at {}", src_dir.display());
    } else {
        let branch = source::packaging_branch(&published.branch);
        source::fetch_build_source(ctx.runner, &opts.package, branch, &src_dir)?;
    }
    let build_manifest = manifest::find_manifest(&src_dir, &opts.package)?;

    let dirs = BuildDirs::under(workdir);
    build::build(
        ctx,
        &dirs,
        &build_manifest,
        &published.branch,
        opts.install,
        stats,
    )?;
    stats.build_success = true;

    let rebuilt_dir = workdir.join("rebuilt");
    if rebuilt_dir.exists() {
        fs::remove_dir_all(&rebuilt_dir).map_err(RebuildError::io(&rebuilt_dir))?;
    }
    let export_ref = format!("app/{}/{}/{}", opts.package, ctx.arch, published.branch);
    snapshot::checkout(ctx.runner, &dirs.repo_dir, &export_ref, &rebuilt_dir)?;

    let report = workdir.join("diff.txt");
    snapshot::trees_identical(ctx.runner, &files_dir, &rebuilt_dir.join("files"), &report)
}

/// Install (or update) a reference, then pin and mask it.
///
/// `--or-update` makes the install idempotent for already-present refs;
/// the follow-up pin forces the exact commit either way.
fn ensure_pinned(ctx: &mut RunContext, reference: &Ref, commit: &str) -> Result<()> {
    let triple = reference.triple();
    let remote = ctx.remote.clone();
    ctx.flatpak(&["install", "--or-update", "--no-deps", &remote, &triple])?;
    pin::pin(ctx, reference, commit, true)
}

/// Verify with healing allowed; an inconsistent verdict is fatal.
fn require_consistent(ctx: &mut RunContext, reference: &Ref, commit: &str) -> Result<()> {
    match verify(ctx, reference, commit, true)? {
        Verification::Consistent => {
            println!("[verify] {reference} consistent at {commit}");
            Ok(())
        }
        Verification::Healed => {
            println!("[verify] {reference} healed to {commit}");
            Ok(())
        }
        Verification::Inconsistent { actual } => Err(RebuildError::VersionMismatch {
            reference: reference.to_string(),
            expected: commit.to_string(),
            actual,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatpak::testing::{Script, ScriptedRunner};
    use tempfile::TempDir;

    const REMOTE_INFO: &str = "\
        ID: org.gnome.Baobab
       Ref: app/org.gnome.Baobab/x86_64/stable
    Branch: stable
    Commit: app00
      Date: 2022-04-05 10:17:34 +0000
";

    const MANIFEST: &str = r#"{
        "app-id": "org.gnome.Baobab",
        "sdk": "org.gnome.Sdk",
        "sdk-commit": "c1",
        "runtime": "org.gnome.Platform",
        "runtime-commit": "c2",
        "runtime-version": "1.0"
    }"#;

    const BUILDER_LOG: &str = "\
header

    Commit: builder77
      Date: 2022-04-01 00:00:00 +0000
";

    const HEADS: &str = "1111\trefs/heads/master\n2222\trefs/heads/beta\n";

    fn opts(workdir: &Path, stats_dir: &Path) -> RebuildOptions {
        RebuildOptions {
            remote: "flathub".to_string(),
            package: "org.gnome.Baobab".to_string(),
            installation: Installation::User,
            arch: "x86_64".to_string(),
            interactive: false,
            install: false,
            workdir: Some(workdir.to_path_buf()),
            stats_dir: Some(stats_dir.to_path_buf()),
        }
    }

    /// Fake deploy dir with the resolved manifest, plus the app's
    /// packaging checkout so no clone is attempted.
    fn fixture() -> (TempDir, &'static str) {
        let temp = TempDir::new().unwrap();
        let files = temp.path().join("deploy/files");
        fs::create_dir_all(&files).unwrap();
        fs::write(files.join("manifest.json"), MANIFEST).unwrap();

        let src = temp.path().join("work/source");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("org.gnome.Baobab.json"), MANIFEST).unwrap();

        let location: &'static str = Box::leak(
            temp.path()
                .join("deploy")
                .to_string_lossy()
                .into_owned()
                .into_boxed_str(),
        );
        (temp, location)
    }

    fn base_scripts(location: &'static str) -> Vec<Script> {
        vec![
            Script {
                expect: vec!["remote-info", "org.gnome.Baobab"],
                status: 0,
                stdout: REMOTE_INFO,
            },
            Script {
                expect: vec!["info", "org.gnome.Baobab"],
                status: 0,
                stdout: "Commit: app00\n",
            },
            Script {
                expect: vec!["--show-location"],
                status: 0,
                stdout: location,
            },
            Script {
                expect: vec!["remote-info", "--log", "org.flatpak.Builder"],
                status: 0,
                stdout: BUILDER_LOG,
            },
            Script {
                expect: vec!["info", "org.gnome.Platform"],
                status: 0,
                stdout: "Commit: c2\n",
            },
            Script {
                expect: vec!["info", "org.gnome.Sdk"],
                status: 0,
                stdout: "Commit: c1\n",
            },
            Script {
                expect: vec!["info", "org.flatpak.Builder"],
                status: 0,
                stdout: "Commit: builder77\n",
            },
            Script {
                expect: vec!["ls-remote"],
                status: 0,
                stdout: HEADS,
            },
        ]
    }

    #[test]
    fn full_run_pins_builds_compares_and_releases() {
        let (temp, location) = fixture();
        let workdir = temp.path().join("work");
        let stats_dir = temp.path().join("stats");
        let runner = ScriptedRunner::new(base_scripts(location));

        let outcome = rebuild(&opts(&workdir, &stats_dir), &runner).unwrap();
        assert!(outcome.reproducible);

        // App plus runtime, sdk and builder were masked and released.
        assert_eq!(runner.count_calls(&["mask", "--remove"]), 4);
        // Fetch phase strictly before build phase.
        let calls = runner.calls.borrow();
        let fetch = calls
            .iter()
            .position(|l| l.contains("--download-only"))
            .unwrap();
        let built = calls
            .iter()
            .position(|l| l.contains("--disable-download"))
            .unwrap();
        assert!(fetch < built);
        drop(calls);

        let body = fs::read_to_string(&outcome.stats_path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["build_success"], true);
        assert_eq!(value["is_reproducible"], true);
        assert_eq!(value["commit"], "app00");
    }

    #[test]
    fn unhealable_dependency_aborts_before_any_build() {
        let (temp, location) = fixture();
        let workdir = temp.path().join("work");
        let stats_dir = temp.path().join("stats");

        let mut scripts = base_scripts(location);
        // Replace the runtime verification: wrong commit on both reads.
        scripts.retain(|s| s.expect != vec!["info", "org.gnome.Platform"]);
        scripts.push(Script {
            expect: vec!["info", "org.gnome.Platform"],
            status: 0,
            stdout: "Commit: drifted\n",
        });
        scripts.push(Script {
            expect: vec!["info", "org.gnome.Platform"],
            status: 0,
            stdout: "Commit: drifted\n",
        });
        let runner = ScriptedRunner::new(scripts);

        let err = rebuild(&opts(&workdir, &stats_dir), &runner).unwrap_err();
        assert!(matches!(err, RebuildError::VersionMismatch { .. }));

        // No build phase ran; the app and runtime masks were released
        // exactly once each, even though the heal re-masked the runtime.
        assert_eq!(runner.count_calls(&["flatpak-builder"]), 0);
        assert_eq!(runner.count_calls(&["mask", "--remove"]), 2);

        // Partial statistics were persisted for diagnosis.
        let stats_file = stats_dir.join("org.gnome.Baobab-app00.json");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&stats_file).unwrap()).unwrap();
        assert_eq!(value["build_success"], false);
        assert!(value["is_reproducible"].is_null());
    }

    #[test]
    fn fetch_phase_failure_unwinds_through_cleanup() {
        let (temp, location) = fixture();
        let workdir = temp.path().join("work");
        let stats_dir = temp.path().join("stats");

        let mut scripts = base_scripts(location);
        scripts.push(Script {
            expect: vec!["--download-only"],
            status: 1,
            stdout: "",
        });
        let runner = ScriptedRunner::new(scripts);

        let err = rebuild(&opts(&workdir, &stats_dir), &runner).unwrap_err();
        assert!(matches!(err, RebuildError::CommandFailed { .. }));

        // Build phase never ran; every mask was released anyway.
        assert_eq!(runner.count_calls(&["--disable-download"]), 0);
        assert_eq!(runner.count_calls(&["mask", "--remove"]), 4);

        let stats_file = stats_dir.join("org.gnome.Baobab-app00.json");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&stats_file).unwrap()).unwrap();
        assert_eq!(value["build_success"], false);
    }

    #[test]
    fn healed_dependency_still_reaches_the_build() {
        let (temp, location) = fixture();
        let workdir = temp.path().join("work");
        let stats_dir = temp.path().join("stats");

        let mut scripts = base_scripts(location);
        // First read of the SDK disagrees, the post-heal read agrees.
        scripts.retain(|s| s.expect != vec!["info", "org.gnome.Sdk"]);
        scripts.push(Script {
            expect: vec!["info", "org.gnome.Sdk"],
            status: 0,
            stdout: "Commit: drifted\n",
        });
        scripts.push(Script {
            expect: vec!["info", "org.gnome.Sdk"],
            status: 0,
            stdout: "Commit: c1\n",
        });
        let runner = ScriptedRunner::new(scripts);

        let outcome = rebuild(&opts(&workdir, &stats_dir), &runner).unwrap();
        assert!(outcome.reproducible);
        assert_eq!(
            runner.count_calls(&["uninstall", "--force-remove", "org.gnome.Sdk"]),
            1
        );
        // The heal re-masked an already-masked ref; release stays balanced.
        assert_eq!(runner.count_calls(&["mask", "--remove"]), 4);
    }
}
