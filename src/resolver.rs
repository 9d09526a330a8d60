//! Dependency resolution for one rebuild.
//!
//! Produces the ordered set of references that must be pinned before the
//! build: runtime, SDK, discovered SDK extensions, the base app and its
//! extensions when the manifest declares one, and the builder tool itself.
//! Extension branches are not computed here — the external builder already
//! encodes the compatibility rules, so we run its dependency-install mode
//! and take whatever it reports.

use std::path::Path;

use time::OffsetDateTime;

use crate::error::Result;
use crate::flatpak::{info, RunContext};
use crate::manifest::Manifest;
use crate::reference::Ref;

/// The builder tool is itself a pinned dependency of every rebuild.
pub const BUILDER_ID: &str = "org.flatpak.Builder";
pub const BUILDER_BRANCH: &str = "stable";

/// Marker the builder prints for each extension it resolves.
const EXTENSION_MARKER: &str = "Dependency Extension:";

/// One reference and the exact commit it must be held at.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub reference: Ref,
    pub commit: String,
}

/// Scan builder dependency-discovery output for extension announcements.
///
/// Lines of the form `Dependency Extension: <id> <version>` yield an
/// (id, version) pair; everything else is deliberately ignored, not an
/// error — the builder prints plenty of unrelated progress output.
pub fn parse_extension_lines(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix(EXTENSION_MARKER)?;
            let mut parts = rest.split_whitespace();
            let id = parts.next()?;
            let version = parts.next()?;
            Some((id.to_string(), version.to_string()))
        })
        .collect()
}

/// Resolve the full ordered dependency set for `manifest`.
///
/// Order: runtime, SDK, SDK extensions, base app, base extensions,
/// builder. Commits come from the manifest where it records them
/// (`runtime-commit`, `sdk-commit`); everything else is looked up in the
/// remote log by the app's publish date.
pub fn resolve(
    ctx: &RunContext,
    manifest: &Manifest,
    manifest_path: &Path,
    staging_dir: &Path,
    published: OffsetDateTime,
) -> Result<Vec<Dependency>> {
    let arch = ctx.arch.clone();
    let mut deps = Vec::new();

    let runtime = Ref::expand(&manifest.runtime, &arch, &manifest.runtime_version);
    let runtime_commit = match &manifest.runtime_commit {
        Some(commit) => commit.clone(),
        None => info::commit_for_date(ctx, &runtime.triple(), published)?,
    };
    deps.push(Dependency {
        reference: runtime,
        commit: runtime_commit,
    });

    let sdk = Ref::expand(&manifest.sdk, &arch, &manifest.runtime_version);
    let sdk_commit = match &manifest.sdk_commit {
        Some(commit) => commit.clone(),
        None => info::commit_for_date(ctx, &sdk.triple(), published)?,
    };
    deps.push(Dependency {
        reference: sdk,
        commit: sdk_commit,
    });

    for (id, version) in discover_sdk_extensions(ctx, manifest, manifest_path, staging_dir)? {
        let reference = Ref::expand(&id, &arch, &version);
        let commit = info::commit_for_date(ctx, &reference.triple(), published)?;
        deps.push(Dependency { reference, commit });
    }

    if let Some(base) = &manifest.base {
        let base_branch = manifest
            .base_version
            .as_deref()
            .unwrap_or(&manifest.runtime_version);
        let base_ref = Ref::expand(base, &arch, base_branch);
        let base_commit = info::commit_for_date(ctx, &base_ref.triple(), published)?;
        deps.push(Dependency {
            reference: base_ref,
            commit: base_commit,
        });

        for id in &manifest.base_extensions {
            let reference = Ref::expand(id, &arch, base_branch);
            let commit = info::commit_for_date(ctx, &reference.triple(), published)?;
            deps.push(Dependency { reference, commit });
        }
    }

    let builder = Ref::expand(BUILDER_ID, &arch, BUILDER_BRANCH);
    let builder_commit = info::commit_for_date(ctx, &builder.triple(), published)?;
    deps.push(Dependency {
        reference: builder,
        commit: builder_commit,
    });

    Ok(deps)
}

/// Ask the builder which SDK extensions this manifest needs.
///
/// Runs the dependency-install-only mode against the resolved manifest;
/// the manifest may declare extensions by bare id, but the branch each one
/// resolves to is whatever the builder reports.
fn discover_sdk_extensions(
    ctx: &RunContext,
    manifest: &Manifest,
    manifest_path: &Path,
    staging_dir: &Path,
) -> Result<Vec<(String, String)>> {
    if manifest.sdk_extensions.is_empty() {
        return Ok(Vec::new());
    }
    let deps_from = format!("--install-deps-from={}", ctx.remote);
    let output = ctx.flatpak_builder(&[
        "--install-deps-only",
        &deps_from,
        &staging_dir.to_string_lossy(),
        &manifest_path.to_string_lossy(),
    ])?;
    Ok(parse_extension_lines(&output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatpak::testing::{Script, ScriptedRunner};
    use crate::flatpak::Installation;
    use time::macros::datetime;

    fn manifest(json: &str) -> Manifest {
        serde_json::from_str(json).unwrap()
    }

    const PLAIN: &str = r#"{
        "sdk": "org.gnome.Sdk",
        "sdk-commit": "c1",
        "runtime": "org.gnome.Platform",
        "runtime-commit": "c2",
        "runtime-version": "1.0"
    }"#;

    const WITH_EXTENSION: &str = r#"{
        "sdk": "org.gnome.Sdk",
        "sdk-commit": "c1",
        "runtime": "org.gnome.Platform",
        "runtime-commit": "c2",
        "runtime-version": "1.0",
        "sdk-extensions": ["org.freedesktop.Sdk.Extension.rust-stable"]
    }"#;

    const BUILDER_LOG: &str = "\
header

    Commit: builder77
      Date: 2022-04-01 00:00:00 +0000
";

    const EXTENSION_LOG: &str = "\
header

    Commit: ext55
      Date: 2022-04-02 00:00:00 +0000
";

    #[test]
    fn marker_lines_yield_extensions_and_noise_is_ignored() {
        let output = "\
Downloading sources
Dependency Extension: org.freedesktop.Sdk.Extension.rust-stable 21.08
Fetching org.gnome.Sdk
";
        let extensions = parse_extension_lines(output);
        assert_eq!(
            extensions,
            vec![(
                "org.freedesktop.Sdk.Extension.rust-stable".to_string(),
                "21.08".to_string()
            )]
        );
    }

    #[test]
    fn truncated_marker_line_is_skipped() {
        let extensions = parse_extension_lines("Dependency Extension: lonely-id\n");
        assert!(extensions.is_empty());
    }

    #[test]
    fn declared_commits_resolve_without_lookups() {
        // Scenario: sdk/runtime carry explicit commits, no base, no
        // extensions. Only the builder commit needs a log lookup.
        let runner = ScriptedRunner::new(vec![Script {
            expect: vec!["remote-info", "--log", "org.flatpak.Builder"],
            status: 0,
            stdout: BUILDER_LOG,
        }]);
        let ctx = RunContext::new("flathub", Installation::User, "x86_64", false, &runner);
        let deps = resolve(
            &ctx,
            &manifest(PLAIN),
            Path::new("/tmp/m.json"),
            Path::new("/tmp/stage"),
            datetime!(2022-04-05 00:00:00 UTC),
        )
        .unwrap();

        let rendered: Vec<(String, String)> = deps
            .iter()
            .map(|d| (d.reference.triple(), d.commit.clone()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("org.gnome.Platform/x86_64/1.0".to_string(), "c2".to_string()),
                ("org.gnome.Sdk/x86_64/1.0".to_string(), "c1".to_string()),
                (
                    "org.flatpak.Builder/x86_64/stable".to_string(),
                    "builder77".to_string()
                ),
            ]
        );
        assert_eq!(runner.count_calls(&["flatpak-builder"]), 0);
    }

    #[test]
    fn declared_extension_is_discovered_through_the_builder() {
        // Scenario: one declared extension; builder output has one marker
        // line and one unrelated line.
        let runner = ScriptedRunner::new(vec![
            Script {
                expect: vec!["--install-deps-only"],
                status: 0,
                stdout: "Initializing build dir\n\
                         Dependency Extension: org.freedesktop.Sdk.Extension.rust-stable 21.08\n",
            },
            Script {
                expect: vec!["remote-info", "--log", "rust-stable"],
                status: 0,
                stdout: EXTENSION_LOG,
            },
            Script {
                expect: vec!["remote-info", "--log", "org.flatpak.Builder"],
                status: 0,
                stdout: BUILDER_LOG,
            },
        ]);
        let ctx = RunContext::new("flathub", Installation::User, "x86_64", false, &runner);
        let deps = resolve(
            &ctx,
            &manifest(WITH_EXTENSION),
            Path::new("/tmp/m.json"),
            Path::new("/tmp/stage"),
            datetime!(2022-04-05 00:00:00 UTC),
        )
        .unwrap();

        assert_eq!(deps.len(), 4);
        assert_eq!(
            deps[2].reference.triple(),
            "org.freedesktop.Sdk.Extension.rust-stable/x86_64/21.08"
        );
        assert_eq!(deps[2].commit, "ext55");
    }
}
