//! Parsers for package-manager introspection output.
//!
//! `flatpak info` and `flatpak remote-info` print aligned "Key: value"
//! blocks; `remote-info --log` prints a header followed by one such block
//! per commit, newest first, separated by blank lines. Each parser here is
//! a narrow function over captured text so the resolver and verifier never
//! touch raw CLI phrasing themselves.

use std::collections::BTreeMap;
use std::path::PathBuf;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::{RebuildError, Result};
use crate::flatpak::RunContext;

/// `2022-04-05 10:17:34 +0000` as printed in commit blocks.
const DATE_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
);

/// What `remote-info` tells us about the published app.
#[derive(Debug, Clone)]
pub struct PublishedApp {
    pub commit: String,
    pub branch: String,
    pub date: OffsetDateTime,
}

/// Parse one aligned "Key: value" block into a map.
///
/// Lines without a colon are ignored; keys and values are trimmed.
pub fn parse_info_block(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parse `remote-info --log` output into per-commit maps, newest first.
///
/// The leading header block carries no `Commit` key and is dropped.
pub fn parse_log_blocks(output: &str) -> Vec<BTreeMap<String, String>> {
    output
        .split("\n\n")
        .map(parse_info_block)
        .filter(|block| block.contains_key("Commit"))
        .collect()
}

/// Parse a flatpak commit date into an [`OffsetDateTime`].
pub fn parse_flatpak_date(date: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(date.trim(), DATE_FORMAT).map_err(|err| RebuildError::BadDate {
        date: date.to_string(),
        reason: err.to_string(),
    })
}

/// Extract the installed commit from an `info` block.
///
/// The primary field is `Commit`. When it is absent we fall back to
/// `Active commit`; the two can legitimately disagree while an update is
/// pending, so the returned flag tells the caller the ambiguous path was
/// taken and must be surfaced, not silently trusted.
pub fn active_commit(block: &BTreeMap<String, String>) -> Result<(String, bool)> {
    if let Some(commit) = block.get("Commit") {
        return Ok((commit.clone(), false));
    }
    if let Some(commit) = block.get("Active commit") {
        return Ok((commit.clone(), true));
    }
    Err(RebuildError::MissingField {
        field: "Commit",
        context: "flatpak info",
    })
}

/// Fetch and parse remote metadata for a name or full reference.
pub fn remote_info(ctx: &RunContext, name: &str) -> Result<BTreeMap<String, String>> {
    let remote = ctx.remote.clone();
    let arch = format!("--arch={}", ctx.arch);
    let output = ctx.flatpak(&["remote-info", &arch, &remote, name])?;
    Ok(parse_info_block(&output))
}

/// Fetch the published-app triple (commit, branch, date) for a name.
pub fn published_app(ctx: &RunContext, name: &str) -> Result<PublishedApp> {
    let block = remote_info(ctx, name)?;
    let commit = block
        .get("Commit")
        .ok_or(RebuildError::MissingField {
            field: "Commit",
            context: "flatpak remote-info",
        })?
        .clone();
    let branch = block
        .get("Branch")
        .ok_or(RebuildError::MissingField {
            field: "Branch",
            context: "flatpak remote-info",
        })?
        .clone();
    let date = parse_flatpak_date(block.get("Date").ok_or(RebuildError::MissingField {
        field: "Date",
        context: "flatpak remote-info",
    })?)?;
    Ok(PublishedApp {
        commit,
        branch,
        date,
    })
}

/// Fetch and parse installed metadata for a full reference.
pub fn installed_info(ctx: &RunContext, reference: &str) -> Result<BTreeMap<String, String>> {
    let arch = format!("--arch={}", ctx.arch);
    let output = ctx.flatpak(&["info", &arch, reference])?;
    Ok(parse_info_block(&output))
}

/// Deploy directory of an installed reference.
pub fn installed_location(ctx: &RunContext, reference: &str) -> Result<PathBuf> {
    let output = ctx.flatpak(&["info", "--show-location", reference])?;
    let path = output.trim();
    if path.is_empty() {
        return Err(RebuildError::MissingField {
            field: "location",
            context: "flatpak info --show-location",
        });
    }
    Ok(PathBuf::from(path))
}

/// Newest commit of `reference` at or before `date`.
///
/// `remote-info --log` reports commits from most recent to oldest, so the
/// first block whose date does not exceed the target is the answer.
pub fn commit_for_date(ctx: &RunContext, reference: &str, date: OffsetDateTime) -> Result<String> {
    let remote = ctx.remote.clone();
    let arch = format!("--arch={}", ctx.arch);
    let output = ctx.flatpak(&["remote-info", "--log", &arch, &remote, reference])?;
    for block in parse_log_blocks(&output) {
        let Some(commit_date) = block.get("Date") else {
            continue;
        };
        if parse_flatpak_date(commit_date)? <= date {
            if let Some(commit) = block.get("Commit") {
                return Ok(commit.clone());
            }
        }
    }
    Err(RebuildError::NoCommitForDate {
        reference: reference.to_string(),
        date: date
            .format(DATE_FORMAT)
            .unwrap_or_else(|_| date.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const REMOTE_INFO: &str = "\
Flathub - org.gnome.Baobab

        ID: org.gnome.Baobab
       Ref: app/org.gnome.Baobab/x86_64/stable
      Arch: x86_64
    Branch: stable
   Runtime: org.gnome.Platform/x86_64/42
       Sdk: org.gnome.Sdk/x86_64/42
    Commit: aa11bb22cc33
   Subject: Export org.gnome.Baobab
      Date: 2022-04-05 10:17:34 +0000
";

    const LOG: &str = "\
Flathub - org.freedesktop.Sdk

    Commit: newer000
   Subject: Export org.freedesktop.Sdk
      Date: 2022-04-06 08:00:00 +0000

    Commit: older111
   Subject: Export org.freedesktop.Sdk
      Date: 2022-04-01 09:30:00 +0000
";

    #[test]
    fn info_block_parses_aligned_keys() {
        let block = parse_info_block(REMOTE_INFO);
        assert_eq!(block.get("Commit").unwrap(), "aa11bb22cc33");
        assert_eq!(block.get("Branch").unwrap(), "stable");
        assert_eq!(block.get("Sdk").unwrap(), "org.gnome.Sdk/x86_64/42");
        // The banner line has no colon and is dropped.
        assert!(!block.contains_key("Flathub - org.gnome.Baobab"));
    }

    #[test]
    fn log_blocks_drop_header_and_keep_order() {
        let blocks = parse_log_blocks(LOG);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].get("Commit").unwrap(), "newer000");
        assert_eq!(blocks[1].get("Commit").unwrap(), "older111");
    }

    #[test]
    fn date_parsing_handles_numeric_offset() {
        let parsed = parse_flatpak_date("2022-04-05 10:17:34 +0000").unwrap();
        assert_eq!(parsed, datetime!(2022-04-05 10:17:34 UTC));
        let offset = parse_flatpak_date("2022-04-05 10:17:34 +0200").unwrap();
        assert_eq!(offset, datetime!(2022-04-05 10:17:34 +02:00));
    }

    #[test]
    fn bad_date_is_reported() {
        assert!(matches!(
            parse_flatpak_date("yesterday"),
            Err(RebuildError::BadDate { .. })
        ));
    }

    #[test]
    fn primary_commit_field_wins() {
        let mut block = BTreeMap::new();
        block.insert("Commit".to_string(), "primary".to_string());
        block.insert("Active commit".to_string(), "secondary".to_string());
        assert_eq!(
            active_commit(&block).unwrap(),
            ("primary".to_string(), false)
        );
    }

    #[test]
    fn fallback_to_active_commit_is_flagged() {
        let mut block = BTreeMap::new();
        block.insert("Active commit".to_string(), "secondary".to_string());
        assert_eq!(
            active_commit(&block).unwrap(),
            ("secondary".to_string(), true)
        );
    }

    #[test]
    fn commit_for_date_takes_newest_commit_not_after_date() {
        use crate::flatpak::testing::{Script, ScriptedRunner};
        use crate::flatpak::{Installation, RunContext};

        let runner = ScriptedRunner::new(vec![Script {
            expect: vec!["remote-info", "--log"],
            status: 0,
            stdout: LOG,
        }]);
        let ctx = RunContext::new("flathub", Installation::User, "x86_64", false, &runner);
        let commit = commit_for_date(
            &ctx,
            "org.freedesktop.Sdk/x86_64/21.08",
            datetime!(2022-04-05 00:00:00 UTC),
        )
        .unwrap();
        assert_eq!(commit, "older111");
    }

    #[test]
    fn missing_both_commit_fields_is_an_error() {
        let block = BTreeMap::new();
        assert!(matches!(
            active_commit(&block),
            Err(RebuildError::MissingField { field: "Commit", .. })
        ));
    }
}
