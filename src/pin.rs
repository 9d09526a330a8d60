//! Version pinning and the cleanup controller.
//!
//! Pinning forces one reference to an exact historical commit, and masking
//! locks it so routine updates elsewhere in the run cannot silently revert
//! the pin. Masks are the one externally visible, persistent effect this
//! tool has on the host, so every mask recorded in the [`PinnedSet`] must
//! be released exactly once on every exit path. The run driver calls
//! [`release_all`] unconditionally after the pin→verify→build sequence;
//! [`crate::flatpak::RunContext`]'s `Drop` repeats it as a panic backstop,
//! which is safe because the set is drained on first release.

use crate::error::Result;
use crate::flatpak::RunContext;
use crate::reference::Ref;

/// References this run has masked against automatic updates.
///
/// Grows only through [`pin`] and shrinks only through [`release_all`].
/// Must be empty at process exit on every path.
#[derive(Debug, Default)]
pub struct PinnedSet {
    refs: Vec<Ref>,
}

impl PinnedSet {
    /// Record a masked reference. A reference already present (a heal
    /// re-pins through the same path) is not recorded twice, so release
    /// stays balanced at exactly one unmask per mask.
    pub fn insert(&mut self, reference: Ref) {
        if !self.refs.iter().any(|r| r.triple() == reference.triple()) {
            self.refs.push(reference);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Drain every record, leaving the set empty.
    pub fn take_all(&mut self) -> Vec<Ref> {
        std::mem::take(&mut self.refs)
    }
}

/// Force `reference` to `commit`.
///
/// The update runs with `--no-deps --no-related` so pinning one reference
/// never cascades into re-resolving its dependents. With `mask` set the
/// reference is additionally locked and recorded for release. Any non-zero
/// exit is fatal to the run.
pub fn pin(ctx: &mut RunContext, reference: &Ref, commit: &str, mask: bool) -> Result<()> {
    let triple = reference.triple();
    println!(
        "[pin] {triple} -> {commit}{}",
        if mask { " (masked)" } else { "" }
    );
    let commit_flag = format!("--commit={commit}");
    ctx.flatpak(&["update", "--no-deps", "--no-related", &commit_flag, &triple])?;
    if mask {
        ctx.flatpak(&["mask", &triple])?;
        ctx.pinned.insert(reference.clone().at_commit(commit));
    }
    Ok(())
}

/// Release every mask this run holds. Idempotent: the set is drained up
/// front, so a second call is a no-op.
///
/// A failing unmask is reported and skipped rather than propagated; the
/// remaining references still get their release, and the run's primary
/// error (if any) stays visible.
pub fn release_all(ctx: &mut RunContext) {
    for reference in ctx.pinned.take_all() {
        let triple = reference.triple();
        println!("[cleanup] unmasking {triple}");
        if let Err(err) = ctx.flatpak(&["mask", "--remove", &triple]) {
            eprintln!("[cleanup] failed to unmask {triple}: {err}");
        }
    }
}
