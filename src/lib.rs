//! Rebuild published flatpaks and compare them to the originals.
//!
//! Given a package published on a remote, this crate reconstructs the
//! exact historical dependency set that produced it (runtime, SDK, SDK
//! extensions, base app, builder), forces the local installation into
//! that state, rebuilds the app from its packaging source, and compares
//! the rebuilt artifact to the published one byte for byte.
//!
//! # Architecture
//!
//! ```text
//! run (driver)
//!     │
//!     ├── resolver ── discovers the references to pin
//!     ├── pin ─────── forces exact commits, masks against updates,
//!     │               and releases every mask on every exit path
//!     ├── verify ──── read-back check with one bounded self-heal
//!     ├── build ───── fetch phase, then no-network build phase
//!     ├── source ──── packaging repository checkout (git)
//!     ├── snapshot ── artifact checkout + diff verdict (ostree)
//!     └── stats ───── one JSON record per run
//! ```
//!
//! All host mutation flows through the [`flatpak`] command gateway; the
//! in-process [`pin::PinnedSet`] mirrors exactly the masks this run owns
//! and is empty again by process exit on every path.

pub mod build;
pub mod error;
pub mod flatpak;
pub mod manifest;
pub mod pin;
pub mod preflight;
pub mod reference;
pub mod resolver;
pub mod run;
pub mod snapshot;
pub mod source;
pub mod stats;
pub mod verify;

pub use error::{RebuildError, Result};
pub use flatpak::{CommandRunner, HostRunner, Installation};
pub use reference::Ref;
pub use run::{rebuild, RebuildOptions, RunOutcome};
