// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the photos backup engine
//!
//! These types are shared by every layer of the stack:
//!
//! - **backup-sys**: returns `MountEntry` values and tool termination data
//! - **backup-engine**: publishes `BackupEvent`s and tracks `EngineState`
//! - **backup-cli**: renders the types and persists `Schedule`
//!
//! Nothing in this crate touches the filesystem or spawns processes; the
//! classification helpers are pure functions over already-measured values.

pub mod common;
pub mod engine;
pub mod library;
pub mod schedule;
pub mod volume;

pub use common::{MEGABYTE, format_megabytes, megabytes_to_bytes};
pub use engine::{BackupEvent, BackupOutcome, EngineState, ProcessKind};
pub use library::{LibraryStatus, backup_feasible, classify};
pub use schedule::{Schedule, ScheduleParseError};
pub use volume::{MountEntry, RemountLocator};
