// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use backup_types::{RemountLocator, Schedule};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("settings could not be saved: {0}")]
pub struct SettingsError(pub String);

/// Persisted configuration the engine reads and writes.
///
/// Implementations decide where values live; the engine only calls these
/// accessors and never caches their results.
pub trait BackupSettings: Send + Sync {
    fn library_path(&self) -> Option<PathBuf>;

    fn destination_image(&self) -> Option<PathBuf>;

    fn set_destination_image(&self, image: &Path) -> Result<(), SettingsError>;

    fn remount_locator(&self) -> Option<RemountLocator>;

    fn set_remount_locator(&self, locator: Option<RemountLocator>) -> Result<(), SettingsError>;

    fn last_backup(&self) -> Option<DateTime<Utc>>;

    fn set_last_backup(&self, finished_at: DateTime<Utc>) -> Result<(), SettingsError>;

    fn schedule(&self) -> Schedule;

    /// Both locations are set and exist on disk.
    fn is_configured(&self) -> bool {
        match (self.library_path(), self.destination_image()) {
            (Some(library), Some(destination)) => library.exists() && destination.exists(),
            _ => false,
        }
    }
}
