// SPDX-License-Identifier: GPL-3.0-only

//! Backup engine for photo library backups onto sparse bundle images
//!
//! [`BackupEngine`] owns the mutable state of a backup session: the mount
//! point of the destination volume, its capacity, the single active external
//! process and the user-facing log. It composes the disk image manager and
//! the sync runner and publishes [`BackupEvent`](backup_types::BackupEvent)s
//! to subscribers.
//!
//! Persisted settings are reached through the [`BackupSettings`] trait so
//! the engine never decides how configuration is stored.

pub mod engine;
pub mod error;
pub mod events;
pub mod images;
pub mod log_buffer;
pub mod settings;
pub mod supervisor;
pub mod sync;

pub use engine::{BackupEngine, BackupJob, EngineComponents};
pub use error::{EngineError, Result};
pub use events::{EventBus, SubscriptionId};
pub use images::{CreatedVolume, DiskImageManager};
pub use log_buffer::LogBuffer;
pub use settings::{BackupSettings, SettingsError};
pub use supervisor::{ActiveProcess, Supervisor};
pub use sync::{SyncJob, SyncRunner};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
