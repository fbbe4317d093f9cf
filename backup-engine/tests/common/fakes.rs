use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backup_engine::{BackupSettings, SettingsError};
use backup_sys::{NetworkMounter, SysError, VolumeInspector, VolumesDirectory};
use backup_types::{MountEntry, RemountLocator, Schedule};
use chrono::{DateTime, Utc};

/// In-memory settings that count how often the last backup was written.
#[derive(Default)]
pub struct MemorySettings {
    library: Mutex<Option<PathBuf>>,
    destination: Mutex<Option<PathBuf>>,
    locator: Mutex<Option<RemountLocator>>,
    last_backup: Mutex<Option<DateTime<Utc>>>,
    last_backup_writes: Mutex<usize>,
}

impl MemorySettings {
    pub fn with_library(library: Option<PathBuf>) -> Self {
        let settings = Self::default();
        *settings.library.lock().unwrap() = library;
        settings
    }

    pub fn set_library(&self, library: Option<PathBuf>) {
        *self.library.lock().unwrap() = library;
    }

    pub fn set_locator(&self, locator: Option<RemountLocator>) {
        *self.locator.lock().unwrap() = locator;
    }

    pub fn last_backup_writes(&self) -> usize {
        *self.last_backup_writes.lock().unwrap()
    }
}

impl BackupSettings for MemorySettings {
    fn library_path(&self) -> Option<PathBuf> {
        self.library.lock().unwrap().clone()
    }

    fn destination_image(&self) -> Option<PathBuf> {
        self.destination.lock().unwrap().clone()
    }

    fn set_destination_image(&self, image: &Path) -> Result<(), SettingsError> {
        *self.destination.lock().unwrap() = Some(image.to_path_buf());
        Ok(())
    }

    fn remount_locator(&self) -> Option<RemountLocator> {
        self.locator.lock().unwrap().clone()
    }

    fn set_remount_locator(&self, locator: Option<RemountLocator>) -> Result<(), SettingsError> {
        *self.locator.lock().unwrap() = locator;
        Ok(())
    }

    fn last_backup(&self) -> Option<DateTime<Utc>> {
        *self.last_backup.lock().unwrap()
    }

    fn set_last_backup(&self, finished_at: DateTime<Utc>) -> Result<(), SettingsError> {
        *self.last_backup.lock().unwrap() = Some(finished_at);
        *self.last_backup_writes.lock().unwrap() += 1;
        Ok(())
    }

    fn schedule(&self) -> Schedule {
        Schedule::Disabled
    }
}

/// Holds capacity queries back while closed. Starts open.
pub struct CapacityGate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Default for CapacityGate {
    fn default() -> Self {
        Self {
            open: Mutex::new(true),
            changed: Condvar::new(),
        }
    }
}

impl CapacityGate {
    const MAX_HOLD: Duration = Duration::from_secs(5);

    pub fn close(&self) {
        *self.open.lock().unwrap() = false;
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }

    /// Block until opened. Gives up after a few seconds so a forgotten gate
    /// cannot hang runtime shutdown.
    fn pass(&self) -> bool {
        let deadline = Instant::now() + Self::MAX_HOLD;
        let mut open = self.open.lock().unwrap();
        while !*open {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            open = self.changed.wait_timeout(open, deadline - now).unwrap().0;
        }
        true
    }
}

/// Directory-backed volumes reporting a fixed capacity once the gate lets
/// the query through.
pub struct FixedCapacityVolumes {
    pub volumes: VolumesDirectory,
    pub capacity: u64,
    pub gate: Arc<CapacityGate>,
}

impl VolumeInspector for FixedCapacityVolumes {
    fn mounted_volumes(&self) -> backup_sys::Result<Vec<MountEntry>> {
        self.volumes.mounted_volumes()
    }

    fn total_capacity(&self, path: &Path) -> backup_sys::Result<u64> {
        if self.gate.pass() {
            Ok(self.capacity)
        } else {
            Err(SysError::CapacityUnavailable(path.to_path_buf()))
        }
    }
}

/// Records every remount request. Succeeds unless a failure was set.
#[derive(Default)]
pub struct RecordingMounter {
    pub calls: Mutex<Vec<RemountLocator>>,
    failure: Mutex<Option<String>>,
}

impl RecordingMounter {
    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }
}

#[async_trait]
impl NetworkMounter for RecordingMounter {
    async fn remount(&self, locator: &RemountLocator) -> backup_sys::Result<()> {
        self.calls.lock().unwrap().push(locator.clone());
        match self.failure.lock().unwrap().clone() {
            Some(reason) => Err(SysError::NetworkMountFailed(reason)),
            None => Ok(()),
        }
    }
}
