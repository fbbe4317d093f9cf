// SPDX-License-Identifier: GPL-3.0-only

//! Disk image manager
//!
//! Creates, attaches and detaches sparse bundle images through the imaging
//! tool and works out where the resulting volume was mounted. Mount point
//! bookkeeping stays with the engine; this type only reports what happened.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use backup_sys::imaging::{self, ImagingTool};
use backup_sys::{NetworkMounter, SysError, VolumeInspector, resolve_volume};
use backup_types::{ProcessKind, RemountLocator};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::settings::BackupSettings;
use crate::supervisor::{StreamLabels, Supervisor};

/// A freshly created destination image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedVolume {
    pub image: PathBuf,
    /// `None` when the tool succeeded but no volume with the expected name
    /// showed up.
    pub mount_point: Option<PathBuf>,
}

pub struct DiskImageManager {
    imaging: ImagingTool,
    volumes: Arc<dyn VolumeInspector>,
    network: Arc<dyn NetworkMounter>,
    settings: Arc<dyn BackupSettings>,
    supervisor: Supervisor,
}

impl DiskImageManager {
    pub fn new(
        imaging: ImagingTool,
        volumes: Arc<dyn VolumeInspector>,
        network: Arc<dyn NetworkMounter>,
        settings: Arc<dyn BackupSettings>,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            imaging,
            volumes,
            network,
            settings,
            supervisor,
        }
    }

    /// Create a growable image of `size_mb` megabytes at
    /// `directory/volume_name.sparsebundle` and attach it.
    pub async fn create_volume(
        &self,
        directory: &Path,
        volume_name: &str,
        size_mb: u64,
    ) -> Result<CreatedVolume> {
        let handle = self.imaging.create(directory, size_mb, volume_name)?;
        let termination = self
            .supervisor
            .launch(ProcessKind::CreateImage, handle)
            .wait(StreamLabels::DEFAULT, |_, _| {})
            .await?;

        if !termination.is_success() {
            error!("Creating sparse bundle failed: {}", termination);
            return Err(SysError::CreateFailed(termination).into());
        }

        let image = imaging::image_path(directory, volume_name);
        info!("Successfully created sparse bundle at path: {:?}", image);
        self.supervisor
            .log()
            .append(format!("Created sparse bundle at {}", image.display()));

        let mount_point = self.find_volume(volume_name)?;
        self.record_remount_locator(&image);

        Ok(CreatedVolume { image, mount_point })
    }

    /// Attach an existing image and return where its volume was mounted.
    pub async fn mount_volume(&self, image: &Path) -> Result<Option<PathBuf>> {
        let volume_name = imaging::volume_name_for_image(image)
            .filter(|_| imaging::has_image_extension(image))
            .ok_or_else(|| SysError::InvalidTarget(image.to_path_buf()))?;

        if let Some(locator) = self.settings.remount_locator() {
            self.network.remount(&locator).await?;
            self.supervisor.log().append("Remounted network share");
        }

        if let Err(e) = imaging::validate_image(image) {
            error!("Sparse bundle does not exist at {:?}", image);
            return Err(e.into());
        }

        let handle = self.imaging.attach(image)?;
        let termination = self
            .supervisor
            .launch(ProcessKind::AttachImage, handle)
            .wait(StreamLabels::DEFAULT, |_, _| {})
            .await?;

        if !termination.is_success() {
            error!("Attaching {:?} failed: {}", image, termination);
            return Err(SysError::MountFailed(termination).into());
        }

        let mount_point = self.find_volume(volume_name)?;
        self.record_remount_locator(image);
        Ok(mount_point)
    }

    /// Where `image` is attached right now, judged by its volume name.
    pub fn attached_volume(&self, image: &Path) -> Result<Option<PathBuf>> {
        let volume_name = imaging::volume_name_for_image(image)
            .filter(|_| imaging::has_image_extension(image))
            .ok_or_else(|| SysError::InvalidTarget(image.to_path_buf()))?;
        let entries = self.volumes.mounted_volumes()?;
        Ok(resolve_volume(&entries, volume_name))
    }

    /// Unmount and eject the volume at `mount_point`. Failures are logged and
    /// reported as `false`; there is nothing further a caller could do.
    pub async fn detach_volume(&self, mount_point: &Path) -> bool {
        match self.try_detach(mount_point).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to detach {:?}: {}", mount_point, e);
                self.supervisor
                    .log()
                    .append(format!("Unable to detach {}: {}", mount_point.display(), e));
                false
            }
        }
    }

    async fn try_detach(&self, mount_point: &Path) -> Result<()> {
        let handle = self.imaging.detach(mount_point)?;
        let termination = self
            .supervisor
            .launch(ProcessKind::DetachImage, handle)
            .wait(StreamLabels::DEFAULT, |_, _| {})
            .await?;

        if !termination.is_success() {
            return Err(SysError::DetachFailed(termination).into());
        }
        Ok(())
    }

    /// Total capacity of the volume at `path`, queried off the async runtime.
    pub async fn capacity(&self, path: &Path) -> Result<u64> {
        let volumes = self.volumes.clone();
        let path = path.to_path_buf();
        let capacity = tokio::task::spawn_blocking(move || volumes.total_capacity(&path))
            .await
            .map_err(|e| crate::EngineError::Task(e.to_string()))??;
        Ok(capacity)
    }

    fn find_volume(&self, volume_name: &str) -> Result<Option<PathBuf>> {
        let entries = self.volumes.mounted_volumes()?;
        let mount_point = resolve_volume(&entries, volume_name);
        if mount_point.is_none() {
            warn!("No mounted volume named '{}' found", volume_name);
        }
        Ok(mount_point)
    }

    /// Remember how to reach the share holding `image`, or forget the
    /// previous locator when the image is on a local volume.
    fn record_remount_locator(&self, image: &Path) {
        let locator = match self.volumes.entry_for(image) {
            Ok(entry) => entry.as_ref().and_then(RemountLocator::from_entry),
            Err(e) => {
                warn!("Could not determine remount locator for {:?}: {}", image, e);
                return;
            }
        };

        if let Err(e) = self.settings.set_remount_locator(locator) {
            warn!("{}", e);
        }
    }
}
