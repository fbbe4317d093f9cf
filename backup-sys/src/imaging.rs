// SPDX-License-Identifier: GPL-3.0-only

//! Disk image operations through the `hdiutil` command-line tool
//!
//! Only command construction and invocation live here; tracking which
//! volume is mounted is the engine's job.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, SysError};
use crate::process::{ProcessHandle, ProcessRunner};

pub const DEFAULT_IMAGING_TOOL: &str = "/usr/bin/hdiutil";

/// File extension of growable sparse bundle images.
pub const IMAGE_EXTENSION: &str = "sparsebundle";

/// Volume name given to images created by the engine.
pub const DEFAULT_VOLUME_NAME: &str = "photosBackup";

const IMAGE_TYPE: &str = "SPARSEBUNDLE";
const IMAGE_FILESYSTEM: &str = "HFS+";

/// `hdiutil` wrapper
#[derive(Debug, Clone)]
pub struct ImagingTool {
    program: PathBuf,
    runner: ProcessRunner,
}

impl ImagingTool {
    pub fn new(program: impl Into<PathBuf>, runner: ProcessRunner) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    pub fn create_args(size_mb: u64, volume_name: &str) -> Vec<OsString> {
        let size = format!("{}m", size_mb);
        [
            "create",
            "-size",
            size.as_str(),
            "-type",
            IMAGE_TYPE,
            "-fs",
            IMAGE_FILESYSTEM,
            "-volname",
            volume_name,
            "-attach",
            volume_name,
        ]
        .into_iter()
        .map(OsString::from)
        .collect()
    }

    pub fn attach_args(image: &Path) -> Vec<OsString> {
        vec![
            OsString::from("attach"),
            image.as_os_str().to_os_string(),
            OsString::from("-nobrowse"),
        ]
    }

    pub fn detach_args(mount_point: &Path) -> Vec<OsString> {
        vec![OsString::from("detach"), mount_point.as_os_str().to_os_string()]
    }

    /// Create and attach a new sparse bundle named `volume_name` inside
    /// `directory`.
    pub fn create(&self, directory: &Path, size_mb: u64, volume_name: &str) -> Result<ProcessHandle> {
        info!(
            "Creating {} MB sparse bundle '{}' in {:?}",
            size_mb, volume_name, directory
        );
        self.runner.run(
            &self.program,
            &Self::create_args(size_mb, volume_name),
            Some(directory),
        )
    }

    /// Attach an existing image without registering it with the file browser.
    pub fn attach(&self, image: &Path) -> Result<ProcessHandle> {
        info!("Attaching sparse bundle {:?}", image);
        self.runner.run(&self.program, &Self::attach_args(image), None)
    }

    /// Unmount and eject the volume mounted at `mount_point`.
    pub fn detach(&self, mount_point: &Path) -> Result<ProcessHandle> {
        info!("Detaching volume {:?}", mount_point);
        self.runner
            .run(&self.program, &Self::detach_args(mount_point), None)
    }
}

pub fn image_path(directory: &Path, volume_name: &str) -> PathBuf {
    directory.join(format!("{}.{}", volume_name, IMAGE_EXTENSION))
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(IMAGE_EXTENSION)
}

/// The volume name an image mounts under: its file name without extension.
pub fn volume_name_for_image(image: &Path) -> Option<&str> {
    image.file_stem().and_then(|stem| stem.to_str())
}

/// Check that `image` is an existing sparse bundle before anything is spawned.
pub fn validate_image(image: &Path) -> Result<()> {
    if has_image_extension(image) && image.exists() {
        Ok(())
    } else {
        Err(SysError::InvalidTarget(image.to_path_buf()))
    }
}
