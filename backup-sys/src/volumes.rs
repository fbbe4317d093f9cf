// SPDX-License-Identifier: GPL-3.0-only

//! Mounted volume discovery and capacity queries

use std::fs;
use std::path::{Path, PathBuf};

use backup_types::MountEntry;
use nix::sys::statvfs::statvfs;
use tracing::debug;

use crate::error::{Result, SysError};

/// Source of the list of currently mounted volumes.
pub trait VolumeInspector: Send + Sync {
    fn mounted_volumes(&self) -> Result<Vec<MountEntry>>;

    /// Total size in bytes of the filesystem mounted at `path`.
    fn total_capacity(&self, path: &Path) -> Result<u64> {
        statvfs_capacity(path)
    }

    /// The mount holding `path`, choosing the deepest mount point.
    fn entry_for(&self, path: &Path) -> Result<Option<MountEntry>> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let entries = self.mounted_volumes()?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.contains(&canonical) || entry.contains(path))
            .max_by_key(|entry| entry.mount_point.components().count()))
    }
}

/// First mounted volume whose last path component is exactly `volume_name`.
pub fn resolve_volume(entries: &[MountEntry], volume_name: &str) -> Option<PathBuf> {
    entries
        .iter()
        .find(|entry| entry.volume_name() == Some(volume_name))
        .map(|entry| entry.mount_point.clone())
}

pub fn statvfs_capacity(path: &Path) -> Result<u64> {
    let stat = statvfs(path).map_err(|errno| {
        debug!("statvfs failed for {:?}: {}", path, errno);
        SysError::CapacityUnavailable(path.to_path_buf())
    })?;

    let capacity = (stat.blocks() as u64).saturating_mul(stat.fragment_size() as u64);
    if capacity == 0 {
        return Err(SysError::CapacityUnavailable(path.to_path_buf()));
    }
    Ok(capacity)
}

/// The operating system's mount table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVolumes;

impl VolumeInspector for SystemVolumes {
    #[cfg(target_os = "linux")]
    fn mounted_volumes(&self) -> Result<Vec<MountEntry>> {
        let mount_info = fs::read_to_string("/proc/self/mountinfo")?;
        parse_mountinfo(&mount_info)
    }

    #[cfg(not(target_os = "linux"))]
    fn mounted_volumes(&self) -> Result<Vec<MountEntry>> {
        let output = std::process::Command::new("/sbin/mount")
            .output()
            .map_err(|e| SysError::MountTable(format!("failed to run mount: {}", e)))?;

        if !output.status.success() {
            return Err(SysError::MountTable(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        Ok(parse_mount_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Treats every directory under `root` as a mounted volume, the way
/// attached images appear under `/Volumes`.
#[derive(Debug, Clone)]
pub struct VolumesDirectory {
    root: PathBuf,
}

impl VolumesDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl VolumeInspector for VolumesDirectory {
    fn mounted_volumes(&self) -> Result<Vec<MountEntry>> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            entries.push(MountEntry::new(
                entry.file_name().to_string_lossy(),
                path,
                "local",
            ));
        }

        entries.sort_by(|left, right| left.mount_point.cmp(&right.mount_point));
        Ok(entries)
    }
}

/// Parse `/proc/self/mountinfo`.
pub fn parse_mountinfo(input: &str) -> Result<Vec<MountEntry>> {
    let mut entries = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let invalid = || SysError::MountTable(format!("invalid mountinfo line: {}", line));

        let (left, right) = line.split_once(" - ").ok_or_else(invalid)?;
        let mount_point = left.split_whitespace().nth(4).ok_or_else(invalid)?;

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields.next().ok_or_else(invalid)?;
        let device = right_fields.next().unwrap_or("none");

        entries.push(MountEntry::new(
            unescape_mount_field(device),
            unescape_mount_field(mount_point),
            fs_type,
        ));
    }

    Ok(entries)
}

/// Parse BSD `mount` output, e.g.
/// `//user@nas/Backups on /Volumes/Backups (smbfs, nodev, nosuid)`.
pub fn parse_mount_output(input: &str) -> Vec<MountEntry> {
    input
        .lines()
        .filter_map(|line| {
            let (left, options) = line.trim().rsplit_once(" (")?;
            let (device, mount_point) = left.split_once(" on ")?;
            let fs_type = options
                .split([',', ')'])
                .next()
                .map(str::trim)
                .filter(|fs| !fs.is_empty())?;
            Some(MountEntry::new(device, mount_point, fs_type))
        })
        .collect()
}

/// Decode `\040`-style octal escapes used in the kernel mount tables.
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            if let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8) {
                output.push(num);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}
