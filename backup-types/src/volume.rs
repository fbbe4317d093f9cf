// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const NETWORK_FS_TYPES: &[&str] = &["smbfs", "cifs", "smb3", "afpfs", "webdav", "davfs"];

/// One row of the system mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

impl MountEntry {
    pub fn new(
        device: impl Into<String>,
        mount_point: impl Into<PathBuf>,
        fs_type: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            mount_point: mount_point.into(),
            fs_type: fs_type.into(),
        }
    }

    pub fn is_network(&self) -> bool {
        NETWORK_FS_TYPES.contains(&self.fs_type.as_str()) || self.fs_type.starts_with("nfs")
    }

    /// Last path component of the mount point, the name a volume shows up as.
    pub fn volume_name(&self) -> Option<&str> {
        self.mount_point.file_name().and_then(|name| name.to_str())
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.mount_point)
    }
}

/// Handle that lets a network share holding the destination image be
/// re-attached without knowing its mount parameters, e.g.
/// `smb://user@nas/Backups`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemountLocator(String);

impl RemountLocator {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a locator for the share backing `entry`, or `None` when the
    /// entry is a local filesystem.
    pub fn from_entry(entry: &MountEntry) -> Option<Self> {
        if !entry.is_network() {
            return None;
        }

        let device = entry.device.as_str();
        if device.contains("://") {
            return Some(Self::new(device));
        }

        let locator = match entry.fs_type.as_str() {
            "smbfs" | "cifs" | "smb3" => format!("smb:{}", ensure_slashes(device)),
            "afpfs" => format!("afp:{}", ensure_slashes(device)),
            fs if fs.starts_with("nfs") => {
                let (server, export) = device.split_once(':')?;
                format!("nfs://{}/{}", server, export.trim_start_matches('/'))
            }
            _ => return None,
        };

        Some(Self(locator))
    }
}

fn ensure_slashes(device: &str) -> String {
    if device.starts_with("//") {
        device.to_string()
    } else {
        format!("//{}", device.trim_start_matches('/'))
    }
}

impl std::fmt::Display for RemountLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
