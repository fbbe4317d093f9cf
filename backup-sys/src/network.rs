// SPDX-License-Identifier: GPL-3.0-only

//! Re-mounting the network share that holds a destination image

use std::ffi::OsString;
use std::path::PathBuf;

use async_trait::async_trait;
use backup_types::RemountLocator;
use tracing::{info, warn};

use crate::error::{Result, SysError};
use crate::process::ProcessRunner;

pub const DEFAULT_NETWORK_MOUNT_TOOL: &str = "/usr/bin/osascript";

/// Stderr fragments meaning the share was already mounted (EEXIST).
const ALREADY_MOUNTED_MARKERS: &[&str] = &["File exists", "already mounted", "(17)"];

#[async_trait]
pub trait NetworkMounter: Send + Sync {
    /// Mount the share named by `locator`. Already mounted counts as success.
    async fn remount(&self, locator: &RemountLocator) -> Result<()>;
}

/// Mounts shares with `osascript -e 'mount volume "<locator>"'`.
#[derive(Debug, Clone)]
pub struct CommandNetworkMounter {
    program: PathBuf,
    runner: ProcessRunner,
}

impl CommandNetworkMounter {
    pub fn new(program: impl Into<PathBuf>, runner: ProcessRunner) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    pub fn args(locator: &RemountLocator) -> Vec<OsString> {
        vec![
            OsString::from("-e"),
            OsString::from(format!("mount volume \"{}\"", locator.as_str().replace('"', "\\\""))),
        ]
    }
}

#[async_trait]
impl NetworkMounter for CommandNetworkMounter {
    async fn remount(&self, locator: &RemountLocator) -> Result<()> {
        info!("Re-mounting network share {}", locator);

        let handle = self
            .runner
            .run(&self.program, &Self::args(locator), None)
            .map_err(|e| SysError::NetworkMountFailed(e.to_string()))?;
        let (termination, _stdout, stderr) = handle.wait_collect().await?;

        if termination.is_success() {
            return Ok(());
        }

        if ALREADY_MOUNTED_MARKERS
            .iter()
            .any(|marker| stderr.contains(marker))
        {
            info!("Network share {} already mounted", locator);
            return Ok(());
        }

        warn!("Mounting {} failed ({}): {}", locator, termination, stderr.trim());
        Err(SysError::NetworkMountFailed(format!(
            "{} ({}): {}",
            locator,
            termination,
            stderr.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn script(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("mount-tool");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        path
    }

    #[test]
    fn builds_applescript_mount_command() {
        let args = CommandNetworkMounter::args(&RemountLocator::new("smb://nas/Backups"));
        assert_eq!(args[1], OsString::from("mount volume \"smb://nas/Backups\""));
    }

    #[tokio::test]
    async fn already_mounted_is_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = script(dir.path(), "echo 'mount error: File exists (17)' >&2; exit 1");
        let mounter = CommandNetworkMounter::new(tool, ProcessRunner::new());

        assert!(mounter.remount(&RemountLocator::new("smb://nas/Backups")).await.is_ok());
    }

    #[tokio::test]
    async fn other_failures_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = script(dir.path(), "echo 'server not found' >&2; exit 1");
        let mounter = CommandNetworkMounter::new(tool, ProcessRunner::new());

        let result = mounter.remount(&RemountLocator::new("smb://nas/Backups")).await;
        assert!(matches!(result, Err(SysError::NetworkMountFailed(_))));
    }
}
