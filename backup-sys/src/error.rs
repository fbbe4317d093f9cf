// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

use crate::process::Termination;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to launch {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{0} not found")]
    ToolNotFound(String),

    #[error("not a disk image that can be mounted: {0}")]
    InvalidTarget(PathBuf),

    #[error("could not create backup destination disk image ({0})")]
    CreateFailed(Termination),

    #[error("unable to mount backup destination disk image ({0})")]
    MountFailed(Termination),

    #[error("unable to re-mount the network share holding the disk image: {0}")]
    NetworkMountFailed(String),

    #[error("detach failed ({0})")]
    DetachFailed(Termination),

    #[error("volume capacity unavailable for {0}")]
    CapacityUnavailable(PathBuf),

    #[error("could not read mount table: {0}")]
    MountTable(String),
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
