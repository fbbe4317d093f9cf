// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use backup_sys::SysError;
use thiserror::Error;

use crate::settings::SettingsError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("the selected photos library could not be found at {0}")]
    SourceNotFound(PathBuf),

    #[error("the disk image mount point is not reachable: {0}")]
    DestinationUnreachable(PathBuf),

    #[error("no {0} configured")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Sys(#[from] SysError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
