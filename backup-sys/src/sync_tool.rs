// SPDX-License-Identifier: GPL-3.0-only

//! `rsync` invocation and progress parsing

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::process::{ProcessHandle, ProcessRunner};

pub const DEFAULT_SYNC_TOOL: &str = "rsync";

/// `rsync` wrapper
#[derive(Debug, Clone)]
pub struct SyncTool {
    program: PathBuf,
    runner: ProcessRunner,
}

impl SyncTool {
    pub fn new(program: impl Into<PathBuf>, runner: ProcessRunner) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Archive mode with extended attributes, whole-transfer progress and
    /// line-buffered output.
    pub fn args(source: &Path, destination: &Path) -> Vec<OsString> {
        vec![
            OsString::from("-aE"),
            OsString::from("--info=progress2"),
            OsString::from("--outbuf=L"),
            source.as_os_str().to_os_string(),
            destination.as_os_str().to_os_string(),
        ]
    }

    pub fn run(&self, source: &Path, destination: &Path) -> Result<ProcessHandle> {
        info!("Syncing {:?} to {:?}", source, destination);
        self.runner
            .run(&self.program, &Self::args(source, destination), None)
    }
}

/// Extract the completion percentage from one line of progress output.
///
/// Takes the first whitespace-separated token ending in `%` and parses the
/// rest as an integer in 0..=100. Anything else yields `None`.
pub fn parse_progress(line: &str) -> Option<u8> {
    let token = line.split_whitespace().find(|token| token.ends_with('%'))?;
    let percent: u8 = token.strip_suffix('%')?.parse().ok()?;
    (percent <= 100).then_some(percent)
}
