// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use backup_sys::{StreamKind, SyncTool, Termination, parse_progress};
use backup_types::ProcessKind;

use crate::error::{EngineError, Result};
use crate::supervisor::{StreamLabels, SupervisedProcess, Supervisor};

/// Runs the sync tool from the library to a mounted destination.
#[derive(Debug, Clone)]
pub struct SyncRunner {
    tool: SyncTool,
    supervisor: Supervisor,
}

impl SyncRunner {
    pub fn new(tool: SyncTool, supervisor: Supervisor) -> Self {
        Self { tool, supervisor }
    }

    /// Check preconditions and launch the sync tool. Returns as soon as the
    /// process is running; [`SyncJob::run`] waits for it.
    pub fn start(&self, source: &Path, destination: &Path) -> Result<SyncJob> {
        if !source.exists() {
            return Err(EngineError::SourceNotFound(source.to_path_buf()));
        }
        if !destination.exists() {
            return Err(EngineError::DestinationUnreachable(destination.to_path_buf()));
        }

        let handle = self.tool.run(source, destination)?;
        Ok(SyncJob {
            process: self.supervisor.launch(ProcessKind::Sync, handle),
        })
    }
}

/// A running sync.
pub struct SyncJob {
    process: SupervisedProcess,
}

impl SyncJob {
    pub fn id(&self) -> Option<u32> {
        self.process.id()
    }

    /// Pump the tool's output until it exits, calling `on_progress` for every
    /// stdout line that carries a percentage. Lines without one are only
    /// logged.
    pub async fn run<F>(self, mut on_progress: F) -> Result<Termination>
    where
        F: FnMut(u8),
    {
        self.process
            .wait(StreamLabels::SYNC, |stream, line| {
                if stream == StreamKind::Stdout
                    && let Some(percent) = parse_progress(line)
                {
                    on_progress(percent);
                }
            })
            .await
    }
}
