// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the backup engine's destination volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Unmounted,
    Mounting,
    Mounted,
    BackingUp,
    Detaching,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Unmounted => "unmounted",
            EngineState::Mounting => "mounting",
            EngineState::Mounted => "mounted",
            EngineState::BackingUp => "backing up",
            EngineState::Detaching => "detaching",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the currently tracked external process is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    CreateImage,
    AttachImage,
    DetachImage,
    Sync,
}

impl ProcessKind {
    pub fn label(self) -> &'static str {
        match self {
            ProcessKind::CreateImage => "create image",
            ProcessKind::AttachImage => "attach image",
            ProcessKind::DetachImage => "detach image",
            ProcessKind::Sync => "sync",
        }
    }
}

/// Notifications published by the engine to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BackupEvent {
    /// Fired on every assignment, including reassignment of the same value.
    MountPointChanged { mount_point: Option<PathBuf> },
    StateChanged { state: EngineState },
    ActiveProcessChanged { process: Option<ProcessKind> },
    /// Total transfer progress, 0-100.
    Progress { percent: u8 },
    Completed { finished_at: DateTime<Utc> },
    Failed { reason: String },
}

/// Result of one synchronization attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BackupOutcome {
    Succeeded { finished_at: DateTime<Utc> },
    Failed { reason: String },
}

impl BackupOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BackupOutcome::Succeeded { .. })
    }

    pub fn to_event(&self) -> BackupEvent {
        match self {
            BackupOutcome::Succeeded { finished_at } => BackupEvent::Completed {
                finished_at: *finished_at,
            },
            BackupOutcome::Failed { reason } => BackupEvent::Failed {
                reason: reason.clone(),
            },
        }
    }
}
