// SPDX-License-Identifier: GPL-3.0-only

//! Tracking of the single active external process
//!
//! Every tool the engine launches goes through [`Supervisor::launch`], which
//! records it as the active process, and [`SupervisedProcess::wait`], which
//! pumps its output into the log line by line. The active slot is released
//! by a drop guard, so no exit path can leave it set. A guard only clears the
//! entry it created; a replaced entry belongs to its newer launch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use backup_sys::{LineBuffer, ProcessHandle, StreamKind, Termination};
use backup_types::{BackupEvent, ProcessKind};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::log_buffer::LogBuffer;

/// Prefixes used when copying a process's output into the log.
#[derive(Debug, Clone, Copy)]
pub struct StreamLabels {
    pub stdout: &'static str,
    pub stderr: &'static str,
}

impl StreamLabels {
    pub const DEFAULT: StreamLabels = StreamLabels {
        stdout: "StdOut",
        stderr: "StdErr",
    };

    pub const SYNC: StreamLabels = StreamLabels {
        stdout: "Rsync",
        stderr: "RsyncError",
    };

    fn for_stream(self, stream: StreamKind) -> &'static str {
        match stream {
            StreamKind::Stdout => self.stdout,
            StreamKind::Stderr => self.stderr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveProcess {
    pub kind: ProcessKind,
    pub pid: Option<u32>,
    pub command: String,
}

#[derive(Debug, Clone)]
struct Slot {
    id: u64,
    process: ActiveProcess,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    log: Arc<LogBuffer>,
    events: Arc<EventBus>,
    active: Arc<watch::Sender<Option<Slot>>>,
    next_id: Arc<AtomicU64>,
}

impl Supervisor {
    pub fn new(log: Arc<LogBuffer>, events: Arc<EventBus>) -> Self {
        Self {
            log,
            events,
            active: Arc::new(watch::Sender::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn active(&self) -> Option<ActiveProcess> {
        self.active
            .borrow()
            .as_ref()
            .map(|slot| slot.process.clone())
    }

    /// Resolve once no tracked process is active.
    pub async fn wait_idle(&self) {
        let mut receiver = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = receiver.wait_for(Option::is_none).await;
    }

    /// Record `handle` as the active process.
    ///
    /// Callers must not launch a second tracked process while one is active;
    /// a replaced entry is only logged.
    pub fn launch(&self, kind: ProcessKind, handle: ProcessHandle) -> SupervisedProcess {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Slot {
            id,
            process: ActiveProcess {
                kind,
                pid: handle.id(),
                command: handle.command().to_string(),
            },
        };

        if let Some(previous) = self.active.send_replace(Some(slot)) {
            warn!(
                "Started {} while {} was still active",
                kind.label(),
                previous.process.kind.label()
            );
        }

        self.log.append(format!("Running {}", handle.command()));
        self.events.publish(&BackupEvent::ActiveProcessChanged {
            process: Some(kind),
        });

        SupervisedProcess {
            handle,
            guard: ActiveGuard {
                supervisor: self.clone(),
                id,
            },
        }
    }

    /// Send SIGTERM to the active process, if any.
    pub fn terminate_active(&self) -> bool {
        let Some(active) = self.active() else {
            return false;
        };
        let Some(pid) = active.pid else {
            return false;
        };

        info!("Terminating active {} process {}", active.kind.label(), pid);
        match backup_sys::process::terminate(pid) {
            Ok(()) => {
                self.log
                    .append(format!("Terminated {} process {}", active.kind.label(), pid));
                true
            }
            Err(e) => {
                warn!("Failed to terminate process {}: {}", pid, e);
                false
            }
        }
    }

    fn release(&self, id: u64) {
        let cleared = self.active.send_if_modified(|slot| {
            if slot.as_ref().is_some_and(|current| current.id == id) {
                *slot = None;
                true
            } else {
                false
            }
        });

        if cleared {
            self.events
                .publish(&BackupEvent::ActiveProcessChanged { process: None });
        }
    }
}

struct ActiveGuard {
    supervisor: Supervisor,
    id: u64,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.supervisor.release(self.id);
    }
}

/// A launched process that is the engine's active process until waited on
/// or dropped.
pub struct SupervisedProcess {
    handle: ProcessHandle,
    guard: ActiveGuard,
}

impl SupervisedProcess {
    pub fn id(&self) -> Option<u32> {
        self.handle.id()
    }

    /// Wait for exit, logging every output line under `labels` and passing
    /// each line to `on_line`.
    pub async fn wait<F>(self, labels: StreamLabels, mut on_line: F) -> Result<Termination>
    where
        F: FnMut(StreamKind, &str),
    {
        let SupervisedProcess { handle, guard } = self;
        let log = guard.supervisor.log.clone();

        let mut stdout = LineBuffer::new();
        let mut stderr = LineBuffer::new();

        let mut emit = |stream: StreamKind, line: &str| {
            log.append(format!("{}: {}", labels.for_stream(stream), line));
            on_line(stream, line);
        };

        let result = handle
            .wait_with(|chunk| {
                let buffer = match chunk.stream {
                    StreamKind::Stdout => &mut stdout,
                    StreamKind::Stderr => &mut stderr,
                };
                for line in buffer.push(&chunk.text) {
                    emit(chunk.stream, &line);
                }
            })
            .await;

        if let Some(line) = stdout.finish() {
            emit(StreamKind::Stdout, &line);
        }
        if let Some(line) = stderr.finish() {
            emit(StreamKind::Stderr, &line);
        }

        drop(guard);
        result.map_err(EngineError::from)
    }
}
