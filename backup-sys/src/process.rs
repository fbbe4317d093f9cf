// SPDX-License-Identifier: GPL-3.0-only

//! External process runner
//!
//! Each spawned tool gets one reader task per captured stream. Readers push
//! decoded text onto a shared channel; [`ProcessHandle::wait_with`] drains
//! that channel while waiting for the child, so stream delivery is never
//! starved by the wait and every chunk is delivered before the termination
//! result is returned.

use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use which::which;

use crate::error::{Result, SysError};

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How long to keep draining output after the child exits. Output is
/// abandoned after this if a grandchild still holds the pipes open.
const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A piece of decoded output. May end mid-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub text: String,
}

/// How an external process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    /// Killed by a signal (if known) or ended without an exit code.
    SignalOrAbnormal(Option<i32>),
}

impl Termination {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Termination::Exited(code),
            None => Termination::SignalOrAbnormal(status.signal()),
        }
    }

    /// Exit code 0 is the only success signal.
    pub fn is_success(self) -> bool {
        self == Termination::Exited(0)
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exit status {}", code),
            Termination::SignalOrAbnormal(Some(signal)) => {
                write!(f, "terminated by signal {}", signal)
            }
            Termination::SignalOrAbnormal(None) => write!(f, "terminated abnormally"),
        }
    }
}

/// Resolve a tool given either as a path or as a bare name looked up on `PATH`.
pub fn locate(program: &str) -> Result<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        return if path.exists() {
            Ok(path)
        } else {
            Err(SysError::ToolNotFound(program.to_string()))
        };
    }

    which(program).map_err(|_| SysError::ToolNotFound(program.to_string()))
}

/// Send SIGTERM to a running process.
pub fn terminate(pid: u32) -> Result<()> {
    let pid = i32::try_from(pid).map_err(|_| {
        SysError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("process id {} out of range", pid),
        ))
    })?;

    signal::kill(Pid::from_raw(pid), Signal::SIGTERM)
        .map_err(|errno| SysError::Io(std::io::Error::from(errno)))
}

/// Spawns external processes with captured output.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    drain_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch `program` with `args`, optionally inside `working_directory`.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// [`SysError::Spawn`] when the executable cannot be found or launched.
    pub fn run(
        &self,
        program: &Path,
        args: &[OsString],
        working_directory: Option<&Path>,
    ) -> Result<ProcessHandle> {
        let rendered = render(program, args);
        debug!("Spawning {}", rendered);

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(directory) = working_directory {
            command.current_dir(directory);
        }

        let mut child = command.spawn().map_err(|error| SysError::Spawn {
            program: program.display().to_string(),
            reason: error.to_string(),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, StreamKind::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, StreamKind::Stderr, tx.clone()));
        }
        drop(tx);

        Ok(ProcessHandle {
            command: rendered,
            child,
            output: rx,
            readers,
            drain_grace: self.drain_grace,
        })
    }
}

/// A running external process.
#[derive(Debug)]
pub struct ProcessHandle {
    command: String,
    child: Child,
    output: mpsc::UnboundedReceiver<OutputChunk>,
    readers: Vec<JoinHandle<()>>,
    drain_grace: Duration,
}

impl ProcessHandle {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// The command line as it was launched, for log messages.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait for the process to end, handing every output chunk to
    /// `on_output` as it arrives.
    ///
    /// `on_output` is never called after this returns, and the termination
    /// result is produced exactly once.
    pub async fn wait_with<F>(mut self, mut on_output: F) -> Result<Termination>
    where
        F: FnMut(OutputChunk),
    {
        let status = loop {
            tokio::select! {
                biased;
                Some(chunk) = self.output.recv() => on_output(chunk),
                status = self.child.wait() => break status?,
            }
        };

        let deadline = tokio::time::Instant::now() + self.drain_grace;
        loop {
            match tokio::time::timeout_at(deadline, self.output.recv()).await {
                Ok(Some(chunk)) => on_output(chunk),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Abandoning remaining output of `{}` after it exited",
                        self.command
                    );
                    break;
                }
            }
        }

        for reader in self.readers.drain(..) {
            reader.abort();
        }

        let termination = Termination::from_status(status);
        debug!("`{}` finished: {}", self.command, termination);
        Ok(termination)
    }

    /// Wait for the process, collecting its output per stream.
    pub async fn wait_collect(self) -> Result<(Termination, String, String)> {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let termination = self
            .wait_with(|chunk| match chunk.stream {
                StreamKind::Stdout => stdout.push_str(&chunk.text),
                StreamKind::Stderr => stderr.push_str(&chunk.text),
            })
            .await?;
        Ok((termination, stdout, stderr))
    }
}

fn spawn_reader<R>(
    mut stream: R,
    kind: StreamKind,
    tx: mpsc::UnboundedSender<OutputChunk>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = vec![0u8; READ_CHUNK_BYTES];
        let mut pending = Vec::new();

        loop {
            match stream.read(&mut buffer).await {
                Ok(0) => break,
                Ok(read) => {
                    let text = decode_chunk(&mut pending, &buffer[..read]);
                    if !text.is_empty() && tx.send(OutputChunk { stream: kind, text }).is_err() {
                        return;
                    }
                }
                Err(error) => {
                    warn!("Failed reading {:?} of child process: {}", kind, error);
                    break;
                }
            }
        }

        if !pending.is_empty() {
            let text = String::from_utf8_lossy(&pending).into_owned();
            let _ = tx.send(OutputChunk { stream: kind, text });
        }
    })
}

/// Decode as much of `pending + bytes` as forms valid UTF-8, keeping an
/// incomplete trailing sequence for the next read.
fn decode_chunk(pending: &mut Vec<u8>, bytes: &[u8]) -> String {
    pending.extend_from_slice(bytes);

    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(error) if error.error_len().is_none() => {
            let valid = error.valid_up_to();
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

pub fn render(program: &Path, args: &[OsString]) -> String {
    let mut rendered = program.display().to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
