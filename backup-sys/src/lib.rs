// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for photos backup
//!
//! This crate wraps everything that talks to the operating system directly:
//! - Spawning external tools with streamed stdout/stderr
//! - Building `hdiutil` invocations for sparse bundle images
//! - Building `rsync` invocations and parsing their progress output
//! - Reading the mount table and querying volume capacity
//! - Measuring the photo library size and re-mounting network shares
//!
//! It holds no engine state; `backup-engine` composes these pieces.

pub mod error;
pub mod imaging;
pub mod library;
pub mod network;
pub mod output;
pub mod process;
pub mod sync_tool;
pub mod volumes;

pub use error::{Result, SysError};
pub use imaging::{DEFAULT_VOLUME_NAME, IMAGE_EXTENSION, ImagingTool};
pub use library::library_size;
pub use network::{CommandNetworkMounter, NetworkMounter};
pub use output::LineBuffer;
pub use process::{OutputChunk, ProcessHandle, ProcessRunner, StreamKind, Termination};
pub use sync_tool::{SyncTool, parse_progress};
pub use volumes::{SystemVolumes, VolumeInspector, VolumesDirectory, resolve_volume};
