// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use backup_engine::{BackupEngine, BackupSettings, EngineComponents};
use backup_sys::imaging::has_image_extension;
use backup_sys::{
    CommandNetworkMounter, DEFAULT_VOLUME_NAME, ImagingTool, ProcessRunner, SyncTool,
    SystemVolumes, VolumeInspector, VolumesDirectory,
};
use backup_types::{BackupEvent, BackupOutcome, LibraryStatus, Schedule, format_megabytes};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{TomlSettings, resolve_program};

#[derive(Subcommand)]
pub enum Setting {
    /// Photo library to back up
    Library { path: PathBuf },
    /// Sparse bundle image to back up into
    Destination { image: PathBuf },
    /// How often `watch` backs up: hourly, daily, weekly or disabled
    Schedule { schedule: Schedule },
}

pub fn build_engine(settings: Arc<TomlSettings>) -> anyhow::Result<BackupEngine> {
    let config = settings.snapshot();
    let runner = ProcessRunner::new();

    let volumes: Arc<dyn VolumeInspector> = match config.volumes_root {
        Some(root) => Arc::new(VolumesDirectory::new(root)),
        None => Arc::new(SystemVolumes),
    };

    Ok(BackupEngine::new(EngineComponents {
        imaging: ImagingTool::new(resolve_program(&config.tools.imaging)?, runner.clone()),
        sync: SyncTool::new(resolve_program(&config.tools.sync)?, runner.clone()),
        network: Arc::new(CommandNetworkMounter::new(
            resolve_program(&config.tools.network_mount)?,
            runner,
        )),
        volumes,
        settings,
    }))
}

/// Progress goes to stdout as it arrives; outcomes are reported by the
/// command that started the backup.
pub fn print_progress(event: &BackupEvent) {
    if let BackupEvent::Progress { percent } = event {
        println!("Progress: {}%", percent);
    }
}

pub fn configure(settings: &TomlSettings, setting: Setting) -> anyhow::Result<()> {
    match setting {
        Setting::Library { path } => {
            if !path.exists() {
                warn!("Photos library {:?} does not exist yet", path);
            }
            settings.update(|config| config.library = Some(path.clone()))?;
            println!("Library set to {}", path.display());
        }
        Setting::Destination { image } => {
            if !has_image_extension(&image) {
                bail!("{} is not a .sparsebundle image", image.display());
            }
            settings.update(|config| {
                config.destination = Some(image.clone());
                config.remount_locator = None;
            })?;
            println!("Destination set to {}", image.display());
        }
        Setting::Schedule { schedule } => {
            settings.update(|config| config.schedule = schedule)?;
            println!("Schedule set to {}", schedule);
        }
    }

    info!("Saved configuration to {}", settings.path().display());
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub library: Option<PathBuf>,
    pub library_status: LibraryStatus,
    pub library_size: Option<u64>,
    pub destination: Option<PathBuf>,
    pub mount_point: Option<PathBuf>,
    pub capacity: Option<u64>,
    pub backup_feasible: bool,
    pub schedule: Schedule,
    pub last_backup: Option<DateTime<Utc>>,
}

impl StatusReport {
    pub async fn collect(engine: &BackupEngine) -> Self {
        let settings = engine.settings();
        Self {
            library: settings.library_path(),
            library_status: engine.library_status().await,
            library_size: engine.source_size().await,
            destination: settings.destination_image(),
            mount_point: engine.mount_point(),
            capacity: engine.mount_capacity(),
            backup_feasible: engine.is_backup_feasible().await,
            schedule: settings.schedule(),
            last_backup: settings.last_backup(),
        }
    }

    pub fn render(&self) -> String {
        let library = match (&self.library, self.library_size) {
            (Some(path), Some(size)) => format!(
                "{} ({}, {})",
                path.display(),
                self.library_status,
                format_megabytes(size)
            ),
            (Some(path), None) => format!("{} ({})", path.display(), self.library_status),
            (None, _) => "not set".to_string(),
        };
        let destination = describe_path(self.destination.as_deref());
        let mounted = match (&self.mount_point, self.capacity) {
            (Some(path), Some(capacity)) => {
                format!("{} ({})", path.display(), format_megabytes(capacity))
            }
            (Some(path), None) => path.display().to_string(),
            (None, _) => "not mounted".to_string(),
        };
        let last_backup = self
            .last_backup
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());

        [
            format!("Library:      {}", library),
            format!("Destination:  {}", destination),
            format!("Mounted at:   {}", mounted),
            format!(
                "Backup:       {}",
                if self.backup_feasible {
                    "possible"
                } else {
                    "not possible"
                }
            ),
            format!("Schedule:     {}", self.schedule),
            format!("Last backup:  {}", last_backup),
        ]
        .join("\n")
    }
}

fn describe_path(path: Option<&Path>) -> String {
    path.map(|path| path.display().to_string())
        .unwrap_or_else(|| "not set".to_string())
}

fn describe_size(size: Option<u64>) -> String {
    size.map(format_megabytes)
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn status(engine: &BackupEngine, json: bool) -> anyhow::Result<()> {
    if let Err(e) = engine.discover_mount() {
        warn!("Could not check whether the destination is attached: {}", e);
    }
    engine.settle_capacity().await;

    let report = StatusReport::collect(engine).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }
    Ok(())
}

pub async fn create(
    engine: &BackupEngine,
    directory: &Path,
    name: Option<&str>,
    size_mb: u64,
) -> anyhow::Result<()> {
    let created = engine
        .create_destination_named(directory, name.unwrap_or(DEFAULT_VOLUME_NAME), size_mb)
        .await?;

    println!("Created {}", created.image.display());
    match created.mount_point {
        Some(mount_point) => println!("Mounted at {}", mount_point.display()),
        None => println!("Created image is not mounted"),
    }
    Ok(())
}

fn configured_destination(engine: &BackupEngine) -> anyhow::Result<PathBuf> {
    engine
        .settings()
        .destination_image()
        .context("no destination configured; run `photos-backup configure destination <IMAGE>`")
}

pub async fn mount(engine: &BackupEngine, image: Option<PathBuf>) -> anyhow::Result<()> {
    let image = match image {
        Some(image) => image,
        None => configured_destination(engine)?,
    };

    match engine.mount(&image).await? {
        Some(mount_point) => println!("Mounted at {}", mount_point.display()),
        None => bail!("{} attached but its volume was not found", image.display()),
    }
    Ok(())
}

/// Mount if needed, check there is room, then run one backup to completion.
pub async fn run_backup_once(engine: &BackupEngine) -> anyhow::Result<BackupOutcome> {
    if engine.discover_mount()?.is_none() {
        let image = configured_destination(engine)?;
        engine
            .mount(&image)
            .await?
            .with_context(|| format!("{} attached but its volume was not found", image.display()))?;
    }
    engine.settle_capacity().await;

    if !engine.is_backup_feasible().await {
        bail!(
            "destination cannot hold the library (library {}, destination {})",
            describe_size(engine.source_size().await),
            describe_size(engine.mount_capacity())
        );
    }

    let job = engine.backup().await?;
    Ok(job.wait().await)
}

pub async fn backup(engine: &BackupEngine) -> anyhow::Result<()> {
    match run_backup_once(engine).await? {
        BackupOutcome::Succeeded { finished_at } => {
            println!("Backup completed at {}", finished_at.to_rfc3339());
            Ok(())
        }
        BackupOutcome::Failed { reason } => bail!("backup failed: {}", reason),
    }
}

pub async fn detach(engine: &BackupEngine) -> anyhow::Result<()> {
    let Some(mount_point) = engine.discover_mount()? else {
        println!("Destination is not mounted");
        return Ok(());
    };

    engine.detach(&mount_point).await;
    if engine.mount_point().is_some() {
        bail!("failed to detach {}", mount_point.display());
    }
    println!("Detached {}", mount_point.display());
    Ok(())
}
