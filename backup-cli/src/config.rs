// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use backup_engine::{BackupSettings, SettingsError};
use backup_sys::imaging::DEFAULT_IMAGING_TOOL;
use backup_sys::network::DEFAULT_NETWORK_MOUNT_TOOL;
use backup_sys::sync_tool::DEFAULT_SYNC_TOOL;
use backup_types::{RemountLocator, Schedule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "photos-backup";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// External programs the engine drives.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ToolPaths {
    pub imaging: PathBuf,
    pub sync: PathBuf,
    pub network_mount: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            imaging: PathBuf::from(DEFAULT_IMAGING_TOOL),
            sync: PathBuf::from(DEFAULT_SYNC_TOOL),
            network_mount: PathBuf::from(DEFAULT_NETWORK_MOUNT_TOOL),
        }
    }
}

/// Resolve a bare program name on `PATH`; paths are used as given.
pub fn resolve_program(program: &Path) -> anyhow::Result<PathBuf> {
    if program.components().count() > 1 {
        return Ok(program.to_path_buf());
    }
    let name = program
        .to_str()
        .with_context(|| format!("program name is not valid UTF-8: {:?}", program))?;
    Ok(backup_sys::process::locate(name)?)
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    pub library: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub remount_locator: Option<RemountLocator>,
    pub last_backup: Option<DateTime<Utc>>,
    pub schedule: Schedule,
    pub log_level: LoggingLevel,
    pub log_to_disk: bool,
    /// Treat each directory here as a mounted volume instead of reading the
    /// system mount table.
    pub volumes_root: Option<PathBuf>,
    pub tools: ToolPaths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library: None,
            destination: None,
            remount_locator: None,
            last_backup: None,
            schedule: Schedule::Disabled,
            log_level: LoggingLevel::Info,
            log_to_disk: true,
            volumes_root: None,
            tools: ToolPaths::default(),
        }
    }
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let raw = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, raw).with_context(|| format!("failed to write config {}", path.display()))
    }
}

pub fn default_config_path() -> PathBuf {
    if let Some(file) = std::env::var_os("PHOTOS_BACKUP_CONFIG") {
        return PathBuf::from(file);
    }

    if let Some(xdg_config) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg_config).join(APP_DIR).join(CONFIG_FILE);
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILE);
    }

    PathBuf::from("/tmp").join(APP_DIR).join(CONFIG_FILE)
}

/// [`BackupSettings`] persisted as a TOML file. Every write saves the whole
/// file.
#[derive(Debug)]
pub struct TomlSettings {
    path: PathBuf,
    config: Mutex<Config>,
}

impl TomlSettings {
    pub fn new(path: PathBuf, config: Config) -> Self {
        Self {
            path,
            config: Mutex::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Config {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `change` and persist the result.
    pub fn update<F>(&self, change: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut config);
        config.save(&self.path)
    }

    fn persist<F>(&self, change: F) -> Result<(), SettingsError>
    where
        F: FnOnce(&mut Config),
    {
        self.update(change)
            .map_err(|e| SettingsError(format!("{:#}", e)))
    }
}

impl BackupSettings for TomlSettings {
    fn library_path(&self) -> Option<PathBuf> {
        self.snapshot().library
    }

    fn destination_image(&self) -> Option<PathBuf> {
        self.snapshot().destination
    }

    fn set_destination_image(&self, image: &Path) -> Result<(), SettingsError> {
        self.persist(|config| config.destination = Some(image.to_path_buf()))
    }

    fn remount_locator(&self) -> Option<RemountLocator> {
        self.snapshot().remount_locator
    }

    fn set_remount_locator(&self, locator: Option<RemountLocator>) -> Result<(), SettingsError> {
        self.persist(|config| config.remount_locator = locator)
    }

    fn last_backup(&self) -> Option<DateTime<Utc>> {
        self.snapshot().last_backup
    }

    fn set_last_backup(&self, finished_at: DateTime<Utc>) -> Result<(), SettingsError> {
        self.persist(|config| config.last_backup = Some(finished_at))
    }

    fn schedule(&self) -> Schedule {
        self.snapshot().schedule
    }
}
