// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LoggingLevel};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_PREFIX: &str = "photos-backup.log";
const MAX_LOG_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Our crates at the configured level, everything else at warn.
fn default_directives(level: LoggingLevel) -> String {
    let level = level.as_directive();
    format!("photos_backup={level},backup_engine={level},backup_sys={level},warn")
}

pub(crate) fn init(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.log_level)));

    // stderr keeps stdout free for command output such as `status --json`
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let mut removed_logs = 0;
    let file_layer = if config.log_to_disk {
        match file_writer() {
            Ok((writer, guard, removed)) => {
                let _ = LOG_GUARD.set(guard);
                removed_logs = removed;
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_target(true)
                        .with_ansi(false)
                        .with_timer(tracing_subscriber::fmt::time::SystemTime),
                )
            }
            Err(e) => {
                eprintln!("photos-backup: failed to initialize file logging: {e:#}");
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if removed_logs > 0 {
        tracing::debug!("Removed {} stale log files", removed_logs);
    }
}

fn file_writer() -> anyhow::Result<(NonBlocking, WorkerGuard, usize)> {
    let dir = log_dir();

    if let Err(e) = fs::create_dir_all(&dir) {
        return Err(anyhow::anyhow!(
            "create log directory failed: {} ({})",
            dir.display(),
            e
        ));
    }

    let removed = remove_stale_logs(&dir, SystemTime::now());

    let appender = tracing_appender::rolling::daily(&dir, LOG_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((writer, guard, removed))
}

fn log_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("PHOTOS_BACKUP_LOG_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(xdg_state) = std::env::var_os("XDG_STATE_HOME") {
        return PathBuf::from(xdg_state).join("photos-backup").join("logs");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("photos-backup")
            .join("logs");
    }

    PathBuf::from("/tmp").join("photos-backup").join("logs")
}

/// Delete rolled log files last written more than [`MAX_LOG_AGE`] before
/// `now`. Returns how many were removed.
fn remove_stale_logs(dir: &Path, now: SystemTime) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let is_stale = |path: &Path| {
        fs::metadata(path)
            .and_then(|metadata| metadata.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > MAX_LOG_AGE)
    };

    entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(LOG_PREFIX))
        })
        .filter(|path| is_stale(path))
        .filter(|path| fs::remove_file(path).is_ok())
        .count()
}
