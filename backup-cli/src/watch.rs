// SPDX-License-Identifier: GPL-3.0-only

//! In-process scheduled backups

use anyhow::{Context, bail};
use backup_engine::{BackupEngine, BackupSettings};
use backup_types::BackupOutcome;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info};

use crate::commands::run_backup_once;

/// Back up on every tick of the configured schedule until interrupted,
/// then stop any running sync and detach.
pub async fn watch(engine: &BackupEngine) -> anyhow::Result<()> {
    let schedule = engine.settings().schedule();
    let Some(period) = schedule.interval() else {
        bail!("no backup schedule set; run `photos-backup configure schedule daily` first");
    };

    engine.startup().await;
    info!("Backing up {} ({} s between runs)", schedule, period.as_secs());

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            result = &mut interrupted => {
                result.context("failed to listen for interrupt")?;
                info!("Interrupted, shutting down");
                break;
            }
            _ = scheduled_backup(engine, &mut ticker) => {}
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn scheduled_backup(engine: &BackupEngine, ticker: &mut Interval) {
    ticker.tick().await;

    match run_backup_once(engine).await {
        Ok(BackupOutcome::Succeeded { finished_at }) => {
            info!("Scheduled backup completed at {}", finished_at.to_rfc3339());
        }
        Ok(BackupOutcome::Failed { reason }) => error!("Scheduled backup failed: {}", reason),
        Err(e) => error!("Scheduled backup skipped: {:#}", e),
    }
}
