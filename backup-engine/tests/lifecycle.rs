#![cfg(unix)]

mod common;

use std::fs;

use backup_engine::EngineError;
use backup_sys::SysError;
use backup_types::{BackupEvent, EngineState, MEGABYTE, RemountLocator};

use common::fixtures::{CAPACITY_MB, Fixture, QUIET_SYNC, drain};

#[tokio::test]
async fn create_destination_mounts_and_logs() {
    let fixture = Fixture::new(QUIET_SYNC);
    let (_, mut events) = fixture.engine.subscribe_channel();

    let mount_point = fixture.create_destination().await;

    assert_eq!(mount_point, fixture.volumes_root.join("photosBackup"));
    assert_eq!(fixture.engine.mount_point(), Some(mount_point.clone()));
    assert_eq!(fixture.engine.state(), EngineState::Mounted);
    assert_eq!(
        fixture.engine.mount_capacity(),
        Some(CAPACITY_MB * MEGABYTE)
    );
    assert!(fixture.engine.active_process().is_none());

    let image = fixture.images_dir.join("photosBackup.sparsebundle");
    assert!(image.exists());
    assert_eq!(
        backup_engine::BackupSettings::destination_image(fixture.settings.as_ref()),
        Some(image.clone())
    );

    let log = fixture.engine.log_contents();
    assert!(log.contains(&format!("Created sparse bundle at {}", image.display())));
    assert!(log.contains(&format!("Mount point set to {}", mount_point.display())));
    assert!(log.contains("StdOut: created:"));

    let events = drain(&mut events);
    assert!(events.contains(&BackupEvent::MountPointChanged {
        mount_point: Some(mount_point)
    }));
    assert!(events.contains(&BackupEvent::StateChanged {
        state: EngineState::Mounted
    }));
}

#[tokio::test]
async fn wrong_extension_is_rejected_without_spawning() {
    let fixture = Fixture::new(QUIET_SYNC);
    let (_, mut events) = fixture.engine.subscribe_channel();

    let target = fixture.images_dir.join("backup.dmg");
    fs::create_dir_all(&target).unwrap();

    let result = fixture.engine.mount(&target).await;
    assert!(matches!(
        result,
        Err(EngineError::Sys(SysError::InvalidTarget(path))) if path == target
    ));

    let events = drain(&mut events);
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, BackupEvent::ActiveProcessChanged { .. }))
    );
    assert_eq!(fixture.engine.mount_point(), None);
    assert_eq!(fixture.engine.state(), EngineState::Unmounted);
}

#[tokio::test]
async fn missing_image_fails_before_attach() {
    let fixture = Fixture::new(QUIET_SYNC);
    let image = fixture.images_dir.join("gone.sparsebundle");

    let result = fixture.engine.mount(&image).await;
    assert!(matches!(
        result,
        Err(EngineError::Sys(SysError::InvalidTarget(_)))
    ));
    assert!(fixture.engine.mount_point().is_none());
}

#[tokio::test]
async fn mount_attaches_existing_image() {
    let fixture = Fixture::new(QUIET_SYNC);
    let image = fixture.images_dir.join("Archive.sparsebundle");
    fs::create_dir_all(&image).unwrap();

    let mount_point = fixture.engine.mount(&image).await.unwrap();
    assert_eq!(mount_point, Some(fixture.volumes_root.join("Archive")));
    assert_eq!(fixture.engine.state(), EngineState::Mounted);
    assert!(fixture.engine.log_contents().contains("Running "));
}

#[tokio::test]
async fn mount_remounts_network_share_first() {
    let fixture = Fixture::new(QUIET_SYNC);
    let locator = RemountLocator::new("smb://nas.local/photos");
    fixture.settings.set_locator(Some(locator.clone()));

    let image = fixture.images_dir.join("photosBackup.sparsebundle");
    fs::create_dir_all(&image).unwrap();

    fixture.engine.mount(&image).await.unwrap();

    assert_eq!(*fixture.mounter.calls.lock().unwrap(), vec![locator]);
    assert!(fixture.engine.log_contents().contains("Remounted network share"));
}

#[tokio::test]
async fn detach_clears_mount_point_and_feasibility() {
    let fixture = Fixture::new(QUIET_SYNC);
    fixture.library(1);
    let mount_point = fixture.create_destination().await;
    assert!(fixture.engine.is_backup_feasible().await);

    let (_, mut events) = fixture.engine.subscribe_channel();
    fixture.engine.detach(&mount_point).await;

    assert!(!mount_point.exists());
    assert_eq!(fixture.engine.mount_point(), None);
    assert_eq!(fixture.engine.mount_capacity(), None);
    assert_eq!(fixture.engine.state(), EngineState::Unmounted);
    assert!(!fixture.engine.is_backup_feasible().await);

    let events = drain(&mut events);
    assert!(events.contains(&BackupEvent::MountPointChanged { mount_point: None }));
    assert!(events.contains(&BackupEvent::ActiveProcessChanged { process: None }));
}

#[tokio::test]
async fn external_unmount_only_clears_tracked_volume() {
    let fixture = Fixture::new(QUIET_SYNC);
    let mount_point = fixture.create_destination().await;

    fixture
        .engine
        .handle_external_unmount(&fixture.volumes_root.join("Other"));
    assert_eq!(fixture.engine.mount_point(), Some(mount_point.clone()));

    fixture.engine.handle_external_unmount(&mount_point);
    assert_eq!(fixture.engine.mount_point(), None);
    assert_eq!(fixture.engine.state(), EngineState::Unmounted);
}

#[tokio::test]
async fn every_mount_point_assignment_notifies() {
    let fixture = Fixture::new(QUIET_SYNC);
    let image = fixture.images_dir.join("photosBackup.sparsebundle");
    fs::create_dir_all(&image).unwrap();

    let (_, mut events) = fixture.engine.subscribe_channel();
    fixture.engine.mount(&image).await.unwrap();
    fixture.engine.mount(&image).await.unwrap();

    let changes = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, BackupEvent::MountPointChanged { .. }))
        .count();
    assert_eq!(changes, 2);
}

#[tokio::test]
async fn startup_mounts_configured_destination() {
    let fixture = Fixture::new(QUIET_SYNC);
    fixture.create_destination().await;
    let mount_point = fixture.engine.mount_point().unwrap();
    fixture.engine.detach(&mount_point).await;

    fixture.engine.startup().await;

    assert_eq!(fixture.engine.mount_point(), Some(mount_point));
    assert!(
        fixture
            .engine
            .log_contents()
            .contains("No photos library location set")
    );
}

#[tokio::test]
async fn shutdown_detaches_destination() {
    let fixture = Fixture::new(QUIET_SYNC);
    let mount_point = fixture.create_destination().await;

    fixture.engine.shutdown().await;

    assert!(!mount_point.exists());
    assert_eq!(fixture.engine.mount_point(), None);
}

#[tokio::test]
async fn discover_mount_adopts_attached_destination() {
    let fixture = Fixture::new(QUIET_SYNC);
    let image = fixture.images_dir.join("photosBackup.sparsebundle");
    fs::create_dir_all(&image).unwrap();
    backup_engine::BackupSettings::set_destination_image(fixture.settings.as_ref(), &image)
        .unwrap();

    assert_eq!(fixture.engine.discover_mount().unwrap(), None);

    let volume = fixture.volumes_root.join("photosBackup");
    fs::create_dir_all(&volume).unwrap();
    let (_, mut events) = fixture.engine.subscribe_channel();

    assert_eq!(fixture.engine.discover_mount().unwrap(), Some(volume.clone()));
    assert_eq!(fixture.engine.state(), EngineState::Mounted);
    assert!(
        !drain(&mut events)
            .iter()
            .any(|event| matches!(event, BackupEvent::ActiveProcessChanged { .. }))
    );
}

#[tokio::test]
async fn capacity_is_unknown_until_refresh_lands() {
    let fixture = Fixture::new(QUIET_SYNC);
    fixture.library(1);
    let image = fixture.existing_image("photosBackup");
    fixture.capacity_gate.close();

    let mount_point = fixture.engine.mount(&image).await.unwrap();
    assert!(mount_point.is_some());
    assert_eq!(fixture.engine.state(), EngineState::Mounted);
    assert_eq!(fixture.engine.mount_capacity(), None);
    assert!(!fixture.engine.is_backup_feasible().await);

    fixture.capacity_gate.open();
    fixture.engine.settle_capacity().await;

    assert_eq!(
        fixture.engine.mount_capacity(),
        Some(CAPACITY_MB * MEGABYTE)
    );
    assert!(fixture.engine.is_backup_feasible().await);
}
