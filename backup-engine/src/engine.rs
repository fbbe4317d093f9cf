// SPDX-License-Identifier: GPL-3.0-only

//! Backup engine orchestrator
//!
//! State machine over [`EngineState`]:
//!
//! ```text
//! Unmounted --mount/create--> Mounting --> Mounted --run_backup--> BackingUp
//!     ^                          |            |                        |
//!     +------- failure ----------+            +<------- finished ------+
//!     +<------------- Detaching <--detach-----+
//! ```
//!
//! Lifecycle operations are not internally serialised: starting a second
//! mount, create, sync or detach while another is running is a caller error.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use backup_sys::{DEFAULT_VOLUME_NAME, ImagingTool, NetworkMounter, SyncTool, VolumeInspector};
use backup_types::{
    BackupEvent, BackupOutcome, EngineState, LibraryStatus, classify, format_megabytes,
};
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::events::{EventBus, SubscriptionId};
use crate::images::{CreatedVolume, DiskImageManager};
use crate::lock;
use crate::log_buffer::LogBuffer;
use crate::settings::BackupSettings;
use crate::supervisor::{ActiveProcess, Supervisor};
use crate::sync::{SyncJob, SyncRunner};

/// Collaborators the engine is built from.
pub struct EngineComponents {
    pub settings: Arc<dyn BackupSettings>,
    pub imaging: ImagingTool,
    pub sync: SyncTool,
    pub volumes: Arc<dyn VolumeInspector>,
    pub network: Arc<dyn NetworkMounter>,
}

#[derive(Debug, Default)]
struct Status {
    state: EngineState,
    mount_point: Option<PathBuf>,
    capacity: Option<u64>,
    /// Bumped on every mount point assignment so late capacity results for
    /// an older mount are discarded.
    generation: u64,
}

struct EngineInner {
    settings: Arc<dyn BackupSettings>,
    images: DiskImageManager,
    sync: SyncRunner,
    supervisor: Supervisor,
    log: Arc<LogBuffer>,
    events: Arc<EventBus>,
    status: Mutex<Status>,
    capacity_task: Mutex<Option<JoinHandle<()>>>,
    /// True from the start of a sync until its outcome has been published.
    backup_running: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct BackupEngine {
    inner: Arc<EngineInner>,
}

/// Handle to a backup started by [`BackupEngine::run_backup`].
pub struct BackupJob {
    pid: Option<u32>,
    task: JoinHandle<BackupOutcome>,
}

impl BackupJob {
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the sync to finish. Completion or failure has already been
    /// published to subscribers by the time this returns.
    pub async fn wait(self) -> BackupOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => BackupOutcome::Failed {
                reason: format!("backup task ended unexpectedly: {}", e),
            },
        }
    }
}

impl BackupEngine {
    pub fn new(components: EngineComponents) -> Self {
        let EngineComponents {
            settings,
            imaging,
            sync,
            volumes,
            network,
        } = components;

        let log = Arc::new(LogBuffer::new());
        let events = Arc::new(EventBus::new());
        let supervisor = Supervisor::new(log.clone(), events.clone());

        let images = DiskImageManager::new(
            imaging,
            volumes,
            network,
            settings.clone(),
            supervisor.clone(),
        );
        let sync = SyncRunner::new(sync, supervisor.clone());

        Self {
            inner: Arc::new(EngineInner {
                settings,
                images,
                sync,
                supervisor,
                log,
                events,
                status: Mutex::new(Status::default()),
                capacity_task: Mutex::new(None),
                backup_running: watch::Sender::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &Arc<dyn BackupSettings> {
        &self.inner.settings
    }

    pub fn state(&self) -> EngineState {
        lock(&self.inner.status).state
    }

    pub fn mount_point(&self) -> Option<PathBuf> {
        lock(&self.inner.status).mount_point.clone()
    }

    /// Capacity of the mounted destination; `None` while unmounted or while
    /// the refresh after mounting is still pending.
    pub fn mount_capacity(&self) -> Option<u64> {
        lock(&self.inner.status).capacity
    }

    pub fn active_process(&self) -> Option<ActiveProcess> {
        self.inner.supervisor.active()
    }

    pub fn log(&self) -> &LogBuffer {
        &self.inner.log
    }

    pub fn log_contents(&self) -> String {
        self.inner.log.contents()
    }

    pub fn set_log_observer<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.log.set_observer(observer);
    }

    pub fn clear_log_observer(&self) {
        self.inner.log.clear_observer();
    }

    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&BackupEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(subscriber)
    }

    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<BackupEvent>) {
        self.inner.events.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Wait for a pending capacity refresh to finish.
    pub async fn settle_capacity(&self) {
        let task = lock(&self.inner.capacity_task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Attach the destination image and track its mount point.
    pub async fn mount(&self, destination: &Path) -> Result<Option<PathBuf>> {
        self.transition(EngineState::Mounting);

        match self.inner.images.mount_volume(destination).await {
            Ok(mount_point) => {
                self.set_mount_point(mount_point.clone());
                self.restore_state();
                Ok(mount_point)
            }
            Err(e) => {
                error!("Error mounting sparse bundle {:?}: {}", destination, e);
                self.note(format!("Mounting {} failed: {}", destination.display(), e));
                self.restore_state();
                Err(e)
            }
        }
    }

    /// Track the configured destination if its volume is already attached.
    /// Never runs the imaging tool. Must be called within a Tokio runtime.
    pub fn discover_mount(&self) -> Result<Option<PathBuf>> {
        if let Some(mount_point) = self.mount_point() {
            return Ok(Some(mount_point));
        }
        let Some(image) = self.inner.settings.destination_image() else {
            return Ok(None);
        };

        let found = self.inner.images.attached_volume(&image)?;
        if found.is_some() {
            debug!("Destination {:?} already attached at {:?}", image, found);
            self.set_mount_point(found.clone());
            self.restore_state();
        }
        Ok(found)
    }

    /// Create a destination image with the default volume name.
    pub async fn create_destination(&self, directory: &Path, size_mb: u64) -> Result<CreatedVolume> {
        self.create_destination_named(directory, DEFAULT_VOLUME_NAME, size_mb)
            .await
    }

    /// Create and attach a new destination image, remembering it as the
    /// configured destination.
    pub async fn create_destination_named(
        &self,
        directory: &Path,
        volume_name: &str,
        size_mb: u64,
    ) -> Result<CreatedVolume> {
        self.transition(EngineState::Mounting);

        match self
            .inner
            .images
            .create_volume(directory, volume_name, size_mb)
            .await
        {
            Ok(created) => {
                self.set_mount_point(created.mount_point.clone());
                if let Err(e) = self.inner.settings.set_destination_image(&created.image) {
                    warn!("{}", e);
                }
                self.restore_state();
                Ok(created)
            }
            Err(e) => {
                error!("Error creating sparse bundle in {:?}: {}", directory, e);
                self.note(format!("Creating destination failed: {}", e));
                self.restore_state();
                Err(e)
            }
        }
    }

    /// Start syncing `source` onto `destination`.
    ///
    /// Returns once the sync tool is running. The outcome is published as a
    /// [`BackupEvent::Completed`] or [`BackupEvent::Failed`] event and is
    /// also available from [`BackupJob::wait`]; a failing sync is never an
    /// `Err` here. Meaningful only while mounted, and must not be called
    /// while a backup is already running.
    pub fn run_backup(&self, source: &Path, destination: &Path) -> Result<BackupJob> {
        let job = match self.inner.sync.start(source, destination) {
            Ok(job) => job,
            Err(e) => {
                if matches!(e, EngineError::DestinationUnreachable(_)) {
                    self.set_mount_point(None);
                }
                error!("Backup could not start: {}", e);
                self.note(format!("Backup could not start: {}", e));
                self.restore_state();
                return Err(e);
            }
        };

        self.transition(EngineState::BackingUp);
        self.inner.backup_running.send_replace(true);

        let pid = job.id();
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.finish_backup(job).await });

        Ok(BackupJob { pid, task })
    }

    /// Back up the configured library, mounting the configured destination
    /// first if nothing is mounted.
    pub async fn backup(&self) -> Result<BackupJob> {
        let library = self
            .inner
            .settings
            .library_path()
            .ok_or(EngineError::NotConfigured("photos library"))?;

        let mount_point = match self.mount_point() {
            Some(mount_point) => mount_point,
            None => {
                let image = self
                    .inner
                    .settings
                    .destination_image()
                    .ok_or(EngineError::NotConfigured("destination image"))?;
                self.mount(&image)
                    .await?
                    .ok_or(EngineError::DestinationUnreachable(image))?
            }
        };

        self.run_backup(&library, &mount_point)
    }

    /// Unmount and eject the destination. Failure is only logged.
    pub async fn detach(&self, mount_point: &Path) {
        self.transition(EngineState::Detaching);

        if self.inner.images.detach_volume(mount_point).await {
            self.set_mount_point(None);
            self.transition(EngineState::Unmounted);
        } else {
            self.restore_state();
        }
    }

    /// React to the system reporting that `path` was unmounted behind the
    /// engine's back.
    pub fn handle_external_unmount(&self, path: &Path) {
        let tracked = lock(&self.inner.status).mount_point.as_deref() == Some(path);
        if !tracked {
            debug!("Ignoring unmount of untracked volume {:?}", path);
            return;
        }

        info!("Sparse bundle was unmounted at {:?}", path);
        self.set_mount_point(None);
        self.restore_state();
    }

    pub async fn capacity(&self, path: &Path) -> Result<u64> {
        self.inner.images.capacity(path).await
    }

    /// Size of the configured library, measured now. `None` when unset or
    /// missing.
    pub async fn source_size(&self) -> Option<u64> {
        let library = self.inner.settings.library_path()?;
        tokio::task::spawn_blocking(move || backup_sys::library_size(&library))
            .await
            .ok()
            .flatten()
    }

    /// Whether the mounted destination can hold the library: known capacity
    /// strictly greater than the known library size.
    pub async fn is_backup_feasible(&self) -> bool {
        let capacity = self.mount_capacity();
        if capacity.is_none() {
            return false;
        }
        backup_types::backup_feasible(capacity, self.source_size().await)
    }

    pub async fn library_status(&self) -> LibraryStatus {
        let configured = self.inner.settings.library_path();
        let size = match configured.clone() {
            Some(path) => tokio::task::spawn_blocking(move || backup_sys::library_size(&path))
                .await
                .ok()
                .flatten(),
            None => None,
        };
        classify(configured.as_deref(), size)
    }

    /// Measure the library and write a human-readable summary to the log.
    pub async fn validate_library(&self) -> LibraryStatus {
        let status = self.library_status().await;
        let library = self.inner.settings.library_path();

        let message = match (&library, status) {
            (Some(path), LibraryStatus::Accessible) => {
                let size = self.source_size().await.unwrap_or(0);
                format!(
                    "Found photos library at {} size {}",
                    path.display(),
                    format_megabytes(size)
                )
            }
            (Some(path), LibraryStatus::PermissionDenied) => format!(
                "Photos library at {} reports no content; access may have been denied",
                path.display()
            ),
            (Some(path), _) => format!(
                "Photos library location set to {} but unable to get information. Will try again later",
                path.display()
            ),
            (None, _) => "No photos library location set".to_string(),
        };

        info!("{}", message);
        self.note(message);
        status
    }

    /// Validate the library and mount the configured destination, logging
    /// rather than returning failures.
    pub async fn startup(&self) {
        self.validate_library().await;

        if let Some(image) = self.inner.settings.destination_image() {
            info!("Attempting to mount sparse bundle at {:?}", image);
            if let Err(e) = self.mount(&image).await {
                error!("Error mounting sparse bundle: {}", e);
            }
        }
    }

    /// Stop the active process and detach the destination.
    ///
    /// The destination is only detached after the terminated process has
    /// exited and a running backup has published its outcome.
    pub async fn shutdown(&self) {
        self.inner.supervisor.terminate_active();

        let mut running = self.inner.backup_running.subscribe();
        if *running.borrow() {
            info!("Waiting for the running backup to stop");
        }
        // The sender lives in `inner`, so the channel cannot close here.
        let _ = running.wait_for(|running| !running).await;
        self.inner.supervisor.wait_idle().await;

        if let Some(mount_point) = self.mount_point() {
            self.detach(&mount_point).await;
        }
    }

    async fn finish_backup(&self, job: SyncJob) -> BackupOutcome {
        let events = self.inner.events.clone();
        let result = job
            .run(|percent| events.publish(&BackupEvent::Progress { percent }))
            .await;

        let outcome = match result {
            Ok(termination) if termination.is_success() => {
                let finished_at = Utc::now();
                if let Err(e) = self.inner.settings.set_last_backup(finished_at) {
                    warn!("{}", e);
                    self.note(e.to_string());
                }
                info!("Rsync completed backup");
                self.note("Backup completed");
                BackupOutcome::Succeeded { finished_at }
            }
            Ok(termination) => {
                error!("Rsync failed to exit successfully: {}", termination);
                let reason = format!("sync tool {}", termination);
                self.note(format!("Backup failed: {}", reason));
                BackupOutcome::Failed { reason }
            }
            Err(e) => {
                error!("Backup failed: {}", e);
                self.note(format!("Backup failed: {}", e));
                BackupOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        self.restore_state();
        self.inner.events.publish(&outcome.to_event());
        self.inner.backup_running.send_replace(false);
        outcome
    }

    /// Assign the mount point, notify subscribers and refresh capacity in
    /// the background. Every assignment notifies, even an unchanged value.
    fn set_mount_point(&self, mount_point: Option<PathBuf>) {
        let generation = {
            let mut status = lock(&self.inner.status);
            status.mount_point = mount_point.clone();
            status.capacity = None;
            status.generation += 1;
            status.generation
        };

        let described = mount_point
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "unmounted".to_string());
        info!("Mount point set to {}", described);
        self.note(format!("Mount point set to {}", described));

        self.inner.events.publish(&BackupEvent::MountPointChanged {
            mount_point: mount_point.clone(),
        });

        match mount_point {
            Some(path) => self.refresh_capacity(path, generation),
            None => {
                if let Some(task) = lock(&self.inner.capacity_task).take() {
                    task.abort();
                }
            }
        }
    }

    fn refresh_capacity(&self, path: PathBuf, generation: u64) {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = inner.images.capacity(&path).await;

            let mut status = lock(&inner.status);
            if status.generation != generation {
                return;
            }
            match result {
                Ok(capacity) => {
                    debug!("Capacity of {:?} is {} bytes", path, capacity);
                    status.capacity = Some(capacity);
                }
                Err(e) => {
                    drop(status);
                    warn!("Unable to get capacity: {}", e);
                }
            }
        });

        if let Some(previous) = lock(&self.inner.capacity_task).replace(task) {
            previous.abort();
        }
    }

    fn transition(&self, next: EngineState) -> EngineState {
        let previous = std::mem::replace(&mut lock(&self.inner.status).state, next);

        if previous != next {
            debug!("Engine state {} -> {}", previous, next);
            self.note(format!("State changed from {} to {}", previous, next));
            self.inner
                .events
                .publish(&BackupEvent::StateChanged { state: next });
        }
        previous
    }

    /// Settle into `Mounted` or `Unmounted` depending on the mount point.
    fn restore_state(&self) {
        let next = if self.mount_point().is_some() {
            EngineState::Mounted
        } else {
            EngineState::Unmounted
        };
        self.transition(next);
    }

    fn note(&self, line: impl Into<String>) {
        self.inner.log.append(line);
    }
}

impl std::fmt::Debug for BackupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = lock(&self.inner.status);
        f.debug_struct("BackupEngine")
            .field("state", &status.state)
            .field("mount_point", &status.mount_point)
            .field("capacity", &status.capacity)
            .finish()
    }
}
