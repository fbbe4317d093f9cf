use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use backup_engine::{BackupEngine, EngineComponents};
use backup_sys::{ImagingTool, ProcessRunner, SyncTool, VolumesDirectory};
use backup_types::{BackupEvent, MEGABYTE};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use super::fakes::{CapacityGate, FixedCapacityVolumes, MemorySettings, RecordingMounter};

/// Stand-in for `hdiutil`: images are directories and attached volumes are
/// directories under the volumes root. Marker files in the control directory
/// make a verb fail (`fail-<verb>`) or succeed without a volume appearing
/// (`no-volume`).
const IMAGING_SCRIPT: &str = r#"#!/bin/sh
cmd="$1"
shift
if [ -e "$CONTROL/fail-$cmd" ]; then
  case "$cmd" in
    detach)
      echo "hdiutil: couldn't unmount \"disk4\" - Resource busy" >&2
      exit 16
      ;;
    *)
      echo "hdiutil: $cmd failed - Operation not permitted" >&2
      exit 1
      ;;
  esac
fi
case "$cmd" in
  create)
    name=""
    while [ $# -gt 0 ]; do
      if [ "$1" = "-volname" ]; then
        name="$2"
        shift
      fi
      shift
    done
    mkdir -p "$name.sparsebundle" || exit 1
    if [ ! -e "$CONTROL/no-volume" ]; then
      mkdir -p "$VOLUMES/$name" || exit 1
    fi
    echo "created: $PWD/$name.sparsebundle"
    ;;
  attach)
    if [ ! -d "$1" ]; then
      echo "hdiutil: attach failed - No such file or directory" >&2
      exit 1
    fi
    name=$(basename "$1" .sparsebundle)
    if [ ! -e "$CONTROL/no-volume" ]; then
      mkdir -p "$VOLUMES/$name" || exit 1
    fi
    echo "/dev/disk4s1 Apple_HFS $VOLUMES/$name"
    ;;
  detach)
    rm -rf "$1" || exit 1
    echo "\"disk4\" ejected."
    ;;
  *)
    exit 2
    ;;
esac
"#;

/// Rsync output with one progress line followed by a summary.
pub const PROGRESS_SYNC: &str = r#"#!/bin/sh
echo "sending incremental file list"
printf '     12,345,678  45%%   11.77MB/s    0:00:01 (xfr#1, to-chk=10/12)\r'
printf '     27,435,063 100%%   12.01MB/s    0:00:02 (xfr#12, to-chk=0/12)\n'
exit 0
"#;

/// Rsync output without any progress percentage.
pub const QUIET_SYNC: &str = r#"#!/bin/sh
echo "sending incremental file list"
exit 0
"#;

/// Rsync that keeps running until it is signalled.
pub const SLOW_SYNC: &str = r#"#!/bin/sh
echo "sending incremental file list"
exec sleep 5
"#;

/// Rsync failing with a usage error.
pub const FAILING_SYNC: &str = r#"#!/bin/sh
echo "rsync: change_dir failed: No such file or directory (2)" >&2
exit 23
"#;

pub const CAPACITY_MB: u64 = 2000;

pub struct Fixture {
    pub dir: TempDir,
    pub volumes_root: PathBuf,
    pub images_dir: PathBuf,
    pub control_dir: PathBuf,
    pub settings: Arc<MemorySettings>,
    pub mounter: Arc<RecordingMounter>,
    pub capacity_gate: Arc<CapacityGate>,
    pub engine: BackupEngine,
}

impl Fixture {
    pub fn new(sync_script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let volumes_root = dir.path().join("Volumes");
        let images_dir = dir.path().join("images");
        let tools = dir.path().join("tools");
        let control_dir = dir.path().join("control");
        for path in [&volumes_root, &images_dir, &tools, &control_dir] {
            fs::create_dir_all(path).unwrap();
        }

        let imaging_script = IMAGING_SCRIPT.replacen(
            "#!/bin/sh\n",
            &format!(
                "#!/bin/sh\nVOLUMES='{}'\nCONTROL='{}'\n",
                volumes_root.display(),
                control_dir.display()
            ),
            1,
        );
        let imaging = write_script(&tools, "hdiutil", &imaging_script);
        let sync = write_script(&tools, "rsync", sync_script);

        let settings = Arc::new(MemorySettings::default());
        let mounter = Arc::new(RecordingMounter::default());
        let capacity_gate = Arc::new(CapacityGate::default());
        let engine = BackupEngine::new(EngineComponents {
            settings: settings.clone(),
            imaging: ImagingTool::new(imaging, ProcessRunner::new()),
            sync: SyncTool::new(sync, ProcessRunner::new()),
            volumes: Arc::new(FixedCapacityVolumes {
                volumes: VolumesDirectory::new(&volumes_root),
                capacity: CAPACITY_MB * MEGABYTE,
                gate: capacity_gate.clone(),
            }),
            network: mounter.clone(),
        });

        Self {
            dir,
            volumes_root,
            images_dir,
            control_dir,
            settings,
            mounter,
            capacity_gate,
            engine,
        }
    }

    /// Make the imaging tool fail the next `verb` invocations.
    pub fn fail_imaging(&self, verb: &str) {
        File::create(self.control_dir.join(format!("fail-{}", verb))).unwrap();
    }

    /// Let create and attach succeed without any volume showing up.
    pub fn suppress_volume(&self) {
        File::create(self.control_dir.join("no-volume")).unwrap();
    }

    /// An empty image directory named after `volume_name`, ready to attach.
    pub fn existing_image(&self, volume_name: &str) -> PathBuf {
        let image = self
            .images_dir
            .join(format!("{}.sparsebundle", volume_name));
        fs::create_dir_all(&image).unwrap();
        image
    }

    /// A library directory holding one sparse file of `size_mb` megabytes.
    pub fn library(&self, size_mb: u64) -> PathBuf {
        let library = self.dir.path().join("Photos Library.photoslibrary");
        fs::create_dir_all(&library).unwrap();
        let file = File::create(library.join("database.sqlite")).unwrap();
        file.set_len(size_mb * MEGABYTE).unwrap();
        self.settings.set_library(Some(library.clone()));
        library
    }

    pub async fn create_destination(&self) -> PathBuf {
        let created = self
            .engine
            .create_destination(&self.images_dir, 100)
            .await
            .unwrap();
        self.engine.settle_capacity().await;
        created.mount_point.expect("volume mounted")
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    {
        let mut file = File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.sync_all().unwrap();
    }
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn drain(receiver: &mut UnboundedReceiver<BackupEvent>) -> Vec<BackupEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
