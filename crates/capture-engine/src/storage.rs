//! Output file management and the low-disk watchdog.
//!
//! Recordings are written to `Recording_<timestamp>.partial.<ext>` and renamed
//! to `Recording_<timestamp>.<ext>` once finalized, so a crash leaves only a
//! recognizable partial file behind.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use steadyrec_common::config::AppConfig;
use steadyrec_common::error::{RecorderError, RecorderResult};

const FILE_PREFIX: &str = "Recording_";
const PARTIAL_MARKER: &str = ".partial";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Name collisions tolerated within the same second before giving up.
const MAX_NAME_SUFFIX: u32 = 999;

/// Slice used when sleeping between polls so `stop()` is observed quickly.
const MONITOR_SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Paired output locations for one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub partial: PathBuf,
    pub final_path: PathBuf,
}

/// Resolves where recordings go and inspects the output volume.
#[derive(Debug, Clone)]
pub struct StorageManager {
    output_dir: PathBuf,
}

impl StorageManager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Use the configured directory, or the platform default.
    pub fn from_config(config: &AppConfig) -> Self {
        match &config.output_dir {
            Some(dir) => Self::new(dir.clone()),
            None => Self::new(Self::default_output_dir()),
        }
    }

    /// `$XDG_VIDEOS_DIR/Recordings`, else `~/Videos/Recordings`.
    pub fn default_output_dir() -> PathBuf {
        if let Ok(videos) = std::env::var("XDG_VIDEOS_DIR") {
            if !videos.is_empty() {
                return PathBuf::from(videos).join("Recordings");
            }
        }
        match std::env::var("HOME") {
            Ok(home) => PathBuf::from(home).join("Videos").join("Recordings"),
            Err(_) => std::env::temp_dir().join("steadyrec"),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn ensure_output_dir(&self) -> RecorderResult<()> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            RecorderError::storage(format!(
                "Cannot create output directory {}: {e}",
                self.output_dir.display()
            ))
        })
    }

    /// Fresh, unused paths for a recording started now.
    pub fn generate_paths(&self, extension: &str) -> RecorderResult<OutputPaths> {
        self.generate_paths_at(extension, Local::now().naive_local())
    }

    /// Fresh, unused paths for a recording started at `timestamp`.
    ///
    /// Appends `_001`, `_002`, ... when either path for the plain name exists.
    pub fn generate_paths_at(
        &self,
        extension: &str,
        timestamp: NaiveDateTime,
    ) -> RecorderResult<OutputPaths> {
        self.ensure_output_dir()?;
        let stem = format!("{FILE_PREFIX}{}", timestamp.format(TIMESTAMP_FORMAT));

        for suffix in 0..=MAX_NAME_SUFFIX {
            let name = if suffix == 0 {
                stem.clone()
            } else {
                format!("{stem}_{suffix:03}")
            };
            let paths = OutputPaths {
                partial: self
                    .output_dir
                    .join(format!("{name}{PARTIAL_MARKER}.{extension}")),
                final_path: self.output_dir.join(format!("{name}.{extension}")),
            };
            if !paths.partial.exists() && !paths.final_path.exists() {
                return Ok(paths);
            }
        }

        Err(RecorderError::storage(format!(
            "No free file name for {stem} in {}",
            self.output_dir.display()
        )))
    }

    /// Map `X.partial.ext` to `X.ext`. `None` for anything else.
    pub fn partial_to_final(path: &Path) -> Option<PathBuf> {
        let name = path.file_name()?.to_str()?;
        let (stem, ext) = name.rsplit_once('.')?;
        let base = stem.strip_suffix(PARTIAL_MARKER)?;
        if base.is_empty() {
            return None;
        }
        Some(path.with_file_name(format!("{base}.{ext}")))
    }

    /// Partial files left behind by recordings that never finalized.
    pub fn find_orphans(&self) -> RecorderResult<Vec<PathBuf>> {
        if !self.output_dir.exists() {
            return Ok(Vec::new());
        }

        let mut orphans = Vec::new();
        for entry in std::fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            if path.is_file() && Self::partial_to_final(&path).is_some() {
                orphans.push(path);
            }
        }
        orphans.sort();
        Ok(orphans)
    }

    /// Bytes available to unprivileged users on the output volume.
    pub fn free_disk_space(&self) -> RecorderResult<u64> {
        free_bytes(existing_ancestor(&self.output_dir))
    }

    /// Whether free space is below `threshold_bytes`. Unknown counts as not low.
    pub fn is_disk_space_low(&self, threshold_bytes: u64) -> bool {
        match self.free_disk_space() {
            Ok(free) => free < threshold_bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Could not query free disk space");
                false
            }
        }
    }
}

fn existing_ancestor(path: &Path) -> &Path {
    let mut current = path;
    while !current.exists() {
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => return Path::new("."),
        }
    }
    current
}

#[cfg(unix)]
fn free_bytes(path: &Path) -> RecorderResult<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| RecorderError::storage("Path contains an interior NUL byte"))?;

    // SAFETY: `c_path` is a valid NUL-terminated string and `stat` is a
    // properly sized out-parameter that statvfs fully initializes on success.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    #[allow(clippy::unnecessary_cast)]
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_bytes(_path: &Path) -> RecorderResult<u64> {
    Err(RecorderError::Unsupported {
        message: "Free disk space query is only implemented for Unix".to_string(),
    })
}

/// Background thread that polls free disk space and fires a callback while it
/// is below a threshold.
#[derive(Debug, Default)]
pub struct DiskSpaceMonitor {
    worker: Mutex<Option<MonitorWorker>>,
}

#[derive(Debug)]
struct MonitorWorker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DiskSpaceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch the volume holding `storage`'s output directory.
    pub fn start(
        &self,
        storage: &StorageManager,
        threshold_bytes: u64,
        interval: Duration,
        on_low: impl Fn(u64) + Send + 'static,
    ) -> RecorderResult<()> {
        let storage = storage.clone();
        self.start_with(
            move || storage.free_disk_space(),
            threshold_bytes,
            interval,
            on_low,
        )
    }

    /// Watch using a custom free-space probe. Restarts if already running.
    pub fn start_with(
        &self,
        probe: impl Fn() -> RecorderResult<u64> + Send + 'static,
        threshold_bytes: u64,
        interval: Duration,
        on_low: impl Fn(u64) + Send + 'static,
    ) -> RecorderResult<()> {
        self.stop();

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("disk-monitor".to_string())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    match probe() {
                        Ok(free) if free < threshold_bytes => {
                            tracing::warn!(free_bytes = free, threshold_bytes, "Disk space low");
                            on_low(free);
                        }
                        Ok(_) => {}
                        Err(e) => tracing::debug!(error = %e, "Disk space probe failed"),
                    }

                    let deadline = Instant::now() + interval;
                    while flag.load(Ordering::Acquire) && Instant::now() < deadline {
                        thread::sleep(MONITOR_SLEEP_SLICE.min(interval));
                    }
                }
            })?;

        *self.worker.lock() = Some(MonitorWorker { running, handle });
        tracing::debug!(threshold_bytes, ?interval, "Disk space monitor started");
        Ok(())
    }

    /// Stop polling. Idempotent. Called from the monitor's own thread (inside
    /// the callback) it detaches instead of joining.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        worker.running.store(false, Ordering::Release);

        if worker.handle.thread().id() == thread::current().id() {
            tracing::debug!("Disk space monitor stopped from its own thread, detaching");
            return;
        }
        if worker.handle.join().is_err() {
            tracing::error!("Disk space monitor thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl Drop for DiskSpaceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
