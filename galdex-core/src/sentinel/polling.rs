//! Incremental polling watcher.
//!
//! Fallback for environments where native watching fails (containers,
//! network mounts) and the standalone engine behind scheduled polls. Keeps
//! a `path -> mtime` snapshot per root, diffs it each poll, and persists it
//! so a restart skips the initial full scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sentinel::coalescer::EventCoalescer;
use crate::sentinel::stability::StabilityTracker;
use crate::txfs::sandbox::is_safe;
use galdex_model::FileEventKind;

/// Default poll cadence, tuned for low I/O on spinning NAS disks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(600);

pub const SNAPSHOT_FILE: &str = ".polling_snapshot.json";
const SNAPSHOT_VERSION: u32 = 1;

/// Two mtime readings closer than this are considered equal.
const MTIME_EPSILON: f64 = 0.001;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    timestamp: f64,
    snapshot: HashMap<String, f64>,
}

/// Polls one library root for changes.
pub struct PollingWatcher {
    root: PathBuf,
    poll_interval: Duration,
    tracker: Arc<StabilityTracker>,
    coalescer: Arc<EventCoalescer>,
    snapshot: Mutex<HashMap<String, f64>>,
}

impl std::fmt::Debug for PollingWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingWatcher")
            .field("root", &self.root)
            .field("poll_interval", &self.poll_interval)
            .field("snapshot_len", &self.snapshot.lock().len())
            .finish()
    }
}

fn mtime_secs(meta: &std::fs::Metadata) -> Option<f64> {
    meta.modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}

impl PollingWatcher {
    pub fn new(
        root: PathBuf,
        poll_interval: Duration,
        tracker: Arc<StabilityTracker>,
        coalescer: Arc<EventCoalescer>,
    ) -> Self {
        PollingWatcher {
            root,
            poll_interval,
            tracker,
            coalescer,
            snapshot: Mutex::new(HashMap::new()),
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    /// Diff the tree against the snapshot, feed stability tracking, and
    /// return the set of changed paths.
    pub fn scan_once(&self) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = Vec::new();
        let mut current: HashMap<String, f64> = HashMap::new();

        if !self.root.exists() {
            return changed;
        }

        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path == self.root {
                continue;
            }
            // The snapshot itself changes every poll; never report it.
            if path.file_name().map(|n| n == SNAPSHOT_FILE).unwrap_or(false) {
                continue;
            }
            if !is_safe(path, &self.root) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let Some(mtime) = mtime_secs(&meta) else {
                continue;
            };

            let key = path.display().to_string();
            let previous = {
                let snapshot = self.snapshot.lock();
                snapshot.get(&key).copied()
            };

            match previous {
                None => {
                    changed.push(path.to_path_buf());
                    self.tracker.track(path, FileEventKind::Created);
                }
                Some(old) if (old - mtime).abs() > MTIME_EPSILON => {
                    changed.push(path.to_path_buf());
                    self.tracker.track(path, FileEventKind::Modified);
                }
                Some(_) => {}
            }

            current.insert(key, mtime);
        }

        // Entries in the snapshot but no longer on disk.
        let deleted: Vec<String> = {
            let snapshot = self.snapshot.lock();
            snapshot
                .keys()
                .filter(|k| !current.contains_key(*k))
                .cloned()
                .collect()
        };
        for key in deleted {
            let path = PathBuf::from(&key);
            if path.exists() {
                // Race: likely moved mid-walk. Treat as modified.
                changed.push(path);
            } else {
                self.tracker.track(&path, FileEventKind::Deleted);
                if let Some(parent) = path.parent() {
                    if parent.exists() {
                        changed.push(parent.to_path_buf());
                    }
                }
            }
        }

        *self.snapshot.lock() = current;
        changed
    }

    /// Long-lived polling loop; checks the cancel token at every iteration
    /// boundary.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(root = %self.root.display(), "polling watcher started");

        if !self.load_snapshot() {
            // No usable snapshot: the first diff doubles as the full scan.
            debug!(root = %self.root.display(), "building initial snapshot");
        }
        let initial = self.scan_once();
        if !initial.is_empty() {
            for path in &initial {
                self.coalescer.add(path);
            }
        }
        self.save_snapshot();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let changed = self.scan_once();
            if !changed.is_empty() {
                debug!(
                    root = %self.root.display(),
                    count = changed.len(),
                    "poll detected changes"
                );
                for path in &changed {
                    self.coalescer.add(path);
                }
            }
            self.save_snapshot();
        }

        info!(root = %self.root.display(), "polling watcher stopped");
    }

    /// Persist the snapshot beside the root for instant boot.
    pub fn save_snapshot(&self) {
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            snapshot: self.snapshot.lock().clone(),
        };

        match serde_json::to_vec(&file) {
            Ok(raw) => {
                if let Err(err) = std::fs::write(self.snapshot_path(), raw) {
                    error!(%err, "failed to save polling snapshot");
                } else {
                    debug!(entries = file.snapshot.len(), "saved polling snapshot");
                }
            }
            Err(err) => error!(%err, "failed to serialize polling snapshot"),
        }
    }

    /// Load a persisted snapshot. Version mismatch or parse failure falls
    /// back to a full initial scan.
    pub fn load_snapshot(&self) -> bool {
        let path = self.snapshot_path();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(_) => {
                info!(root = %self.root.display(), "no polling snapshot, initial scan required");
                return false;
            }
        };

        match serde_json::from_slice::<SnapshotFile>(&raw) {
            Ok(file) if file.version == SNAPSHOT_VERSION => {
                let age = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64() - file.timestamp)
                    .unwrap_or(0.0);
                info!(
                    entries = file.snapshot.len(),
                    age_secs = age as i64,
                    "loaded polling snapshot"
                );
                *self.snapshot.lock() = file.snapshot;
                true
            }
            Ok(file) => {
                warn!(version = file.version, "incompatible snapshot version, ignoring");
                false
            }
            Err(err) => {
                error!(%err, "failed to parse polling snapshot");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentinel::coalescer::DEFAULT_COALESCE_WINDOW;
    use std::fs;
    use tempfile::TempDir;

    fn watcher(root: &Path) -> PollingWatcher {
        PollingWatcher::new(
            root.to_path_buf(),
            Duration::from_millis(50),
            Arc::new(StabilityTracker::new(Duration::from_secs(45))),
            Arc::new(EventCoalescer::new(DEFAULT_COALESCE_WINDOW)),
        )
    }

    #[test]
    fn first_scan_reports_everything_then_quiesces() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("game")).unwrap();
        fs::write(root.path().join("game").join("start.exe"), b"x").unwrap();

        let watcher = watcher(root.path());
        let first = watcher.scan_once();
        assert_eq!(first.len(), 2);

        // Unchanged tree: zero changes.
        assert!(watcher.scan_once().is_empty());
    }

    #[test]
    fn new_and_deleted_files_are_detected() {
        let root = TempDir::new().unwrap();
        let watcher = watcher(root.path());
        watcher.scan_once();

        let file = root.path().join("fresh.bin");
        fs::write(&file, b"x").unwrap();
        let changed = watcher.scan_once();
        assert_eq!(changed, vec![file.clone()]);

        fs::remove_file(&file).unwrap();
        let changed = watcher.scan_once();
        // Deletion surfaces as the parent directory needing a rescan.
        assert_eq!(changed, vec![root.path().to_path_buf()]);
    }

    #[test]
    fn snapshot_round_trips_and_enables_instant_boot() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a.bin"), b"x").unwrap();

        let first = watcher(root.path());
        first.scan_once();
        first.save_snapshot();
        let saved = first.snapshot.lock().clone();

        let second = watcher(root.path());
        assert!(second.load_snapshot());
        assert_eq!(*second.snapshot.lock(), saved);

        // Booting from the snapshot over an unchanged tree is silent.
        assert!(second.scan_once().is_empty());
    }

    #[test]
    fn version_mismatch_forces_full_scan() {
        let root = TempDir::new().unwrap();
        let watcher = watcher(root.path());
        fs::write(
            watcher.snapshot_path(),
            br#"{"version": 99, "timestamp": 0.0, "snapshot": {}}"#,
        )
        .unwrap();

        assert!(!watcher.load_snapshot());
    }

    #[test]
    fn corrupt_snapshot_forces_full_scan() {
        let root = TempDir::new().unwrap();
        let watcher = watcher(root.path());
        fs::write(watcher.snapshot_path(), b"{broken").unwrap();

        assert!(!watcher.load_snapshot());
    }

    #[test]
    fn snapshot_file_itself_is_never_reported() {
        let root = TempDir::new().unwrap();
        let watcher = watcher(root.path());
        watcher.scan_once();
        watcher.save_snapshot();

        assert!(watcher.scan_once().is_empty());
    }
}
