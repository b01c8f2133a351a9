//! The stability pact: a path is acted on only after its size and mtime
//! have been static for a configured duration and it still exists. Large
//! copy/unpack sessions on NAS or bind-mounts quiesce before any work
//! triggers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use galdex_model::FileEventKind;
use parking_lot::Mutex;
use tracing::debug;

/// Default stability threshold.
pub const DEFAULT_STABILITY_THRESHOLD: Duration = Duration::from_secs(45);

/// A filesystem event held until it proves stable.
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
    pub initial_size: u64,
    pub initial_mtime: SystemTime,
    pub first_seen: Instant,
}

impl FileEvent {
    fn is_stable(&self, now: Instant, threshold: Duration) -> bool {
        if now.duration_since(self.first_seen) < threshold {
            return false;
        }
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return false;
        };
        let Ok(mtime) = meta.modified() else {
            return false;
        };
        meta.len() == self.initial_size && mtime == self.initial_mtime
    }
}

/// Tracks in-flight events keyed by path.
#[derive(Debug)]
pub struct StabilityTracker {
    threshold: Duration,
    tracked: Mutex<HashMap<PathBuf, FileEvent>>,
}

impl StabilityTracker {
    pub fn new(threshold: Duration) -> Self {
        StabilityTracker {
            threshold,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a path, or return the already-tracked event.
    ///
    /// Deleted paths are refused: there is nothing to watch stabilize.
    pub fn track(&self, path: &Path, kind: FileEventKind) -> Option<FileEvent> {
        let mut tracked = self.tracked.lock();
        if let Some(existing) = tracked.get(path) {
            return Some(existing.clone());
        }

        if kind == FileEventKind::Deleted {
            return None;
        }

        let meta = std::fs::metadata(path).ok()?;
        let mtime = meta.modified().ok()?;
        let event = FileEvent {
            path: path.to_path_buf(),
            kind,
            initial_size: meta.len(),
            initial_mtime: mtime,
            first_seen: Instant::now(),
        };

        debug!(path = %path.display(), "tracking event for stability");
        tracked.insert(path.to_path_buf(), event.clone());
        Some(event)
    }

    /// Return and forget every event that is now stable.
    pub fn check_stability(&self, now: Instant) -> Vec<FileEvent> {
        let mut tracked = self.tracked.lock();
        let stable: Vec<PathBuf> = tracked
            .iter()
            .filter(|(_, event)| event.is_stable(now, self.threshold))
            .map(|(path, _)| path.clone())
            .collect();

        stable
            .into_iter()
            .filter_map(|path| {
                debug!(path = %path.display(), "event stabilized");
                tracked.remove(&path)
            })
            .collect()
    }

    pub fn remove(&self, path: &Path) {
        self.tracked.lock().remove(path);
    }

    pub fn len(&self) -> usize {
        self.tracked.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.lock().is_empty()
    }
}
