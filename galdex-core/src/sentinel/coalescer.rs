//! Directory-level event coalescing.
//!
//! Fifty file events from one unpacking session collapse into a single
//! scan of their parent directory. The drain task fires the registered
//! callback at most once per window, sequentially.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default coalesce window.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_secs(5);

/// Receives the set of parent directories to (re)examine.
pub type DirectoryCallback = Arc<dyn Fn(Vec<PathBuf>) + Send + Sync>;

#[derive(Default)]
struct Pending {
    by_parent: HashMap<PathBuf, HashSet<PathBuf>>,
}

/// Groups path events by parent directory and drains them periodically.
pub struct EventCoalescer {
    window: Duration,
    pending: Arc<Mutex<Pending>>,
    callback: Arc<RwLock<Option<DirectoryCallback>>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for EventCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCoalescer")
            .field("window", &self.window)
            .field("pending_parents", &self.pending.lock().by_parent.len())
            .finish()
    }
}

impl EventCoalescer {
    pub fn new(window: Duration) -> Self {
        EventCoalescer {
            window,
            pending: Arc::new(Mutex::new(Pending::default())),
            callback: Arc::new(RwLock::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Register the single callback slot.
    pub fn set_callback(&self, callback: DirectoryCallback) {
        *self.callback.write() = Some(callback);
    }

    /// Queue a changed path under its parent directory.
    pub fn add(&self, path: &Path) {
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.to_path_buf());

        let mut pending = self.pending.lock();
        pending
            .by_parent
            .entry(parent.clone())
            .or_default()
            .insert(path.to_path_buf());
        debug!(path = %path.display(), parent = %parent.display(), "queued for coalescing");
    }

    /// Drain everything pending immediately, returning the parent set.
    pub fn flush(&self) -> Vec<PathBuf> {
        let mut pending = self.pending.lock();
        pending.by_parent.drain().map(|(parent, _)| parent).collect()
    }

    /// Start the background drain task. Idempotent.
    pub fn start(&self) {
        let mut slot = self.task.lock();
        if slot.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let pending = Arc::clone(&self.pending);
        let callback = Arc::clone(&self.callback);
        let window = self.window;
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(window) => {}
                }

                let parents: Vec<PathBuf> = {
                    let mut pending = pending.lock();
                    if pending.by_parent.is_empty() {
                        continue;
                    }
                    pending.by_parent.drain().map(|(parent, _)| parent).collect()
                };

                let Some(callback) = callback.read().clone() else {
                    continue;
                };
                info!(count = parents.len(), "coalescing directory events");
                callback(parents);
            }
        });

        *slot = Some((cancel, handle));
        info!("event coalescer started");
    }

    /// Stop the drain task. Pending events stay queued.
    pub fn stop(&self) {
        let mut slot = self.task.lock();
        if let Some((cancel, handle)) = slot.take() {
            cancel.cancel();
            handle.abort();
            info!("event coalescer stopped");
        } else {
            warn!("event coalescer was not running");
        }
    }
}

impl Drop for EventCoalescer {
    fn drop(&mut self) {
        if let Some((cancel, handle)) = self.task.lock().take() {
            cancel.cancel();
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_group_by_parent() {
        let coalescer = EventCoalescer::new(Duration::from_millis(50));
        coalescer.add(Path::new("/library/game/a.xp3"));
        coalescer.add(Path::new("/library/game/b.xp3"));
        coalescer.add(Path::new("/library/other/c.exe"));

        let mut parents = coalescer.flush();
        parents.sort();
        assert_eq!(
            parents,
            vec![
                PathBuf::from("/library/game"),
                PathBuf::from("/library/other"),
            ]
        );
        assert!(coalescer.flush().is_empty());
    }

    #[tokio::test]
    async fn burst_on_one_parent_fires_one_callback() {
        let coalescer = EventCoalescer::new(Duration::from_millis(40));
        let calls: Arc<Mutex<Vec<Vec<PathBuf>>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&calls);
        coalescer.set_callback(Arc::new(move |dirs| {
            sink.lock().push(dirs);
        }));
        coalescer.start();

        for i in 0..50 {
            coalescer.add(&PathBuf::from(format!("/library/game/file{i}.bin")));
        }

        tokio::time::sleep(Duration::from_millis(160)).await;
        coalescer.stop();

        let calls = calls.lock();
        assert_eq!(calls.len(), 1, "one window, one invocation");
        assert_eq!(calls[0], vec![PathBuf::from("/library/game")]);
    }

    #[tokio::test]
    async fn empty_windows_fire_nothing() {
        let coalescer = EventCoalescer::new(Duration::from_millis(20));
        let calls: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));

        let sink = Arc::clone(&calls);
        coalescer.set_callback(Arc::new(move |_| {
            *sink.lock() += 1;
        }));
        coalescer.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        coalescer.stop();

        assert_eq!(*calls.lock(), 0);
    }
}
