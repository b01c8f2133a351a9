//! Native OS watcher (inotify / FSEvents / ReadDirectoryChangesW).
//!
//! Raw notify events are filtered against the sandbox, classified, and fed
//! into the stability tracker; deletions go straight to the coalescer
//! since there is nothing left to stabilize.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::sentinel::coalescer::EventCoalescer;
use crate::sentinel::stability::StabilityTracker;
use crate::txfs::sandbox::is_safe;
use galdex_model::FileEventKind;

/// Handle over the native watchers for all roots. Dropping it stops the
/// OS-level watches.
pub struct NativeWatcher {
    _watchers: Vec<RecommendedWatcher>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for NativeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeWatcher")
            .field("watchers", &self._watchers.len())
            .finish()
    }
}

impl NativeWatcher {
    /// Install a recursive watch on every root.
    ///
    /// Errors here are expected in constrained containers; the caller
    /// falls back to polling.
    pub fn start(
        roots: &[PathBuf],
        tracker: Arc<StabilityTracker>,
        coalescer: Arc<EventCoalescer>,
        cancel: CancellationToken,
    ) -> notify::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let mut watchers = Vec::with_capacity(roots.len());
        for root in roots {
            let tx = tx.clone();
            let mut watcher = RecommendedWatcher::new(
                move |result: notify::Result<Event>| match result {
                    Ok(event) => {
                        let _ = tx.send(event);
                    }
                    Err(err) => error!(%err, "native watch error"),
                },
                notify::Config::default(),
            )?;
            watcher.watch(root, RecursiveMode::Recursive)?;
            info!(root = %root.display(), "native watch installed");
            watchers.push(watcher);
        }

        let roots = roots.to_vec();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        dispatch(&event, &roots, &tracker, &coalescer);
                    }
                }
            }
        });

        Ok(NativeWatcher {
            _watchers: watchers,
            task,
        })
    }
}

impl Drop for NativeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn classify(kind: &EventKind) -> Option<FileEventKind> {
    match kind {
        EventKind::Create(_) => Some(FileEventKind::Created),
        EventKind::Modify(_) => Some(FileEventKind::Modified),
        EventKind::Remove(_) => Some(FileEventKind::Deleted),
        // Access and catch-all events are noise.
        _ => None,
    }
}

fn dispatch(
    event: &Event,
    roots: &[PathBuf],
    tracker: &StabilityTracker,
    coalescer: &EventCoalescer,
) {
    let Some(kind) = classify(&event.kind) else {
        return;
    };

    // A two-path modify is a rename: both sides need a rescan.
    if event.paths.len() == 2 && matches!(event.kind, EventKind::Modify(_)) {
        for path in &event.paths {
            if safe_in_any_root(path, roots) {
                coalescer.add(path);
            }
        }
        return;
    }

    for path in &event.paths {
        if !safe_in_any_root(path, roots) {
            debug!(path = %path.display(), "ignoring unsafe path");
            continue;
        }

        match kind {
            FileEventKind::Deleted => coalescer.add(path),
            _ => {
                tracker.track(path, kind);
            }
        }
    }
}

fn safe_in_any_root(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| is_safe(path, root))
}
