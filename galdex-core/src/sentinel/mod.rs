//! Sentinel: noise-resilient multi-mode filesystem observer.
//!
//! Three modes with runtime switching. Realtime drives native watches (or
//! a polling fallback) through the stability tracker and event coalescer;
//! scheduled fires a daily full scan; manual stays idle until triggered.
//! The sentinel performs no database writes — consumers hook the single
//! directory callback.

pub mod coalescer;
pub mod polling;
pub mod stability;
#[cfg(feature = "watch")]
pub mod watcher;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use galdex_model::ScannerMode;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::txfs::sandbox::is_safe;

pub use coalescer::{DirectoryCallback, EventCoalescer, DEFAULT_COALESCE_WINDOW};
pub use polling::{PollingWatcher, DEFAULT_POLL_INTERVAL, SNAPSHOT_FILE};
pub use stability::{FileEvent, StabilityTracker, DEFAULT_STABILITY_THRESHOLD};

/// Tunables for the sentinel.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub stability_threshold: Duration,
    pub coalesce_window: Duration,
    pub poll_interval: Duration,
    /// Cadence of the background stability sweep.
    pub stability_check_interval: Duration,
    /// Wall-clock `HH:MM` for the daily scheduled scan.
    pub scheduled_time: String,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        SentinelConfig {
            stability_threshold: DEFAULT_STABILITY_THRESHOLD,
            coalesce_window: DEFAULT_COALESCE_WINDOW,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stability_check_interval: Duration::from_secs(5),
            scheduled_time: "03:00".to_string(),
        }
    }
}

#[derive(Default)]
struct SentinelState {
    running: bool,
    cancel: Option<CancellationToken>,
    #[cfg(feature = "watch")]
    native: Option<watcher::NativeWatcher>,
}

/// Multi-mode watcher over a set of library roots.
pub struct Sentinel {
    roots: Vec<PathBuf>,
    config: SentinelConfig,
    callback: DirectoryCallback,
    tracker: Arc<StabilityTracker>,
    coalescer: Arc<EventCoalescer>,
    mode: Mutex<ScannerMode>,
    state: Mutex<SentinelState>,
}

impl std::fmt::Debug for Sentinel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sentinel")
            .field("roots", &self.roots)
            .field("mode", &self.mode())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Sentinel {
    /// Build a sentinel. Must be constructed inside a tokio runtime; mode
    /// starts as `Manual` until configured otherwise.
    pub fn new(
        roots: Vec<PathBuf>,
        callback: DirectoryCallback,
        config: SentinelConfig,
    ) -> Self {
        let tracker = Arc::new(StabilityTracker::new(config.stability_threshold));
        let coalescer = Arc::new(EventCoalescer::new(config.coalesce_window));
        coalescer.set_callback(Arc::clone(&callback));

        info!(
            roots = roots.len(),
            "sentinel initialized in manual mode"
        );

        Sentinel {
            roots,
            config,
            callback,
            tracker,
            coalescer,
            mode: Mutex::new(ScannerMode::Manual),
            state: Mutex::new(SentinelState::default()),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn mode(&self) -> ScannerMode {
        *self.mode.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Start background work for the current mode. Idempotent.
    pub fn start(&self) {
        let mode = self.mode();
        let mut state = self.state.lock();
        if state.running {
            warn!("sentinel is already running");
            return;
        }
        state.running = true;
        self.start_mode(&mut state, mode);
        info!(mode = mode.as_str(), "sentinel started");
    }

    /// Stop all background work.
    pub fn stop(&self) {
        let mode = self.mode();
        let mut state = self.state.lock();
        if !state.running {
            warn!("sentinel is not running");
            return;
        }
        self.stop_mode(&mut state, mode);
        state.running = false;
        info!("sentinel stopped");
    }

    /// Switch modes without restarting the process. Safe at any time.
    pub fn configure(&self, new_mode: ScannerMode) {
        let mut mode = self.mode.lock();
        if *mode == new_mode {
            info!(mode = new_mode.as_str(), "already in requested mode");
            return;
        }

        info!(
            from = mode.as_str(),
            to = new_mode.as_str(),
            "switching sentinel mode"
        );

        let mut state = self.state.lock();
        if state.running {
            self.stop_mode(&mut state, *mode);
        }
        *mode = new_mode;
        if state.running {
            self.start_mode(&mut state, new_mode);
        }
    }

    fn start_mode(&self, state: &mut SentinelState, mode: ScannerMode) {
        match mode {
            ScannerMode::Realtime => self.start_realtime(state),
            ScannerMode::Scheduled => self.start_scheduled(state),
            ScannerMode::Manual => {}
        }
    }

    fn stop_mode(&self, state: &mut SentinelState, mode: ScannerMode) {
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        #[cfg(feature = "watch")]
        {
            state.native = None;
        }
        if mode == ScannerMode::Realtime {
            self.coalescer.stop();
        }
    }

    fn start_realtime(&self, state: &mut SentinelState) {
        self.coalescer.start();

        let cancel = CancellationToken::new();
        self.spawn_stability_checker(cancel.clone());

        #[cfg(feature = "watch")]
        {
            match watcher::NativeWatcher::start(
                &self.roots,
                Arc::clone(&self.tracker),
                Arc::clone(&self.coalescer),
                cancel.clone(),
            ) {
                Ok(native) => {
                    info!(roots = self.roots.len(), "realtime mode: native watchers running");
                    state.native = Some(native);
                    state.cancel = Some(cancel);
                    return;
                }
                Err(err) => {
                    warn!(%err, "native watch failed, falling back to polling");
                }
            }
        }

        self.spawn_polling(cancel.clone());
        state.cancel = Some(cancel);
    }

    fn spawn_polling(&self, cancel: CancellationToken) {
        for root in &self.roots {
            let watcher = Arc::new(PollingWatcher::new(
                root.clone(),
                self.config.poll_interval,
                Arc::clone(&self.tracker),
                Arc::clone(&self.coalescer),
            ));
            tokio::spawn(watcher.run(cancel.clone()));
        }
        info!(roots = self.roots.len(), "realtime mode: polling watchers running");
    }

    fn spawn_stability_checker(&self, cancel: CancellationToken) {
        let tracker = Arc::clone(&self.tracker);
        let coalescer = Arc::clone(&self.coalescer);
        let interval = self.config.stability_check_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                for event in tracker.check_stability(Instant::now()) {
                    coalescer.add(&event.path);
                }
            }
        });
    }

    fn start_scheduled(&self, state: &mut SentinelState) {
        let Some((hour, minute)) = parse_scheduled_time(&self.config.scheduled_time)
        else {
            error!(
                time = %self.config.scheduled_time,
                "invalid scheduled time, scheduled mode is idle"
            );
            return;
        };

        let cancel = CancellationToken::new();
        let roots = self.roots.clone();
        let callback = Arc::clone(&self.callback);
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                let wait = duration_until_next(hour, minute);
                info!(secs = wait.as_secs(), "next scheduled scan");
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                let dirs = full_scan(&roots);
                if !dirs.is_empty() {
                    callback(dirs);
                }
            }
        });

        state.cancel = Some(cancel);
        info!(hour, minute, "scheduled mode armed");
    }

    /// One-shot full scan; useful in any mode, the whole point of manual.
    pub fn trigger_scan(&self) -> Vec<PathBuf> {
        info!("manual scan triggered");
        let dirs = full_scan(&self.roots);
        if !dirs.is_empty() {
            (self.callback)(dirs.clone());
            info!(count = dirs.len(), "manual scan completed");
        }
        dirs
    }
}

impl Drop for Sentinel {
    fn drop(&mut self) {
        let mode = *self.mode.lock();
        let mut state = self.state.lock();
        if state.running {
            self.stop_mode(&mut state, mode);
        }
    }
}

/// Walk every root and return the set of directories holding any entry.
/// Falls back to the roots themselves when only they have content.
pub fn full_scan(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
    let mut items_seen = 0usize;

    for root in roots {
        for entry in walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path == root {
                continue;
            }
            if path
                .file_name()
                .map(|n| n == SNAPSHOT_FILE)
                .unwrap_or(false)
            {
                continue;
            }
            items_seen += 1;

            if !roots.iter().any(|r| is_safe(path, r)) {
                continue;
            }

            if entry.file_type().is_dir() {
                dirs.insert(path.to_path_buf());
            } else if let Some(parent) = path.parent() {
                dirs.insert(parent.to_path_buf());
            }
        }
    }

    if dirs.is_empty() && items_seen > 0 {
        for root in roots {
            dirs.insert(root.clone());
        }
    }

    info!(
        items = items_seen,
        directories = dirs.len(),
        "full scan complete"
    );
    dirs.into_iter().collect()
}

fn parse_scheduled_time(value: &str) -> Option<(u32, u32)> {
    let (hour, minute) = value.split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

fn duration_until_next(hour: u32, minute: u32) -> Duration {
    let now = chrono::Local::now().naive_local();
    let today = now.date().and_hms_opt(hour, minute, 0).expect("validated");
    let target = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (target - now).to_std().unwrap_or(Duration::from_secs(60))
}

/// Convenience for callers that only need containment against many roots.
pub fn safe_in_roots(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| is_safe(path, root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn full_scan_returns_directories_with_content() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("game1")).unwrap();
        fs::write(root.path().join("game1").join("start.exe"), b"x").unwrap();
        fs::create_dir(root.path().join("empty")).unwrap();

        let dirs = full_scan(&[root.path().to_path_buf()]);
        assert!(dirs.contains(&root.path().join("game1")));
        assert!(dirs.contains(&root.path().join("empty")));
    }

    #[test]
    fn full_scan_of_flat_root_returns_root() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("loose-file.exe"), b"x").unwrap();

        let dirs = full_scan(&[root.path().to_path_buf()]);
        assert_eq!(dirs, vec![root.path().to_path_buf()]);
    }

    #[test]
    fn full_scan_of_empty_root_is_empty() {
        let root = TempDir::new().unwrap();
        assert!(full_scan(&[root.path().to_path_buf()]).is_empty());
    }

    #[test]
    fn scheduled_time_parsing() {
        assert_eq!(parse_scheduled_time("03:00"), Some((3, 0)));
        assert_eq!(parse_scheduled_time("23:59"), Some((23, 59)));
        assert_eq!(parse_scheduled_time("24:00"), None);
        assert_eq!(parse_scheduled_time("garbage"), None);

        let wait = duration_until_next(3, 0);
        assert!(wait <= Duration::from_secs(24 * 60 * 60));
    }

    #[tokio::test]
    async fn manual_trigger_invokes_callback_once() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("game")).unwrap();
        fs::write(root.path().join("game").join("data.xp3"), b"x").unwrap();

        let calls: Arc<PMutex<Vec<Vec<PathBuf>>>> = Arc::new(PMutex::new(Vec::new()));
        let sink = Arc::clone(&calls);

        let sentinel = Sentinel::new(
            vec![root.path().to_path_buf()],
            Arc::new(move |dirs| sink.lock().push(dirs)),
            SentinelConfig::default(),
        );

        let dirs = sentinel.trigger_scan();
        assert_eq!(dirs, vec![root.path().join("game")]);
        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn mode_switching_is_safe_while_running() {
        let root = TempDir::new().unwrap();
        let sentinel = Sentinel::new(
            vec![root.path().to_path_buf()],
            Arc::new(|_| {}),
            SentinelConfig {
                poll_interval: Duration::from_millis(50),
                stability_check_interval: Duration::from_millis(20),
                ..SentinelConfig::default()
            },
        );

        assert_eq!(sentinel.mode(), ScannerMode::Manual);
        sentinel.start();
        assert!(sentinel.is_running());

        sentinel.configure(ScannerMode::Realtime);
        assert_eq!(sentinel.mode(), ScannerMode::Realtime);

        sentinel.configure(ScannerMode::Scheduled);
        assert_eq!(sentinel.mode(), ScannerMode::Scheduled);

        sentinel.configure(ScannerMode::Manual);
        sentinel.stop();
        assert!(!sentinel.is_running());
    }
}
