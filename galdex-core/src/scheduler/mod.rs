//! Periodic task runner.
//!
//! Three jobs: library scan on an interval (0 disables it), a daily
//! backup at a wall-clock time, and the weekly trash retention sweep.
//! Jobs are re-entrant-safe (a run is skipped while the previous one is
//! still in flight) and honor the read-only fuse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backup::BackupManager;
use crate::sentinel::Sentinel;
use crate::txfs::{ReadOnlyFuse, TxEngine};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minutes between library scans; 0 means manual-only.
    pub scan_interval_min: u64,
    /// Wall-clock `HH:MM` of the daily backup.
    pub backup_time: String,
    /// Interval of the trash retention sweep.
    pub retention_sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            scan_interval_min: 0,
            backup_time: "04:00".to_string(),
            retention_sweep_interval: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Guard that marks a job busy for the duration of one run.
#[derive(Debug, Default)]
struct JobGuard {
    busy: AtomicBool,
}

impl JobGuard {
    /// `None` when the previous run has not finished yet.
    fn enter(&self) -> Option<JobSlot<'_>> {
        if self.busy.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(JobSlot { guard: self })
        }
    }
}

struct JobSlot<'a> {
    guard: &'a JobGuard,
}

impl Drop for JobSlot<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::SeqCst);
    }
}

/// Background scheduler owning its job tasks.
pub struct TaskScheduler {
    sentinel: Arc<Sentinel>,
    engine: TxEngine,
    backup: Arc<BackupManager>,
    fuse: ReadOnlyFuse,
    config: SchedulerConfig,
    scan_guard: Arc<JobGuard>,
    backup_guard: Arc<JobGuard>,
    sweep_guard: Arc<JobGuard>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.config)
            .finish()
    }
}

impl TaskScheduler {
    pub fn new(
        sentinel: Arc<Sentinel>,
        engine: TxEngine,
        backup: Arc<BackupManager>,
        fuse: ReadOnlyFuse,
        config: SchedulerConfig,
    ) -> Self {
        TaskScheduler {
            sentinel,
            engine,
            backup,
            fuse,
            config,
            scan_guard: Arc::new(JobGuard::default()),
            backup_guard: Arc::new(JobGuard::default()),
            sweep_guard: Arc::new(JobGuard::default()),
            cancel: Mutex::new(None),
        }
    }

    /// Start all jobs. Idempotent.
    pub fn start(&self) {
        let mut slot = self.cancel.lock();
        if slot.is_some() {
            warn!("scheduler is already running");
            return;
        }
        let cancel = CancellationToken::new();

        self.spawn_scan_job(cancel.clone());
        self.spawn_backup_job(cancel.clone());
        self.spawn_sweep_job(cancel.clone());

        *slot = Some(cancel);
        info!("task scheduler started");
    }

    pub fn shutdown(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
            info!("task scheduler shut down");
        }
    }

    fn spawn_scan_job(&self, cancel: CancellationToken) {
        if self.config.scan_interval_min == 0 {
            info!("library scan is manual-only (interval 0)");
            return;
        }

        let interval = Duration::from_secs(self.config.scan_interval_min * 60);
        let sentinel = Arc::clone(&self.sentinel);
        let guard = Arc::clone(&self.scan_guard);
        let fuse = self.fuse.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                if fuse.is_engaged() {
                    warn!("skipping scheduled scan: read-only mode");
                    continue;
                }
                let Some(_slot) = guard.enter() else {
                    warn!("skipping scheduled scan: previous run in flight");
                    continue;
                };

                info!("scheduled library scan");
                let sentinel = Arc::clone(&sentinel);
                let walk = tokio::task::spawn_blocking(move || {
                    sentinel.trigger_scan()
                })
                .await;
                if let Err(err) = walk {
                    error!(%err, "scheduled scan panicked");
                }
            }
        });
        info!(
            minutes = self.config.scan_interval_min,
            "library scan scheduled"
        );
    }

    fn spawn_backup_job(&self, cancel: CancellationToken) {
        let Some((hour, minute)) = parse_time(&self.config.backup_time) else {
            error!(time = %self.config.backup_time, "invalid backup time");
            return;
        };

        let backup = Arc::clone(&self.backup);
        let guard = Arc::clone(&self.backup_guard);
        let fuse = self.fuse.clone();

        tokio::spawn(async move {
            loop {
                let wait = duration_until_next(hour, minute);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                if fuse.is_engaged() {
                    warn!("skipping backup: read-only mode");
                    continue;
                }
                let Some(_slot) = guard.enter() else {
                    warn!("skipping backup: previous run in flight");
                    continue;
                };

                let backup = Arc::clone(&backup);
                let done = tokio::task::spawn_blocking(move || {
                    backup.backup_now()
                })
                .await;
                match done {
                    Ok(Ok(path)) => {
                        info!(dir = %path.display(), "scheduled backup done")
                    }
                    Ok(Err(err)) => error!(%err, "scheduled backup failed"),
                    Err(err) => error!(%err, "scheduled backup panicked"),
                }
            }
        });
        info!(hour, minute, "daily backup scheduled");
    }

    fn spawn_sweep_job(&self, cancel: CancellationToken) {
        let interval = self.config.retention_sweep_interval;
        let engine = self.engine.clone();
        let guard = Arc::clone(&self.sweep_guard);
        let fuse = self.fuse.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                if fuse.is_engaged() {
                    warn!("skipping retention sweep: read-only mode");
                    continue;
                }
                let Some(_slot) = guard.enter() else {
                    continue;
                };

                let engine = engine.clone();
                let swept = tokio::task::spawn_blocking(move || {
                    engine.sweep_retention()
                })
                .await;
                match swept {
                    Ok(deleted) => {
                        info!(deleted, "retention sweep complete")
                    }
                    Err(err) => error!(%err, "retention sweep panicked"),
                }
            }
        });
        info!(secs = interval.as_secs(), "retention sweep scheduled");
    }
}

fn parse_time(value: &str) -> Option<(u32, u32)> {
    let (hour, minute) = value.split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    (hour <= 23 && minute <= 59).then_some((hour, minute))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_guard_skips_overlapping_runs() {
        let guard = JobGuard::default();
        let slot = guard.enter().expect("first entry succeeds");
        assert!(guard.enter().is_none(), "re-entry refused while busy");
        drop(slot);
        assert!(guard.enter().is_some(), "free again after the run");
    }

    #[test]
    fn time_parsing_bounds() {
        assert_eq!(parse_time("04:00"), Some((4, 0)));
        assert_eq!(parse_time("23:59"), Some((23, 59)));
        assert_eq!(parse_time("25:00"), None);
        assert_eq!(parse_time("x"), None);
        assert!(duration_until_next(4, 0) <= Duration::from_secs(86_400));
    }
}
