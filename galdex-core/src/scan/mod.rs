//! Scan orchestration: the piece that turns sentinel notifications into
//! candidates and clusters.
//!
//! The sentinel hands over directories; this service runs the detector on
//! each, persists candidates and instance rows, and feeds the cluster
//! engine. Long scans are pausable (cooperative flag) and cancellable
//! (token), with progress visible to the API.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use chrono::Utc;
use dashmap::DashMap;
use galdex_model::{
    LocalInstance, ScanCandidate, ScanId, ScanProgress, ScanStatus,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cluster::ClusterEngine;
use crate::database::{CandidateRepository, Database, InstanceRepository};
use crate::detector;
use crate::error::{CoreError, Result};
use crate::sentinel::DirectoryCallback;
use crate::txfs::ReadOnlyFuse;

/// Orchestrates detection over directories delivered by the sentinel.
pub struct ScanService {
    candidates: CandidateRepository,
    instances: InstanceRepository,
    cluster_engine: Arc<ClusterEngine>,
    fuse: ReadOnlyFuse,
    active: DashMap<ScanId, ScanProgress>,
    paused: Arc<AtomicBool>,
    current: Mutex<Option<(ScanId, CancellationToken)>>,
}

impl std::fmt::Debug for ScanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanService")
            .field("active_scans", &self.active.len())
            .field("paused", &self.paused.load(Ordering::SeqCst))
            .finish()
    }
}

/// Opaque fingerprint of a folder's top-level contents.
fn scan_signature(folder: &Path) -> Option<String> {
    let mut names: Vec<String> = std::fs::read_dir(folder)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| {
            let size = e.metadata().map(|m| m.len()).unwrap_or(0);
            format!("{}:{size}", e.file_name().to_string_lossy())
        })
        .collect();
    names.sort();

    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    Some(
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect(),
    )
}

fn folder_mtime_secs(folder: &Path) -> i64 {
    std::fs::metadata(folder)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl ScanService {
    pub fn new(db: Database, cluster_engine: Arc<ClusterEngine>, fuse: ReadOnlyFuse) -> Self {
        ScanService {
            candidates: CandidateRepository::new(db.pool().clone()),
            instances: InstanceRepository::new(db.pool().clone()),
            cluster_engine,
            fuse,
            active: DashMap::new(),
            paused: Arc::new(AtomicBool::new(false)),
            current: Mutex::new(None),
        }
    }

    /// Callback suitable for `Sentinel::new`: directories fan into a
    /// background processing task.
    pub fn directory_sink(self: &Arc<Self>) -> DirectoryCallback {
        let service = Arc::clone(self);
        Arc::new(move |dirs: Vec<PathBuf>| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                if let Err(err) = service.process_directories(dirs).await {
                    error!(%err, "scan processing failed");
                }
            });
        })
    }

    /// Detect, persist and cluster over the given directories.
    pub async fn process_directories(
        &self,
        dirs: Vec<PathBuf>,
    ) -> Result<ScanProgress> {
        self.fuse.ensure_writable()?;

        let scan_id = ScanId::new();
        let cancel = CancellationToken::new();
        {
            let mut current = self.current.lock();
            if current.is_some() {
                warn!("scan already in progress, refusing overlap");
                return Err(CoreError::Precondition(
                    "scan already in progress".to_string(),
                ));
            }
            *current = Some((scan_id, cancel.clone()));
        }

        let mut progress = ScanProgress::started(scan_id, dirs.clone());
        progress.directories_total = dirs.len();
        self.active.insert(scan_id, progress.clone());

        let result = self
            .run_scan(&mut progress, &dirs, &cancel)
            .await;

        progress.completed_at = Some(Utc::now());
        progress.status = match &result {
            Ok(()) => ScanStatus::Completed,
            Err(CoreError::Cancelled(_)) => ScanStatus::Cancelled,
            Err(_) => ScanStatus::Failed,
        };
        self.active.insert(scan_id, progress.clone());
        *self.current.lock() = None;

        match result {
            Ok(()) => {
                info!(
                    scan = %scan_id,
                    candidates = progress.candidates_found,
                    clusters = progress.clusters_updated,
                    "scan complete"
                );
                Ok(progress)
            }
            Err(CoreError::Cancelled(_)) => Ok(progress),
            Err(err) => {
                progress.errors.push(err.to_string());
                Err(err)
            }
        }
    }

    async fn run_scan(
        &self,
        progress: &mut ScanProgress,
        dirs: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut found: Vec<ScanCandidate> = Vec::new();

        for dir in dirs {
            // Cooperative pause: wait it out between items.
            while self.paused.load(Ordering::SeqCst) {
                if cancel.is_cancelled() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled("scan cancelled".to_string()));
            }

            progress.current_path = Some(dir.display().to_string());

            if let Some(candidate) = detector::analyze_folder(dir) {
                self.candidates.upsert_scan_candidate(&candidate).await?;

                let mut instance = LocalInstance::new(
                    candidate.path.clone(),
                    candidate.effective_title().to_string(),
                );
                instance.scan_signature = scan_signature(dir);
                instance.folder_mtime = folder_mtime_secs(dir);
                self.instances.upsert(&instance).await?;

                progress.candidates_found += 1;
                found.push(candidate);
            }

            progress.directories_scanned += 1;
            self.active.insert(progress.scan_id, progress.clone());
        }

        let clusters = self.cluster_engine.process_candidates(&found).await?;
        progress.clusters_updated = clusters.len();
        Ok(())
    }

    /// Pause between items; running detector work finishes first.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("scan paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("scan resumed");
    }

    pub fn cancel(&self) {
        if let Some((scan_id, cancel)) = self.current.lock().as_ref() {
            cancel.cancel();
            info!(scan = %scan_id, "scan cancellation requested");
        }
        // A paused scan must wake up to observe the cancellation.
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_scanning(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn progress(&self, scan_id: ScanId) -> Option<ScanProgress> {
        self.active.get(&scan_id).map(|p| p.value().clone())
    }

    /// Most recently started scan, running or finished.
    pub fn latest_progress(&self) -> Option<ScanProgress> {
        self.active
            .iter()
            .map(|entry| entry.value().clone())
            .max_by_key(|p| p.started_at)
    }
}
