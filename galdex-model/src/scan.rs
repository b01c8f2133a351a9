use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::ids::ScanId;

/// Sentinel operating mode. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScannerMode {
    /// Native OS watch with stability debouncing and coalescing; falls back
    /// to polling when the native watcher cannot initialize.
    Realtime,
    /// Daily full scan at a configured wall-clock time.
    Scheduled,
    /// Idle; scans run only on explicit trigger.
    Manual,
}

impl ScannerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerMode::Realtime => "realtime",
            ScannerMode::Scheduled => "scheduled",
            ScannerMode::Manual => "manual",
        }
    }
}

impl std::str::FromStr for ScannerMode {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "realtime" => Ok(ScannerMode::Realtime),
            "scheduled" => Ok(ScannerMode::Scheduled),
            "manual" => Ok(ScannerMode::Manual),
            other => Err(ModelError::UnknownVariant {
                kind: "scanner mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of raw filesystem event observed by the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

/// Status of an in-flight or finished scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScanStatus {
    Pending,
    Scanning,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// Progress snapshot for one scan run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanProgress {
    pub scan_id: ScanId,
    pub status: ScanStatus,
    pub roots: Vec<PathBuf>,
    pub directories_total: usize,
    pub directories_scanned: usize,
    pub candidates_found: usize,
    pub clusters_updated: usize,
    pub current_path: Option<String>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanProgress {
    pub fn started(scan_id: ScanId, roots: Vec<PathBuf>) -> Self {
        ScanProgress {
            scan_id,
            status: ScanStatus::Scanning,
            roots,
            directories_total: 0,
            directories_scanned: 0,
            candidates_found: 0,
            clusters_updated: 0,
            current_path: None,
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}
