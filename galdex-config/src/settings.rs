use std::path::{Path, PathBuf};

use galdex_model::ScannerMode;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const DATABASE_FILE: &str = "galdex.db";

/// Sentinel tuning, persisted in `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerSettings {
    pub mode: ScannerMode,
    pub stability_threshold_secs: u64,
    pub coalesce_window_secs: u64,
    pub poll_interval_secs: u64,
    /// Wall-clock `HH:MM` of the daily scan in scheduled mode.
    pub scheduled_time: String,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        ScannerSettings {
            mode: ScannerMode::Manual,
            stability_threshold_secs: 45,
            coalesce_window_secs: 5,
            poll_interval_secs: 600,
            scheduled_time: "03:00".to_string(),
        }
    }
}

/// Scheduler tuning, persisted in `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Minutes between automatic scans; 0 keeps scanning manual.
    pub scan_interval_min: u64,
    /// Wall-clock `HH:MM` of the daily backup.
    pub backup_time: String,
    pub backup_keep: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            scan_interval_min: 0,
            backup_time: "04:00".to_string(),
            backup_keep: 5,
        }
    }
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub library_roots: Vec<PathBuf>,
    pub config_dir: PathBuf,
    pub sandbox_mode: bool,
    pub portable_mode: bool,
    pub scanner: ScannerSettings,
    pub scheduler: SchedulerSettings,
}

/// The subset of [`Settings`] persisted to `config.json`. Path decisions
/// live in the environment, not the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub scanner: Option<ScannerSettings>,
    #[serde(default)]
    pub scheduler: Option<SchedulerSettings>,
}

impl Settings {
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn database_path(&self) -> PathBuf {
        self.config_dir.join(DATABASE_FILE)
    }

    /// Merge persisted overrides from `config.json` when present.
    pub fn apply_file_overrides(&mut self) -> Result<()> {
        let path = self.config_file();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(_) => return Ok(()),
        };
        let file: FileSettings = serde_json::from_slice(&raw)?;
        if let Some(scanner) = file.scanner {
            self.scanner = scanner;
        }
        if let Some(scheduler) = file.scheduler {
            self.scheduler = scheduler;
        }
        Ok(())
    }

    /// Persist the tunable parts back to `config.json`.
    pub fn save(&self) -> Result<()> {
        let file = FileSettings {
            scanner: Some(self.scanner.clone()),
            scheduler: Some(self.scheduler.clone()),
        };
        let raw = serde_json::to_vec_pretty(&file)?;
        std::fs::write(self.config_file(), raw)?;
        Ok(())
    }

    /// Create the config dir and every library root that is missing.
    pub fn ensure_directories(&self) -> Result<()> {
        ensure_dir(&self.config_dir)?;
        for root in &self.library_roots {
            ensure_dir(root)?;
        }
        Ok(())
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| {
        ConfigError::DirectoryUnavailable {
            path: path.display().to_string(),
            source,
        }
    })
}
