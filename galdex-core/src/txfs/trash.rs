//! Smart trash: quota + retention + disk-headroom enforced delete staging.
//!
//! Deletes are never destructive at commit time; content is staged under
//! `<config>/.trash/<tx_id>/<original_name>` and only swept by policy.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use galdex_model::{TrashConfig, TrashStatus, TxId};
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::error::Result;

pub const TRASH_DIR: &str = ".trash";
pub const TRASH_CONFIG_FILE: &str = "trash_config.json";

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Manages the trash directory and its policy.
#[derive(Debug)]
pub struct SmartTrash {
    config_dir: PathBuf,
    trash_dir: PathBuf,
    config_file: PathBuf,
    config: RwLock<TrashConfig>,
}

impl SmartTrash {
    pub fn open(config_dir: &Path) -> Result<Self> {
        let trash_dir = config_dir.join(TRASH_DIR);
        let config_file = config_dir.join(TRASH_CONFIG_FILE);

        let config = match std::fs::read_to_string(&config_file) {
            Ok(raw) => match serde_json::from_str::<TrashConfig>(&raw) {
                Ok(config) => config,
                Err(err) => {
                    warn!(%err, "failed to parse trash config, using defaults");
                    TrashConfig::default()
                }
            },
            Err(_) => {
                let config = TrashConfig::default();
                Self::persist(&config_file, &config)?;
                config
            }
        };

        std::fs::create_dir_all(&trash_dir)?;

        Ok(SmartTrash {
            config_dir: config_dir.to_path_buf(),
            trash_dir,
            config_file,
            config: RwLock::new(config),
        })
    }

    fn persist(config_file: &Path, config: &TrashConfig) -> Result<()> {
        let raw = serde_json::to_string_pretty(config)?;
        std::fs::write(config_file, raw)?;
        Ok(())
    }

    pub fn trash_dir(&self) -> &Path {
        &self.trash_dir
    }

    pub fn config(&self) -> TrashConfig {
        self.config.read().clone()
    }

    /// Staging directory for one transaction's deleted content.
    pub fn staging_dir(&self, tx_id: TxId) -> PathBuf {
        self.trash_dir.join(tx_id.to_string())
    }

    /// Update the persisted policy, then immediately re-enforce headroom.
    pub fn update_config(
        &self,
        max_size_gb: Option<f64>,
        retention_days: Option<i64>,
        min_disk_free_gb: Option<f64>,
    ) -> Result<TrashConfig> {
        let updated = {
            let mut config = self.config.write();
            if let Some(max) = max_size_gb {
                config.max_size_gb = max;
            }
            if let Some(days) = retention_days {
                config.retention_days = days;
            }
            if let Some(floor) = min_disk_free_gb {
                config.min_disk_free_gb = floor;
            }
            config.clone()
        };
        Self::persist(&self.config_file, &updated)?;
        self.ensure_headroom()?;
        Ok(updated)
    }

    /// Current trash size in bytes, tolerant of entries disappearing
    /// mid-walk.
    pub fn trash_size_bytes(&self) -> u64 {
        let mut total = 0u64;
        for tx_dir in self.tx_dirs() {
            for entry in walkdir::WalkDir::new(&tx_dir.path)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    if let Ok(meta) = entry.metadata() {
                        total += meta.len();
                    }
                }
            }
        }
        total
    }

    /// Free space on the volume hosting the config dir. Unknown capacity
    /// reads as unlimited so a probing failure never blocks deletes.
    pub fn disk_free_bytes(&self) -> u64 {
        match fs2::available_space(&self.config_dir) {
            Ok(free) => free,
            Err(err) => {
                error!(%err, "failed to probe free disk space");
                u64::MAX
            }
        }
    }

    fn tx_dirs(&self) -> Vec<TxDirEntry> {
        let Ok(read_dir) = std::fs::read_dir(&self.trash_dir) else {
            return Vec::new();
        };

        let mut dirs = Vec::new();
        for entry in read_dir.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            dirs.push(TxDirEntry { path, modified });
        }
        dirs
    }

    fn within_limits(&self) -> bool {
        let config = self.config.read();
        if config.max_size_gb > 0.0 {
            let size_gb = self.trash_size_bytes() as f64 / BYTES_PER_GB;
            if size_gb > config.max_size_gb {
                return false;
            }
        }
        let free_gb = self.disk_free_bytes() as f64 / BYTES_PER_GB;
        free_gb >= config.min_disk_free_gb
    }

    /// Delete oldest transaction directories until quota and disk floor
    /// hold again, or the trash is empty. Returns how many were removed.
    pub fn ensure_headroom(&self) -> Result<usize> {
        let config = self.config.read().clone();
        let size_gb = self.trash_size_bytes() as f64 / BYTES_PER_GB;
        let free_gb = self.disk_free_bytes() as f64 / BYTES_PER_GB;

        let over_quota = config.max_size_gb > 0.0 && size_gb > config.max_size_gb;
        let under_floor = free_gb < config.min_disk_free_gb;

        if !over_quota && !under_floor {
            return Ok(0);
        }

        if over_quota {
            warn!(
                size_gb,
                max_gb = config.max_size_gb,
                "trash exceeds quota, cleaning oldest transactions"
            );
        }
        if under_floor {
            warn!(
                free_gb,
                floor_gb = config.min_disk_free_gb,
                "disk free below minimum, emergency trash cleanup"
            );
        }

        let mut dirs = self.tx_dirs();
        dirs.sort_by_key(|d| d.modified);

        let mut deleted = 0usize;
        for dir in dirs {
            if self.within_limits() {
                break;
            }
            match std::fs::remove_dir_all(&dir.path) {
                Ok(()) => {
                    deleted += 1;
                    info!(dir = %dir.path.display(), "deleted old trash");
                }
                Err(err) => {
                    error!(dir = %dir.path.display(), %err, "failed to delete trash");
                }
            }
        }

        info!(deleted, "headroom cleanup finished");
        Ok(deleted)
    }

    /// Delete transaction directories older than the retention window.
    pub fn cleanup_by_retention(&self) -> usize {
        let retention_days = self.config.read().retention_days;
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let mut deleted = 0usize;

        for dir in self.tx_dirs() {
            if dir.modified >= cutoff {
                continue;
            }
            match std::fs::remove_dir_all(&dir.path) {
                Ok(()) => {
                    deleted += 1;
                    info!(dir = %dir.path.display(), "deleted expired trash");
                }
                Err(err) => {
                    error!(dir = %dir.path.display(), %err, "failed to delete expired trash");
                }
            }
        }

        deleted
    }

    /// Empty all trash immediately.
    pub fn empty(&self) -> usize {
        let mut deleted = 0usize;
        for dir in self.tx_dirs() {
            match std::fs::remove_dir_all(&dir.path) {
                Ok(()) => deleted += 1,
                Err(err) => {
                    error!(dir = %dir.path.display(), %err, "failed to delete trash");
                }
            }
        }
        warn!(deleted, "emptied all trash");
        deleted
    }

    pub fn status(&self) -> TrashStatus {
        let config = self.config.read().clone();
        let dirs = self.tx_dirs();
        let oldest = dirs.iter().map(|d| d.modified).min();

        TrashStatus {
            items: dirs.len(),
            trash_size_gb: self.trash_size_bytes() as f64 / BYTES_PER_GB,
            disk_free_gb: self.disk_free_bytes() as f64 / BYTES_PER_GB,
            max_size_gb: config.max_size_gb,
            min_disk_free_gb: config.min_disk_free_gb,
            retention_days: config.retention_days,
            oldest_item: oldest,
        }
    }
}

#[derive(Debug)]
struct TxDirEntry {
    path: PathBuf,
    modified: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn stage_fake_tx(trash: &SmartTrash, name: &str, bytes: usize) -> PathBuf {
        let dir = trash.trash_dir().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("victim.bin"), vec![0u8; bytes]).unwrap();
        dir
    }

    #[test]
    fn default_config_is_persisted_on_first_open() {
        let dir = TempDir::new().unwrap();
        let trash = SmartTrash::open(dir.path()).unwrap();

        assert!(dir.path().join(TRASH_CONFIG_FILE).exists());
        assert_eq!(trash.config(), TrashConfig::default());
    }

    #[test]
    fn corrupt_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(TRASH_CONFIG_FILE), b"{broken").unwrap();

        let trash = SmartTrash::open(dir.path()).unwrap();
        assert_eq!(trash.config(), TrashConfig::default());
    }

    #[test]
    fn headroom_deletes_oldest_until_quota_holds() {
        let dir = TempDir::new().unwrap();
        let trash = SmartTrash::open(dir.path()).unwrap();

        // ~100 KB quota, three 100 KB transactions staged.
        trash
            .update_config(Some(0.0001), None, Some(0.0))
            .unwrap();

        let oldest = stage_fake_tx(&trash, "tx-oldest", 100 * 1024);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let middle = stage_fake_tx(&trash, "tx-middle", 100 * 1024);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let newest = stage_fake_tx(&trash, "tx-newest", 100 * 1024);

        let deleted = trash.ensure_headroom().unwrap();

        assert_eq!(deleted, 2);
        assert!(!oldest.exists());
        assert!(!middle.exists());
        assert!(newest.exists());
    }

    #[test]
    fn headroom_is_noop_within_limits() {
        let dir = TempDir::new().unwrap();
        let trash = SmartTrash::open(dir.path()).unwrap();
        trash.update_config(Some(1.0), None, Some(0.0)).unwrap();

        stage_fake_tx(&trash, "tx-small", 1024);
        assert_eq!(trash.ensure_headroom().unwrap(), 0);
    }

    #[test]
    fn zero_quota_means_unlimited() {
        let dir = TempDir::new().unwrap();
        let trash = SmartTrash::open(dir.path()).unwrap();
        trash.update_config(Some(0.0), None, Some(0.0)).unwrap();

        stage_fake_tx(&trash, "tx-big", 300 * 1024);
        assert_eq!(trash.ensure_headroom().unwrap(), 0);
    }

    #[test]
    fn retention_sweep_removes_old_directories() {
        let dir = TempDir::new().unwrap();
        let trash = SmartTrash::open(dir.path()).unwrap();
        let staged = stage_fake_tx(&trash, "tx-old", 10);

        // Nothing is old enough yet.
        assert_eq!(trash.cleanup_by_retention(), 0);

        // Retention of zero days expires everything staged before now.
        trash.update_config(None, Some(0), None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(trash.cleanup_by_retention(), 1);
        assert!(!staged.exists());
    }

    #[test]
    fn empty_removes_everything_and_reports_status() {
        let dir = TempDir::new().unwrap();
        let trash = SmartTrash::open(dir.path()).unwrap();
        stage_fake_tx(&trash, "tx-a", 10);
        stage_fake_tx(&trash, "tx-b", 10);

        let status = trash.status();
        assert_eq!(status.items, 2);
        assert!(status.oldest_item.is_some());

        assert_eq!(trash.empty(), 2);
        assert_eq!(trash.status().items, 0);
    }
}
