//! Configuration-state backups.
//!
//! Snapshots the database, journal and trash policy into a timestamped
//! directory under `<config>/backups/`, pruning old snapshots to a keep
//! count. Driven by the scheduler and available on demand.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::error::Result;
use crate::txfs::{JOURNAL_FILE, TRASH_CONFIG_FILE};

pub const BACKUP_DIR: &str = "backups";
const DEFAULT_KEEP: usize = 5;

/// Copies the small, precious state files.
#[derive(Debug, Clone)]
pub struct BackupManager {
    config_dir: PathBuf,
    db_path: PathBuf,
    keep: usize,
}

impl BackupManager {
    pub fn new(config_dir: &Path, db_path: &Path) -> Self {
        BackupManager {
            config_dir: config_dir.to_path_buf(),
            db_path: db_path.to_path_buf(),
            keep: DEFAULT_KEEP,
        }
    }

    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = keep.max(1);
        self
    }

    fn backup_root(&self) -> PathBuf {
        self.config_dir.join(BACKUP_DIR)
    }

    /// Create one snapshot; returns its directory.
    pub fn backup_now(&self) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let target = self.backup_root().join(format!("backup_{stamp}"));
        std::fs::create_dir_all(&target)?;

        let mut copied = 0usize;
        let mut sources: Vec<PathBuf> = vec![
            self.config_dir.join(JOURNAL_FILE),
            self.config_dir.join(TRASH_CONFIG_FILE),
            self.db_path.clone(),
        ];
        // SQLite sidecar files travel with the database.
        for suffix in ["-wal", "-shm"] {
            let mut name = self.db_path.as_os_str().to_os_string();
            name.push(suffix);
            sources.push(PathBuf::from(name));
        }

        for source in sources {
            if !source.is_file() {
                continue;
            }
            let Some(name) = source.file_name() else {
                continue;
            };
            match std::fs::copy(&source, target.join(name)) {
                Ok(_) => copied += 1,
                Err(err) => {
                    warn!(file = %source.display(), %err, "backup copy failed");
                }
            }
        }

        self.prune()?;
        info!(dir = %target.display(), files = copied, "backup created");
        Ok(target)
    }

    /// Delete oldest snapshots beyond the keep count.
    fn prune(&self) -> Result<usize> {
        let Ok(read_dir) = std::fs::read_dir(self.backup_root()) else {
            return Ok(0);
        };

        let mut snapshots: Vec<PathBuf> = read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .map(|n| n.to_string_lossy().starts_with("backup_"))
                        .unwrap_or(false)
            })
            .collect();
        snapshots.sort();

        let mut removed = 0usize;
        while snapshots.len() > self.keep {
            let oldest = snapshots.remove(0);
            if let Err(err) = std::fs::remove_dir_all(&oldest) {
                warn!(dir = %oldest.display(), %err, "failed to prune backup");
            } else {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn list(&self) -> Vec<PathBuf> {
        let Ok(read_dir) = std::fs::read_dir(self.backup_root()) else {
            return Vec::new();
        };
        let mut snapshots: Vec<PathBuf> = read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        snapshots.sort();
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn backup_copies_state_files_and_prunes() {
        let config = TempDir::new().unwrap();
        let db_path = config.path().join("galdex.db");
        std::fs::write(config.path().join(JOURNAL_FILE), b"{}\n").unwrap();
        std::fs::write(config.path().join(TRASH_CONFIG_FILE), b"{}").unwrap();
        std::fs::write(&db_path, b"sqlite bytes").unwrap();

        let manager = BackupManager::new(config.path(), &db_path).with_keep(2);

        let first = manager.backup_now().unwrap();
        assert!(first.join(JOURNAL_FILE).exists());
        assert!(first.join("galdex.db").exists());

        // Distinct names even across rapid calls come from the timestamp;
        // force distinct dirs by renaming the first.
        let renamed = first.with_file_name("backup_00000000_000000");
        std::fs::rename(&first, &renamed).unwrap();

        let second = manager.backup_now().unwrap();
        let third_name = second.with_file_name("backup_11111111_000000");
        std::fs::rename(&second, &third_name).unwrap();

        let third = manager.backup_now().unwrap();
        assert!(third.exists());

        // keep = 2: the oldest snapshot is gone.
        let remaining = manager.list();
        assert_eq!(remaining.len(), 2);
        assert!(!renamed.exists());
    }
}
