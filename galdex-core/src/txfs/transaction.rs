//! FSM-based transactional filesystem operations.
//!
//! Every operation is journaled before execution. State only advances:
//! `Prepared -> {Committed | Failed} -> RolledBack`. A journal append that
//! fails during prepare aborts the operation before any filesystem action.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use galdex_model::{JournalEntry, TrashConfig, TrashStatus, TxId, TxOperation, TxState};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::{CoreError, Result};
use crate::txfs::journal::{Journal, RecoveryReport};
use crate::txfs::sandbox::validate_or_deny;
use crate::txfs::trash::SmartTrash;

/// Shared home of the transaction machinery for one library root.
///
/// The trash directory is touched only while holding `guard`: commit-time
/// staging and the scheduler sweeps are mutually exclusive.
#[derive(Debug, Clone)]
pub struct TxEngine {
    journal: Arc<Journal>,
    trash: Arc<SmartTrash>,
    library_root: PathBuf,
    guard: Arc<Mutex<()>>,
}

impl TxEngine {
    pub fn new(journal: Arc<Journal>, library_root: &Path) -> Result<Self> {
        let trash = Arc::new(SmartTrash::open(journal.config_dir())?);
        Ok(TxEngine {
            journal,
            trash,
            library_root: library_root.to_path_buf(),
            guard: Arc::new(Mutex::new(())),
        })
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// Start a fresh transaction.
    pub fn begin(&self) -> Transaction {
        Transaction {
            engine: self.clone(),
            entry: None,
            state: TxState::Prepared,
            error: None,
        }
    }

    /// Rebuild a transaction around an existing journal entry so its
    /// operation can be reversed (crash recovery).
    pub fn rollback_entry(&self, entry: &JournalEntry) -> Result<()> {
        let mut tx = Transaction {
            engine: self.clone(),
            entry: Some(entry.clone()),
            state: entry.state,
            error: None,
        };
        tx.rollback()
    }

    /// Roll back every stale prepared transaction found in the journal.
    pub fn recover_stale(&self) -> Result<RecoveryReport> {
        self.journal.recover(|entry| self.rollback_entry(entry))
    }

    /// Weekly retention sweep; serialized against commit-time staging.
    pub fn sweep_retention(&self) -> usize {
        let _guard = self.guard.lock();
        self.trash.cleanup_by_retention()
    }

    /// Empty the trash now and record the act in the journal.
    pub fn empty_trash(&self) -> Result<usize> {
        let deleted = {
            let _guard = self.guard.lock();
            self.trash.empty()
        };
        self.journal.log_event("trash_emptied", "library")?;
        Ok(deleted)
    }

    pub fn trash_status(&self) -> TrashStatus {
        self.trash.status()
    }

    pub fn update_trash_config(
        &self,
        max_size_gb: Option<f64>,
        retention_days: Option<i64>,
        min_disk_free_gb: Option<f64>,
    ) -> Result<TrashConfig> {
        let _guard = self.guard.lock();
        self.trash
            .update_config(max_size_gb, retention_days, min_disk_free_gb)
    }
}

/// A single transactional file operation.
#[derive(Debug)]
pub struct Transaction {
    engine: TxEngine,
    entry: Option<JournalEntry>,
    state: TxState,
    error: Option<String>,
}

impl Transaction {
    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn entry(&self) -> Option<&JournalEntry> {
        self.entry.as_ref()
    }

    pub fn tx_id(&self) -> Option<TxId> {
        self.entry.as_ref().map(|e| e.tx_id)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Validate paths, run semantic pre-checks and journal a prepared
    /// entry. No filesystem mutation happens here.
    pub fn prepare(
        &mut self,
        op: TxOperation,
        src: &Path,
        dest: Option<&Path>,
    ) -> Result<()> {
        if self.entry.is_some() {
            return Err(CoreError::InvalidState(
                "transaction already prepared".into(),
            ));
        }
        if self.state != TxState::Prepared {
            return Err(CoreError::InvalidState(format!(
                "cannot prepare from state {}",
                self.state.as_str()
            )));
        }
        if op == TxOperation::Event {
            return Err(CoreError::InvalidState(
                "event entries are not transactional".into(),
            ));
        }

        let root = self.engine.library_root.clone();
        let src = validate_or_deny(src, &root)?;
        let dest = match dest {
            Some(d) => Some(validate_or_deny(d, &root)?),
            None => None,
        };

        match op {
            TxOperation::Mkdir => {
                if src.exists() {
                    return Err(CoreError::Precondition(format!(
                        "directory already exists: {}",
                        src.display()
                    )));
                }
            }
            TxOperation::Rename | TxOperation::Copy => {
                let dest = dest.as_ref().ok_or_else(|| {
                    CoreError::Precondition(format!(
                        "{} requires a destination",
                        op.as_str()
                    ))
                })?;
                if dest.exists() {
                    return Err(CoreError::Precondition(format!(
                        "destination already exists: {}",
                        dest.display()
                    )));
                }
            }
            TxOperation::Delete => {
                if !src.exists() {
                    return Err(CoreError::Precondition(format!(
                        "source does not exist: {}",
                        src.display()
                    )));
                }
            }
            TxOperation::Event => unreachable!(),
        }

        let entry = JournalEntry::prepared(
            op,
            src.display().to_string(),
            dest.map(|d| d.display().to_string()),
            self.engine.journal.tx_timeout(),
        );

        // If this append fails the transaction never existed: no entry, no
        // filesystem action, and the caller sees the aborted write.
        if let Err(err) = self.engine.journal.append(&entry) {
            self.state = TxState::Failed;
            self.error = Some(err.to_string());
            return Err(err);
        }

        info!(tx_id = %entry.tx_id, op = op.as_str(), src = %entry.src, "prepared transaction");
        self.entry = Some(entry);
        Ok(())
    }

    /// Execute the prepared operation. Only legal from `Prepared`.
    pub fn commit(&mut self) -> Result<()> {
        if self.state != TxState::Prepared {
            return Err(CoreError::InvalidState(format!(
                "cannot commit: transaction is {}",
                self.state.as_str()
            )));
        }
        let Some(entry) = self.entry.clone() else {
            return Err(CoreError::InvalidState("no entry to commit".into()));
        };

        match self.execute(&entry) {
            Ok(staged_dest) => {
                let entry = self.entry.as_mut().expect("entry present");
                if let Some(staged) = staged_dest {
                    entry.dest = Some(staged);
                }
                entry.state = TxState::Committed;
                let committed = entry.clone();
                if let Err(err) = self.engine.journal.append(&committed) {
                    self.state = TxState::Failed;
                    self.error = Some(err.to_string());
                    return Err(err);
                }
                self.state = TxState::Committed;
                info!(tx_id = %committed.tx_id, "committed transaction");
                Ok(())
            }
            Err(err) => {
                self.state = TxState::Failed;
                self.error = Some(err.to_string());
                error!(tx_id = %entry.tx_id, %err, "transaction failed");
                if let Some(entry) = self.entry.as_mut() {
                    entry.state = TxState::Failed;
                    let failed = entry.clone();
                    // Best effort: the primary failure is what the caller
                    // must see.
                    if let Err(journal_err) = self.engine.journal.append(&failed) {
                        warn!(tx_id = %failed.tx_id, %journal_err, "failed to journal failed state");
                    }
                }
                Err(err)
            }
        }
    }

    /// Reverse the operation. Legal from any state that has an entry.
    pub fn rollback(&mut self) -> Result<()> {
        if self.state == TxState::RolledBack {
            return Err(CoreError::InvalidState(
                "transaction already rolled back".into(),
            ));
        }
        let Some(entry) = self.entry.clone() else {
            return Err(CoreError::InvalidState("no entry to rollback".into()));
        };

        if let Err(err) = self.reverse(&entry) {
            self.error = Some(err.to_string());
            error!(tx_id = %entry.tx_id, %err, "rollback failed");
            return Err(CoreError::RollbackFailed(err.to_string()));
        }

        let entry = self.entry.as_mut().expect("entry present");
        entry.state = TxState::RolledBack;
        let rolled = entry.clone();
        self.engine.journal.append(&rolled)?;
        self.state = TxState::RolledBack;
        info!(tx_id = %rolled.tx_id, "rolled back transaction");
        Ok(())
    }

    /// Perform the filesystem side of a commit. Returns the trash path for
    /// deletes so the journal records where the content went.
    fn execute(&self, entry: &JournalEntry) -> Result<Option<String>> {
        let src = PathBuf::from(&entry.src);
        let dest = entry.dest.as_ref().map(PathBuf::from);

        match entry.op {
            TxOperation::Rename => {
                let dest = dest.ok_or_else(|| {
                    CoreError::OperationFailed("rename requires destination".into())
                })?;
                // Single-syscall move; a cross-device rename fails here by
                // policy instead of degrading to copy+delete.
                fs::rename(&src, &dest).map_err(|e| {
                    CoreError::OperationFailed(format!(
                        "rename {} -> {}: {e}",
                        src.display(),
                        dest.display()
                    ))
                })?;
                Ok(None)
            }
            TxOperation::Mkdir => {
                if src.exists() {
                    return Err(CoreError::OperationFailed(format!(
                        "directory already exists: {}",
                        src.display()
                    )));
                }
                fs::create_dir_all(&src).map_err(|e| {
                    CoreError::OperationFailed(format!(
                        "mkdir {}: {e}",
                        src.display()
                    ))
                })?;
                Ok(None)
            }
            TxOperation::Copy => {
                let dest = dest.ok_or_else(|| {
                    CoreError::OperationFailed("copy requires destination".into())
                })?;
                copy_tree(&src, &dest).map_err(|e| {
                    CoreError::OperationFailed(format!(
                        "copy {} -> {}: {e}",
                        src.display(),
                        dest.display()
                    ))
                })?;
                Ok(None)
            }
            TxOperation::Delete => {
                let _guard = self.engine.guard.lock();
                self.engine.trash.ensure_headroom()?;

                let stage = self.engine.trash.staging_dir(entry.tx_id);
                fs::create_dir_all(&stage).map_err(|e| {
                    CoreError::OperationFailed(format!(
                        "trash staging {}: {e}",
                        stage.display()
                    ))
                })?;

                let name = src.file_name().ok_or_else(|| {
                    CoreError::OperationFailed(format!(
                        "cannot stage path without file name: {}",
                        src.display()
                    ))
                })?;
                let trash_path = stage.join(name);

                move_path(&src, &trash_path).map_err(|e| {
                    CoreError::OperationFailed(format!(
                        "stage {} -> {}: {e}",
                        src.display(),
                        trash_path.display()
                    ))
                })?;

                Ok(Some(trash_path.display().to_string()))
            }
            TxOperation::Event => Err(CoreError::InvalidState(
                "event entries are not executable".into(),
            )),
        }
    }

    fn reverse(&self, entry: &JournalEntry) -> std::io::Result<()> {
        let src = PathBuf::from(&entry.src);
        let dest = entry.dest.as_ref().map(PathBuf::from);

        match entry.op {
            TxOperation::Rename => {
                if let Some(dest) = dest {
                    if dest.exists() {
                        fs::rename(&dest, &src)?;
                        info!("rolled back rename: {} -> {}", dest.display(), src.display());
                    }
                }
            }
            TxOperation::Mkdir => {
                if src.exists() {
                    fs::remove_dir_all(&src)?;
                    info!("rolled back mkdir: removed {}", src.display());
                }
            }
            TxOperation::Copy => {
                if let Some(dest) = dest {
                    if dest.exists() {
                        remove_any(&dest)?;
                        info!("rolled back copy: removed {}", dest.display());
                    }
                }
            }
            TxOperation::Delete => {
                // The trash location lives in `dest` once committed; a
                // prepared-but-uncommitted delete has nothing to restore.
                if let Some(trash_path) = dest {
                    if trash_path.exists() {
                        move_path(&trash_path, &src)?;
                        info!("rolled back delete: restored {}", src.display());

                        if let Some(stage) = trash_path.parent() {
                            // Trash cleanup is best-effort.
                            let _ = fs::remove_dir(stage);
                        }
                    }
                }
            }
            TxOperation::Event => {
                warn!(tx_id = %entry.tx_id, "ignoring rollback of event entry");
            }
        }
        Ok(())
    }
}

/// Move a path, degrading to copy+remove across devices. Used only for
/// trash staging and restore, where the config volume may differ from the
/// library volume.
fn move_path(src: &Path, dest: &Path) -> std::io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::CrossesDevices => {
            copy_tree(src, dest)?;
            remove_any(src)
        }
        Err(err) => Err(err),
    }
}

fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            let target = dest.join(entry.file_name());
            copy_tree(&entry.path(), &target)?;
        }
        Ok(())
    } else {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest).map(|_| ())
    }
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _config: TempDir,
        library: TempDir,
        engine: TxEngine,
    }

    fn fixture() -> Fixture {
        let config = TempDir::new().unwrap();
        let library = TempDir::new().unwrap();
        let journal = Arc::new(Journal::open(config.path()).unwrap());
        let engine = TxEngine::new(journal, library.path()).unwrap();
        Fixture {
            _config: config,
            library,
            engine,
        }
    }

    #[test]
    fn unsafe_path_is_rejected_without_journaling() {
        let fx = fixture();
        let mut tx = fx.engine.begin();

        let err = tx
            .prepare(TxOperation::Delete, Path::new("/etc/passwd"), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::PathUnsafe(_)));
        assert!(fx.engine.journal().read_all().unwrap().is_empty());
    }

    #[test]
    fn preconditions_are_enforced() {
        let fx = fixture();
        let existing = fx.library.path().join("already");
        std::fs::create_dir(&existing).unwrap();

        let mut tx = fx.engine.begin();
        assert!(matches!(
            tx.prepare(TxOperation::Mkdir, &existing, None),
            Err(CoreError::Precondition(_))
        ));

        let mut tx = fx.engine.begin();
        assert!(matches!(
            tx.prepare(
                TxOperation::Rename,
                &fx.library.path().join("missing"),
                Some(&existing),
            ),
            Err(CoreError::Precondition(_))
        ));

        let mut tx = fx.engine.begin();
        assert!(matches!(
            tx.prepare(
                TxOperation::Delete,
                &fx.library.path().join("missing"),
                None
            ),
            Err(CoreError::Precondition(_))
        ));
    }

    #[test]
    fn rename_commit_and_rollback_round_trip() {
        let fx = fixture();
        let a = fx.library.path().join("a");
        let b = fx.library.path().join("b");
        std::fs::write(&a, b"payload").unwrap();

        let mut tx = fx.engine.begin();
        tx.prepare(TxOperation::Rename, &a, Some(&b)).unwrap();
        tx.commit().unwrap();
        assert!(!a.exists());
        assert!(b.exists());

        tx.rollback().unwrap();
        assert!(a.exists());
        assert!(!b.exists());
        assert_eq!(std::fs::read(&a).unwrap(), b"payload");
    }

    #[test]
    fn delete_stages_to_trash_and_rollback_restores_bytes() {
        let fx = fixture();
        let victim = fx.library.path().join("victim.dat");
        std::fs::write(&victim, b"precious bytes").unwrap();

        let mut tx = fx.engine.begin();
        tx.prepare(TxOperation::Delete, &victim, None).unwrap();
        tx.commit().unwrap();

        assert!(!victim.exists());
        let trash_path = PathBuf::from(tx.entry().unwrap().dest.clone().unwrap());
        assert!(trash_path.exists());

        tx.rollback().unwrap();
        assert!(victim.exists());
        assert!(!trash_path.exists());
        assert_eq!(std::fs::read(&victim).unwrap(), b"precious bytes");
    }

    #[test]
    fn delete_of_directory_preserves_structure() {
        let fx = fixture();
        let folder = fx.library.path().join("game");
        std::fs::create_dir_all(folder.join("data")).unwrap();
        std::fs::write(folder.join("data").join("a.xp3"), b"x").unwrap();

        let mut tx = fx.engine.begin();
        tx.prepare(TxOperation::Delete, &folder, None).unwrap();
        tx.commit().unwrap();
        assert!(!folder.exists());

        tx.rollback().unwrap();
        assert!(folder.join("data").join("a.xp3").exists());
    }

    #[test]
    fn copy_commit_and_rollback() {
        let fx = fixture();
        let src = fx.library.path().join("src");
        let dst = fx.library.path().join("dst");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("f.bin"), b"x").unwrap();

        let mut tx = fx.engine.begin();
        tx.prepare(TxOperation::Copy, &src, Some(&dst)).unwrap();
        tx.commit().unwrap();
        assert!(dst.join("f.bin").exists());
        assert!(src.join("f.bin").exists());

        tx.rollback().unwrap();
        assert!(!dst.exists());
        assert!(src.exists());
    }

    #[test]
    fn mkdir_commit_and_rollback() {
        let fx = fixture();
        let dir = fx.library.path().join("fresh");

        let mut tx = fx.engine.begin();
        tx.prepare(TxOperation::Mkdir, &dir, None).unwrap();
        tx.commit().unwrap();
        assert!(dir.is_dir());

        tx.rollback().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn state_machine_never_moves_backwards() {
        let fx = fixture();
        let a = fx.library.path().join("a");
        std::fs::write(&a, b"x").unwrap();

        let mut tx = fx.engine.begin();
        tx.prepare(TxOperation::Delete, &a, None).unwrap();
        assert_eq!(tx.state(), TxState::Prepared);

        // Double prepare is refused.
        assert!(matches!(
            tx.prepare(TxOperation::Delete, &a, None),
            Err(CoreError::InvalidState(_))
        ));

        tx.commit().unwrap();
        assert_eq!(tx.state(), TxState::Committed);

        // Commit is one-shot.
        assert!(matches!(tx.commit(), Err(CoreError::InvalidState(_))));

        tx.rollback().unwrap();
        assert_eq!(tx.state(), TxState::RolledBack);
        assert!(matches!(tx.rollback(), Err(CoreError::InvalidState(_))));

        // The journal's last word for this tx matches the in-memory state.
        let entries = fx.engine.journal().read_all().unwrap();
        let last = entries
            .iter()
            .filter(|e| Some(e.tx_id) == tx.tx_id())
            .next_back()
            .unwrap();
        assert_eq!(last.state, TxState::RolledBack);
    }

    #[test]
    fn journal_write_failure_aborts_prepare() {
        let fx = fixture();
        let a = fx.library.path().join("a");
        std::fs::write(&a, b"x").unwrap();

        // Sabotage the journal file so the append cannot open it.
        std::fs::remove_file(fx.engine.journal().path()).unwrap();
        std::fs::create_dir(fx.engine.journal().path()).unwrap();

        let mut tx = fx.engine.begin();
        let err = tx.prepare(TxOperation::Delete, &a, None).unwrap_err();
        assert!(matches!(err, CoreError::JournalWrite(_)));
        assert_eq!(tx.state(), TxState::Failed);
        // No filesystem action happened.
        assert!(a.exists());
        assert!(tx.entry().is_none());
    }

    #[test]
    fn failed_commit_marks_transaction_failed() {
        let fx = fixture();
        let a = fx.library.path().join("a");
        let b = fx.library.path().join("b");
        std::fs::write(&a, b"x").unwrap();

        let mut tx = fx.engine.begin();
        tx.prepare(TxOperation::Rename, &a, Some(&b)).unwrap();

        // Make the rename fail underneath the committed transaction.
        std::fs::remove_file(&a).unwrap();

        let err = tx.commit().unwrap_err();
        assert!(matches!(err, CoreError::OperationFailed(_)));
        assert_eq!(tx.state(), TxState::Failed);
        assert!(tx.last_error().is_some());
    }

    #[test]
    fn headroom_cleanup_runs_before_staging() {
        let fx = fixture();
        fx.engine
            .update_trash_config(Some(0.0001), None, Some(0.0))
            .unwrap();

        // Pre-existing trash exceeding the ~100 KB quota.
        for name in ["tx-one", "tx-two", "tx-three"] {
            let staged = fx
                .engine
                .journal()
                .config_dir()
                .join(crate::txfs::trash::TRASH_DIR)
                .join(name);
            std::fs::create_dir_all(&staged).unwrap();
            std::fs::write(staged.join("blob.bin"), vec![0u8; 100 * 1024]).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(15));
        }

        let victim = fx.library.path().join("victim");
        std::fs::write(&victim, b"x").unwrap();

        let mut tx = fx.engine.begin();
        tx.prepare(TxOperation::Delete, &victim, None).unwrap();
        tx.commit().unwrap();

        // The newest delete succeeded and older trash was evicted.
        assert!(!victim.exists());
        let status = fx.engine.trash_status();
        assert!(status.trash_size_gb <= 0.0002);
    }

    #[test]
    fn stale_recovery_rolls_back_prepared_rename() {
        let config = TempDir::new().unwrap();
        let library = TempDir::new().unwrap();
        let journal = Arc::new(
            Journal::open_with_timeout(config.path(), chrono::Duration::seconds(-1))
                .unwrap(),
        );
        let engine = TxEngine::new(journal, library.path()).unwrap();

        let a = library.path().join("a");
        std::fs::write(&a, b"x").unwrap();
        let b = library.path().join("b");

        // Prepared but never committed, as if the process died here.
        let mut tx = engine.begin();
        tx.prepare(TxOperation::Rename, &a, Some(&b)).unwrap();
        drop(tx);

        let report = engine.recover_stale().unwrap();
        assert_eq!(report.rolled_back, 1);
        assert!(report.active.is_empty());
        assert!(a.exists());
        assert!(!b.exists());
    }
}
