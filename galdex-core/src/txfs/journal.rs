//! Append-only operation journal.
//!
//! One JSON object per line in `journal.jsonl`. Appends are atomic-durable:
//! write, flush, then force-sync the descriptor. A failed sync propagates
//! unswallowed even though the bytes may already sit in OS cache; the
//! caller must treat the write as failed.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use galdex_model::{JournalEntry, TxId, TxState};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::txfs::sandbox::is_safe_config_dir;

pub const JOURNAL_FILE: &str = "journal.jsonl";

/// Default per-transaction timeout before a prepared entry counts as stale.
pub const DEFAULT_TX_TIMEOUT_SECS: i64 = 300;

/// Outcome of journal recovery classification.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Prepared entries past their timeout; the rollback handler ran for
    /// each of these.
    pub stale: Vec<JournalEntry>,
    /// Prepared entries still inside their timeout window, left for manual
    /// inspection.
    pub active: Vec<JournalEntry>,
    pub rolled_back: usize,
    pub rollback_failures: usize,
}

/// Owner of the journal file. No other component opens it for writing.
#[derive(Debug)]
pub struct Journal {
    config_dir: PathBuf,
    journal_path: PathBuf,
    tx_timeout: chrono::Duration,
    append_lock: Mutex<()>,
}

impl Journal {
    /// Open (creating if necessary) the journal under `config_dir`.
    ///
    /// Refuses to start when the directory fails the sandbox probe, to
    /// prevent journal hijacking via symlinked config dirs.
    pub fn open(config_dir: &Path) -> Result<Self> {
        Self::open_with_timeout(
            config_dir,
            chrono::Duration::seconds(DEFAULT_TX_TIMEOUT_SECS),
        )
    }

    pub fn open_with_timeout(
        config_dir: &Path,
        tx_timeout: chrono::Duration,
    ) -> Result<Self> {
        if !is_safe_config_dir(config_dir) {
            return Err(CoreError::PathUnsafe(format!(
                "journal sandbox violation: {} is not safe",
                config_dir.display()
            )));
        }

        let journal_path = config_dir.join(JOURNAL_FILE);
        if !journal_path.exists() {
            std::fs::File::create(&journal_path)?;
        }

        info!("journal initialized at {}", journal_path.display());

        Ok(Journal {
            config_dir: config_dir.to_path_buf(),
            journal_path,
            tx_timeout,
            append_lock: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn path(&self) -> &Path {
        &self.journal_path
    }

    pub fn tx_timeout(&self) -> chrono::Duration {
        self.tx_timeout
    }

    /// Append one entry with durability guarantees.
    fn atomic_write(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.append_lock.lock();
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.journal_path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        // Force the bytes onto the platter; atomicity hinges on this.
        file.sync_all()?;
        Ok(())
    }

    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        self.atomic_write(&line).map_err(CoreError::JournalWrite)?;
        debug!(tx_id = %entry.tx_id, op = entry.op.as_str(), state = entry.state.as_str(), "journal entry appended");
        Ok(())
    }

    /// Record a high-level audit event outside the transaction machinery.
    pub fn log_event(&self, action: &str, target: &str) -> Result<()> {
        let entry = JournalEntry::event(action, target);
        self.append(&entry)?;
        info!(action, target, "event logged");
        Ok(())
    }

    /// Read every entry, skipping malformed interior lines with a warning.
    ///
    /// Every record is terminated by a newline, so a file that does not end
    /// in one was torn mid-append. That is corruption, not forward-compat
    /// noise, and it surfaces as an error for recovery to act on.
    pub fn read_all(&self) -> Result<Vec<JournalEntry>> {
        if !self.journal_path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read(&self.journal_path)?;
        if !raw.is_empty() && raw.last() != Some(&b'\n') {
            return Err(CoreError::RecoveryFailed(format!(
                "journal {} is truncated mid-line",
                self.journal_path.display()
            )));
        }

        let reader = BufReader::new(raw.as_slice());
        let mut entries = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(trimmed) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    warn!(line = line_num + 1, %err, "skipping invalid journal entry");
                }
            }
        }

        Ok(entries)
    }

    /// Transactions whose latest recorded state is still `prepared`.
    pub fn incomplete(&self) -> Result<Vec<JournalEntry>> {
        let entries = self.read_all()?;
        let mut latest: HashMap<TxId, JournalEntry> = HashMap::new();
        for entry in entries {
            latest.insert(entry.tx_id, entry);
        }

        let mut incomplete: Vec<JournalEntry> = latest
            .into_values()
            .filter(|e| e.state == TxState::Prepared)
            .collect();
        incomplete.sort_by_key(|e| e.timestamp);
        Ok(incomplete)
    }

    /// Incomplete transactions past their timeout.
    pub fn stale(&self, now: DateTime<Utc>) -> Result<Vec<JournalEntry>> {
        Ok(self
            .incomplete()?
            .into_iter()
            .filter(|e| e.is_stale(now))
            .collect())
    }

    /// Classify prepared entries into stale vs active and run the rollback
    /// handler on each stale one.
    ///
    /// Individual rollback failures are logged and counted; they do not
    /// abort classification. Errors reading the journal itself propagate.
    pub fn recover<F>(&self, mut rollback: F) -> Result<RecoveryReport>
    where
        F: FnMut(&JournalEntry) -> Result<()>,
    {
        let now = Utc::now();
        let incomplete = self.incomplete()?;
        let (stale, active): (Vec<_>, Vec<_>) =
            incomplete.into_iter().partition(|e| e.is_stale(now));

        let mut report = RecoveryReport {
            stale,
            active,
            ..RecoveryReport::default()
        };

        if !report.stale.is_empty() {
            warn!(
                count = report.stale.len(),
                "stale transaction(s) require recovery"
            );
            for entry in &report.stale {
                match rollback(entry) {
                    Ok(()) => {
                        info!(tx_id = %entry.tx_id, "rolled back stale transaction");
                        report.rolled_back += 1;
                    }
                    Err(err) => {
                        warn!(tx_id = %entry.tx_id, %err, "failed to roll back stale transaction");
                        report.rollback_failures += 1;
                    }
                }
            }
        }

        if !report.active.is_empty() {
            info!(
                count = report.active.len(),
                "active prepared transaction(s) left for inspection"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galdex_model::TxOperation;
    use tempfile::TempDir;

    fn prepared(src: &str, timeout: chrono::Duration) -> JournalEntry {
        JournalEntry::prepared(
            TxOperation::Mkdir,
            src.to_string(),
            None,
            timeout,
        )
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        let entry = prepared("/library/a", chrono::Duration::minutes(5));
        journal.append(&entry).unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], entry);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        let entry = prepared("/library/a", chrono::Duration::minutes(5));
        journal.append(&entry).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(journal.path())
            .unwrap()
            .write_all(b"{not json\n")
            .unwrap();
        journal.log_event("trash_emptied", "library").unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn truncated_tail_is_corruption() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        journal
            .append(&prepared("/library/a", chrono::Duration::minutes(5)))
            .unwrap();

        // Chop the file mid-line: the trailing newline disappears.
        let raw = std::fs::read(journal.path()).unwrap();
        std::fs::write(journal.path(), &raw[..raw.len() - 12]).unwrap();

        let err = journal.read_all().unwrap_err();
        assert!(matches!(err, CoreError::RecoveryFailed(_)));
        assert!(journal.recover(|_| Ok(())).is_err());
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        let entry = prepared("/library/a", chrono::Duration::minutes(5));
        let mut value = serde_json::to_value(&entry).unwrap();
        value["future_field"] = serde_json::json!("ignored");
        let mut line = value.to_string();
        line.push('\n');
        std::fs::write(journal.path(), line).unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].src, "/library/a");
    }

    #[test]
    fn append_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        // Replace the journal file with a directory so the append-open
        // fails; the caller must observe the failure.
        std::fs::remove_file(journal.path()).unwrap();
        std::fs::create_dir(journal.path()).unwrap();

        let entry = prepared("/library/a", chrono::Duration::minutes(5));
        let err = journal.append(&entry).unwrap_err();
        assert!(matches!(err, CoreError::JournalWrite(_)));
    }

    #[test]
    fn incomplete_uses_latest_state_per_transaction() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        let mut finished = prepared("/library/a", chrono::Duration::minutes(5));
        journal.append(&finished).unwrap();
        finished.state = TxState::Committed;
        journal.append(&finished).unwrap();

        let open = prepared("/library/b", chrono::Duration::minutes(5));
        journal.append(&open).unwrap();

        let incomplete = journal.incomplete().unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].src, "/library/b");
    }

    #[test]
    fn recover_rolls_back_stale_only() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        let stale = prepared("/library/stale", chrono::Duration::seconds(-10));
        journal.append(&stale).unwrap();
        let active = prepared("/library/active", chrono::Duration::minutes(5));
        journal.append(&active).unwrap();

        let mut rolled: Vec<String> = Vec::new();
        let report = journal
            .recover(|entry| {
                rolled.push(entry.src.clone());
                Ok(())
            })
            .unwrap();

        assert_eq!(rolled, vec!["/library/stale".to_string()]);
        assert_eq!(report.rolled_back, 1);
        assert_eq!(report.active.len(), 1);
        assert_eq!(report.active[0].src, "/library/active");
    }

    #[test]
    fn recover_counts_handler_failures() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        let stale = prepared("/library/stale", chrono::Duration::seconds(-10));
        journal.append(&stale).unwrap();

        let report = journal
            .recover(|_| Err(CoreError::RollbackFailed("nope".into())))
            .unwrap();
        assert_eq!(report.rollback_failures, 1);
        assert_eq!(report.rolled_back, 0);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_config_dir_is_refused() {
        let real = TempDir::new().unwrap();
        let holder = TempDir::new().unwrap();
        let link = holder.path().join("config");
        std::os::unix::fs::symlink(real.path(), &link).unwrap();

        assert!(matches!(
            Journal::open(&link),
            Err(CoreError::PathUnsafe(_))
        ));
    }
}
