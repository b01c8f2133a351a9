//! Plan execution on top of the transaction engine.
//!
//! Every move is a prepared-then-committed transaction; a single undo log
//! records `(original, moved, checksum)` per successful move so rollback
//! can replay it in reverse through the same engine.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use galdex_model::TxOperation;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::organizer::proposal::{
    file_checksum, MoveStatus, OrganizationProposal,
};
use crate::txfs::TxEngine;

pub const UNDO_DIR: &str = ".organizer_undo";

/// One reversible move, persisted to the undo log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoRecord {
    pub original_path: PathBuf,
    pub moved_path: PathBuf,
    pub checksum: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of executing one proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub proposal_id: String,
    pub moved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub undo_log_path: Option<PathBuf>,
}

/// Refuse execution outright when the plan cannot complete.
pub fn pre_flight_check(
    proposal: &OrganizationProposal,
    engine: &TxEngine,
) -> Vec<String> {
    let mut errors = Vec::new();
    let mut bytes_needed: u64 = 0;

    for file_move in proposal.safe_moves() {
        if !file_move.source.exists() {
            errors.push(format!(
                "source missing: {}",
                file_move.source.display()
            ));
        }
        if file_move.target.exists() {
            errors.push(format!(
                "target collision: {}",
                file_move.target.display()
            ));
        }
        bytes_needed += file_move.size;
    }

    // Moves within a filesystem are renames, but budget for the worst
    // case so a copy-backed move cannot strand a full disk.
    if let Ok(free) = fs2::available_space(engine.library_root()) {
        if bytes_needed > free {
            errors.push(format!(
                "insufficient disk space: need {bytes_needed} bytes, {free} free"
            ));
        }
    }

    errors
}

/// Execute a proposal's safe moves. Unresolved files are skipped.
pub fn execute_plan(
    proposal: &OrganizationProposal,
    engine: &TxEngine,
    undo_dir: Option<&Path>,
) -> Result<ExecutionResult> {
    info!(proposal = %proposal.proposal_id, "executing organization plan");

    let mut result = ExecutionResult {
        success: false,
        proposal_id: proposal.proposal_id.clone(),
        moved: 0,
        skipped: 0,
        failed: 0,
        errors: Vec::new(),
        undo_log_path: None,
    };

    let preflight = pre_flight_check(proposal, engine);
    if !preflight.is_empty() {
        result.errors = preflight;
        return Ok(result);
    }

    let undo_dir = undo_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| proposal.source_path.join(UNDO_DIR));
    std::fs::create_dir_all(&undo_dir)?;
    let undo_log_path =
        undo_dir.join(format!("undo_{}.json", proposal.proposal_id));

    let mut undo_records: Vec<UndoRecord> = Vec::new();

    for file_move in &proposal.moves {
        if file_move.status != MoveStatus::Safe {
            result.skipped += 1;
            continue;
        }
        if !file_move.source.exists() {
            warn!(source = %file_move.source.display(), "source vanished, skipping");
            result.skipped += 1;
            continue;
        }

        if let Some(parent) = file_move.target.parent() {
            if !parent.exists() {
                let mut tx = engine.begin();
                tx.prepare(TxOperation::Mkdir, parent, None)?;
                tx.commit()?;
            }
        }

        let mut tx = engine.begin();
        let outcome = tx
            .prepare(
                TxOperation::Rename,
                &file_move.source,
                Some(&file_move.target),
            )
            .and_then(|()| tx.commit());

        match outcome {
            Ok(()) => {
                undo_records.push(UndoRecord {
                    original_path: file_move.source.clone(),
                    moved_path: file_move.target.clone(),
                    checksum: file_move.checksum.clone(),
                    timestamp: Utc::now(),
                });
                result.moved += 1;
            }
            Err(err) => {
                result.failed += 1;
                result.errors.push(format!(
                    "{}: {err}",
                    file_move.source.display()
                ));
            }
        }
    }

    save_undo_log(&undo_records, &undo_log_path)?;
    result.undo_log_path = Some(undo_log_path);
    result.success = result.failed == 0;

    cleanup_empty_source_dirs(&proposal.source_path);

    info!(
        moved = result.moved,
        skipped = result.skipped,
        failed = result.failed,
        "plan execution finished"
    );
    Ok(result)
}

/// Replay the undo log in reverse, restoring every move.
pub fn rollback_plan(undo_log_path: &Path, engine: &TxEngine) -> Result<usize> {
    let records = load_undo_log(undo_log_path)?;
    let mut restored = 0usize;

    for record in records.iter().rev() {
        if !record.moved_path.exists() {
            warn!(
                moved = %record.moved_path.display(),
                "moved file missing, cannot restore"
            );
            continue;
        }

        // Flag divergence but restore anyway; the bytes are the user's.
        match file_checksum(&record.moved_path) {
            Ok(sum) if sum != record.checksum => {
                warn!(
                    moved = %record.moved_path.display(),
                    "checksum changed since the move"
                );
            }
            _ => {}
        }

        let mut tx = engine.begin();
        tx.prepare(
            TxOperation::Rename,
            &record.moved_path,
            Some(&record.original_path),
        )?;
        tx.commit()?;
        restored += 1;
    }

    info!(restored, "plan rolled back");
    Ok(restored)
}

pub fn save_undo_log(records: &[UndoRecord], path: &Path) -> Result<()> {
    let raw = serde_json::to_vec_pretty(records)?;
    std::fs::write(path, raw)?;
    Ok(())
}

pub fn load_undo_log(path: &Path) -> Result<Vec<UndoRecord>> {
    let raw = std::fs::read(path).map_err(|_| {
        CoreError::NotFound(format!("undo log not found: {}", path.display()))
    })?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Remove now-empty directories under the source, deepest first.
pub fn cleanup_empty_source_dirs(source: &Path) -> usize {
    let mut dirs: Vec<PathBuf> = walkdir::WalkDir::new(source)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

    let mut removed = 0usize;
    for dir in dirs {
        if dir == source {
            continue;
        }
        if std::fs::remove_dir(&dir).is_ok() {
            removed += 1;
        }
    }
    removed
}
