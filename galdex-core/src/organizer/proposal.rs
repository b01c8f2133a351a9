//! Proposal generation: read-only analysis of a messy game folder.
//!
//! Deep-scans the source tree, categorizes every file against the naming
//! standard, keeps split archives together, and emits a reviewable plan.
//! Nothing moves here.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use galdex_contracts::naming::{FileCategory, NamingContext, NamingStandard};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::organizer::standards::{archive_group_name, is_split_archive};

/// Status of one proposed move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveStatus {
    /// Automatically categorized; safe to execute.
    Safe,
    /// Needs a user decision before it may move.
    Unresolved,
    /// Deliberately left in place.
    Skip,
}

/// One proposed file move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMove {
    pub source: PathBuf,
    pub target: PathBuf,
    pub status: MoveStatus,
    pub category: String,
    pub reason: String,
    pub size: u64,
    pub checksum: String,
}

/// Naming metadata captured inside the proposal so a reload can rebuild
/// the target structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalContext {
    pub developer: String,
    pub year: String,
    pub title: String,
    pub catalog_id: String,
}

impl From<&NamingContext> for ProposalContext {
    fn from(ctx: &NamingContext) -> Self {
        ProposalContext {
            developer: ctx.developer.clone(),
            year: ctx.year.clone(),
            title: ctx.title.clone(),
            catalog_id: ctx.catalog_id.clone(),
        }
    }
}

impl ProposalContext {
    pub fn naming(&self) -> NamingContext {
        NamingContext {
            developer: self.developer.clone(),
            year: self.year.clone(),
            title: self.title.clone(),
            catalog_id: self.catalog_id.clone(),
        }
    }
}

/// Complete reviewable plan for one source tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationProposal {
    pub proposal_id: String,
    pub source_path: PathBuf,
    pub target_root: PathBuf,
    pub context: ProposalContext,
    pub moves: Vec<FileMove>,
    pub total_size: u64,
    pub file_count: usize,
    pub created_at: DateTime<Utc>,
}

impl OrganizationProposal {
    pub fn safe_moves(&self) -> impl Iterator<Item = &FileMove> {
        self.moves.iter().filter(|m| m.status == MoveStatus::Safe)
    }

    pub fn unresolved_count(&self) -> usize {
        self.moves
            .iter()
            .filter(|m| m.status == MoveStatus::Unresolved)
            .count()
    }
}

/// Streaming checksum so large archives do not land in memory.
pub fn file_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// Generate a proposal. Read-only: no files move.
pub fn generate_proposal(
    source_path: &Path,
    target_root: &Path,
    ctx: &NamingContext,
    standard: &dyn NamingStandard,
) -> Result<OrganizationProposal> {
    if !source_path.is_dir() {
        return Err(CoreError::Precondition(format!(
            "source is not a directory: {}",
            source_path.display()
        )));
    }

    info!(source = %source_path.display(), "generating organization proposal");

    let files: Vec<PathBuf> = walkdir::WalkDir::new(source_path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    // Split archives travel as a group, categorized by their first piece.
    let mut archive_groups: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for file in &files {
        if is_split_archive(file) {
            archive_groups
                .entry(archive_group_name(file))
                .or_default()
                .push(file.clone());
        }
    }

    let mut proposal = OrganizationProposal {
        proposal_id: Uuid::new_v4().to_string(),
        source_path: source_path.to_path_buf(),
        target_root: target_root.to_path_buf(),
        context: ctx.into(),
        moves: Vec::new(),
        total_size: 0,
        file_count: 0,
        created_at: Utc::now(),
    };

    let mut grouped: HashSet<String> = HashSet::new();

    for file in &files {
        let size = std::fs::metadata(file).map(|m| m.len()).unwrap_or(0);
        proposal.total_size += size;
        proposal.file_count += 1;

        if is_split_archive(file) {
            let group = archive_group_name(file);
            if !grouped.insert(group.clone()) {
                continue;
            }

            let pieces = archive_groups.remove(&group).unwrap_or_default();
            let category = standard.categorize(&pieces[0]);
            let category = if category == FileCategory::Unknown {
                // Split pieces are almost always distribution archives.
                FileCategory::Repository
            } else {
                category
            };
            let target_dir = standard.category_dir(target_root, ctx, category);

            for piece in pieces {
                let piece_size =
                    std::fs::metadata(&piece).map(|m| m.len()).unwrap_or(0);
                proposal.moves.push(FileMove {
                    target: target_dir
                        .join(piece.file_name().unwrap_or_default()),
                    checksum: file_checksum(&piece).unwrap_or_default(),
                    source: piece,
                    status: MoveStatus::Safe,
                    category: category.as_str().to_string(),
                    reason: format!("split archive group '{group}'"),
                    size: piece_size,
                });
            }
            continue;
        }

        let category = standard.categorize(file);
        let (status, reason) = match category {
            FileCategory::Unknown => (
                MoveStatus::Unresolved,
                "no rule matched; needs a decision".to_string(),
            ),
            _ => (MoveStatus::Safe, format!("matched {}", category.as_str())),
        };
        let target_dir = standard.category_dir(target_root, ctx, category);

        proposal.moves.push(FileMove {
            target: target_dir.join(file.file_name().unwrap_or_default()),
            checksum: file_checksum(file).unwrap_or_default(),
            source: file.clone(),
            status,
            category: category.as_str().to_string(),
            reason,
            size,
        });
    }

    info!(
        files = proposal.file_count,
        moves = proposal.moves.len(),
        unresolved = proposal.unresolved_count(),
        "proposal generated"
    );
    Ok(proposal)
}

pub fn save_proposal(
    proposal: &OrganizationProposal,
    path: &Path,
) -> Result<()> {
    let raw = serde_json::to_vec_pretty(proposal)?;
    std::fs::write(path, raw)?;
    Ok(())
}

pub fn load_proposal(path: &Path) -> Result<OrganizationProposal> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organizer::standards::GalgameStandard;
    use std::fs;
    use tempfile::TempDir;

    fn ctx() -> NamingContext {
        NamingContext {
            developer: "Key".to_string(),
            year: "2004".to_string(),
            title: "CLANNAD".to_string(),
            catalog_id: "v4".to_string(),
        }
    }

    #[test]
    fn proposal_categorizes_and_counts() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::write(source.path().join("start.exe"), b"exe-bytes").unwrap();
        fs::write(source.path().join("game.iso"), b"iso-bytes!").unwrap();
        fs::write(source.path().join("mystery.bin2"), b"??").unwrap();

        let proposal = generate_proposal(
            source.path(),
            target.path(),
            &ctx(),
            &GalgameStandard,
        )
        .unwrap();

        assert_eq!(proposal.file_count, 3);
        assert_eq!(proposal.moves.len(), 3);
        assert_eq!(proposal.unresolved_count(), 1);
        assert!(proposal.total_size > 0);

        let exe = proposal
            .moves
            .iter()
            .find(|m| m.source.ends_with("start.exe"))
            .unwrap();
        assert_eq!(exe.category, "Game");
        assert!(exe
            .target
            .starts_with(target.path().join("Key").join("2004 CLANNAD [v4]")));
        assert!(!exe.checksum.is_empty());
    }

    #[test]
    fn split_archives_stay_together() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::write(source.path().join("game.part1.rar"), b"a").unwrap();
        fs::write(source.path().join("game.part2.rar"), b"b").unwrap();

        let proposal = generate_proposal(
            source.path(),
            target.path(),
            &ctx(),
            &GalgameStandard,
        )
        .unwrap();

        let targets: HashSet<_> = proposal
            .moves
            .iter()
            .map(|m| m.target.parent().unwrap().to_path_buf())
            .collect();
        assert_eq!(targets.len(), 1, "one directory for the whole group");
        assert_eq!(proposal.moves.len(), 2);
    }

    #[test]
    fn proposal_round_trips_through_disk() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::write(source.path().join("a.exe"), b"x").unwrap();

        let proposal = generate_proposal(
            source.path(),
            target.path(),
            &ctx(),
            &GalgameStandard,
        )
        .unwrap();

        let path = target.path().join("proposal.json");
        save_proposal(&proposal, &path).unwrap();
        let loaded = load_proposal(&path).unwrap();
        assert_eq!(loaded.proposal_id, proposal.proposal_id);
        assert_eq!(loaded.moves.len(), proposal.moves.len());
    }
}
