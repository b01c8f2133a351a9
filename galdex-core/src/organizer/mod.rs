//! Organizer: propose and execute physical reorganization plans.
//!
//! Canonicalization is metadata-only; this is the separate act that moves
//! bytes, and it only ever moves them through the transaction engine.

pub mod executor;
pub mod proposal;
pub mod standards;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use galdex_contracts::naming::{NamingContext, NamingStandard};
use tracing::info;

use crate::error::{CoreError, Result};
use crate::txfs::{ReadOnlyFuse, TxEngine};

pub use executor::{
    execute_plan, pre_flight_check, rollback_plan, ExecutionResult, UndoRecord,
};
pub use proposal::{
    generate_proposal, load_proposal, save_proposal, FileMove, MoveStatus,
    OrganizationProposal,
};
pub use standards::{sanitize_component, GalgameStandard};

/// Stateful facade: preview plans, execute them by id, roll them back.
pub struct Organizer {
    engine: TxEngine,
    fuse: ReadOnlyFuse,
    standard: Arc<dyn NamingStandard>,
    plans: DashMap<String, OrganizationProposal>,
    undo_logs: DashMap<String, PathBuf>,
}

impl std::fmt::Debug for Organizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Organizer")
            .field("plans", &self.plans.len())
            .finish()
    }
}

impl Organizer {
    pub fn new(
        engine: TxEngine,
        fuse: ReadOnlyFuse,
        standard: Arc<dyn NamingStandard>,
    ) -> Self {
        Organizer {
            engine,
            fuse,
            standard,
            plans: DashMap::new(),
            undo_logs: DashMap::new(),
        }
    }

    /// Read-only analysis; the returned plan id feeds `execute`.
    pub fn preview(
        &self,
        source: &Path,
        target_root: &Path,
        ctx: &NamingContext,
    ) -> Result<OrganizationProposal> {
        let proposal =
            generate_proposal(source, target_root, ctx, self.standard.as_ref())?;
        self.plans
            .insert(proposal.proposal_id.clone(), proposal.clone());
        Ok(proposal)
    }

    /// Execute a previously previewed plan.
    pub fn execute(&self, plan_id: &str) -> Result<ExecutionResult> {
        self.fuse.ensure_writable()?;

        let proposal = self
            .plans
            .get(plan_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| {
                CoreError::NotFound(format!("unknown plan: {plan_id}"))
            })?;

        let result = execute_plan(&proposal, &self.engine, None)?;
        if let Some(path) = &result.undo_log_path {
            self.undo_logs.insert(plan_id.to_string(), path.clone());
        }
        Ok(result)
    }

    /// Undo an executed plan by replaying its log in reverse.
    pub fn rollback(&self, plan_id: &str) -> Result<usize> {
        self.fuse.ensure_writable()?;

        let undo_log = self.undo_logs.get(plan_id).map(|p| p.value().clone()).ok_or_else(
            || CoreError::NotFound(format!("no undo log for plan: {plan_id}")),
        )?;
        let restored = rollback_plan(&undo_log, &self.engine)?;
        info!(plan = plan_id, restored, "plan rollback complete");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txfs::Journal;
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

    struct Fixture {
        _config: TempDir,
        library: TempDir,
        organizer: Organizer,
    }

    fn fixture() -> Fixture {
        let config = TempDir::new().unwrap();
        let library = TempDir::new().unwrap();
        let journal = Arc::new(Journal::open(config.path()).unwrap());
        let engine = TxEngine::new(journal, library.path()).unwrap();
        let organizer = Organizer::new(
            engine,
            ReadOnlyFuse::new(),
            Arc::new(GalgameStandard),
        );
        Fixture {
            _config: config,
            library,
            organizer,
        }
    }

    fn messy_source(library: &TempDir) -> PathBuf {
        let source = library.path().join("messy");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("start.exe"), b"exe").unwrap();
        fs::write(source.join("game.iso"), b"iso").unwrap();
        fs::write(source.join("ost.mp3"), b"bgm").unwrap();
        source
    }

    #[test]
    fn preview_execute_rollback_round_trip() {
        let fx = fixture();
        let source = messy_source(&fx.library);
        let target_root = fx.library.path().join("organized");
        fs::create_dir_all(&target_root).unwrap();

        let proposal = fx
            .organizer
            .preview(&source, &target_root, &ctx())
            .unwrap();
        assert_eq!(proposal.moves.len(), 3);

        let result = fx.organizer.execute(&proposal.proposal_id).unwrap();
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.moved, 3);

        let game_dir = target_root.join("Key").join("2004 CLANNAD [v4]");
        assert!(game_dir.join("Game").join("start.exe").exists());
        assert!(game_dir.join("Repository").join("game.iso").exists());
        assert!(game_dir.join("Extras").join("ost.mp3").exists());
        assert!(!source.join("start.exe").exists());

        let restored = fx.organizer.rollback(&proposal.proposal_id).unwrap();
        assert_eq!(restored, 3);
        assert!(source.join("start.exe").exists());
        assert!(source.join("game.iso").exists());
        assert!(!game_dir.join("Game").join("start.exe").exists());
    }

    #[test]
    fn preflight_refuses_collisions() {
        let fx = fixture();
        let source = messy_source(&fx.library);
        let target_root = fx.library.path().join("organized");

        // Pre-create a colliding target file.
        let collision = target_root
            .join("Key")
            .join("2004 CLANNAD [v4]")
            .join("Game")
            .join("start.exe");
        fs::create_dir_all(collision.parent().unwrap()).unwrap();
        fs::write(&collision, b"already here").unwrap();

        let proposal = fx
            .organizer
            .preview(&source, &target_root, &ctx())
            .unwrap();
        let result = fx.organizer.execute(&proposal.proposal_id).unwrap();

        assert!(!result.success);
        assert_eq!(result.moved, 0);
        assert!(result.errors.iter().any(|e| e.contains("collision")));
        // Nothing moved: pre-flight is all-or-nothing.
        assert!(source.join("start.exe").exists());
    }

    #[test]
    fn read_only_mode_blocks_execution() {
        let config = TempDir::new().unwrap();
        let library = TempDir::new().unwrap();
        let journal = Arc::new(Journal::open(config.path()).unwrap());
        let engine = TxEngine::new(journal, library.path()).unwrap();
        let fuse = ReadOnlyFuse::new();
        fuse.engage("test");
        let organizer =
            Organizer::new(engine, fuse, Arc::new(GalgameStandard));

        let err = organizer.execute("whatever").unwrap_err();
        assert!(matches!(err, CoreError::ReadOnly));
    }

    #[test]
    fn unknown_plan_is_not_found() {
        let fx = fixture();
        assert!(matches!(
            fx.organizer.execute("missing"),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            fx.organizer.rollback("missing"),
            Err(CoreError::NotFound(_))
        ));
    }
}
