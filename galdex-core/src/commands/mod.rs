//! Decision command surface (CQRS command side).
//!
//! A narrow write API separate from the read-view. Every command is gated
//! on the read-only fuse; rejection uses the single well-known retryable
//! error kind.

use galdex_model::{
    CandidateStatus, CanonicalGame, CanonicalGameId, CanonicalPatch, ClusterId,
    ClusterStatus, MatchStatus,
};
use tracing::info;

use crate::canonical::{AcceptOverrides, CanonicalizationService};
use crate::database::{
    CandidateRepository, CanonicalRepository, ClusterRepository, Database,
    InstanceRepository,
};
use crate::error::Result;
use crate::txfs::ReadOnlyFuse;

/// Accept/reject clusters, detach instances, mutate canonicals.
#[derive(Debug, Clone)]
pub struct DecisionService {
    canonicalizer: CanonicalizationService,
    clusters: ClusterRepository,
    candidates: CandidateRepository,
    instances: InstanceRepository,
    canonical: CanonicalRepository,
    fuse: ReadOnlyFuse,
}

impl DecisionService {
    pub fn new(db: Database, fuse: ReadOnlyFuse) -> Self {
        DecisionService {
            canonicalizer: CanonicalizationService::new(db.clone()),
            clusters: ClusterRepository::new(db.pool().clone()),
            candidates: CandidateRepository::new(db.pool().clone()),
            instances: InstanceRepository::new(db.pool().clone()),
            canonical: CanonicalRepository::new(db.pool().clone()),
            fuse,
        }
    }

    /// Promote a suggested cluster into canonical truth.
    pub async fn accept_cluster(
        &self,
        cluster_id: ClusterId,
        overrides: AcceptOverrides,
    ) -> Result<CanonicalGameId> {
        self.fuse.ensure_writable()?;
        self.canonicalizer
            .promote_cluster(cluster_id, overrides)
            .await
    }

    /// Reject a suggestion; member candidates revert to pending review.
    pub async fn reject_cluster(&self, cluster_id: ClusterId) -> Result<()> {
        self.fuse.ensure_writable()?;

        let cluster = self.clusters.require(cluster_id).await?;
        self.clusters
            .set_status(cluster_id, ClusterStatus::Rejected)
            .await?;

        let member_paths: Vec<String> = cluster
            .members
            .iter()
            .map(|m| m.instance_path.clone())
            .collect();
        self.candidates
            .set_scan_status_for_paths(&member_paths, CandidateStatus::Pending)
            .await?;
        self.candidates
            .set_identity_status_for_paths(&member_paths, MatchStatus::Pending)
            .await?;

        info!(cluster = %cluster_id, members = member_paths.len(), "cluster rejected");
        Ok(())
    }

    /// Unlink an instance from its canonical. The canonical survives, even
    /// orphaned of instances; there is no undo beyond detach + re-cluster.
    pub async fn detach_instance(&self, instance_path: &str) -> Result<()> {
        self.fuse.ensure_writable()?;
        self.instances.set_game_id(instance_path, None).await?;
        info!(path = instance_path, "instance detached from canonical");
        Ok(())
    }

    /// Edit the mutable fields of a canonical game.
    pub async fn update_canonical(
        &self,
        id: CanonicalGameId,
        patch: CanonicalPatch,
    ) -> Result<CanonicalGame> {
        self.fuse.ensure_writable()?;
        self.canonical.update_patch(id, &patch).await
    }

    /// Move games between workshop and gallery.
    pub async fn set_curated(
        &self,
        ids: &[CanonicalGameId],
        curated: bool,
    ) -> Result<u64> {
        self.fuse.ensure_writable()?;
        let updated = self.canonical.set_curated(ids, curated).await?;
        info!(updated, curated, "curation state changed");
        Ok(updated)
    }
}
