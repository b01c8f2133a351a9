//! Cluster engine: grouping candidates into match clusters awaiting a
//! human decision.
//!
//! Two candidates link when their normalized titles clear the similarity
//! threshold or they share an external-id hypothesis; the transitive
//! closure of links forms a cluster. The engine never promotes anything —
//! promotion belongs to canonicalization, driven by the decision commands.

pub mod similarity;

use std::collections::HashMap;
use std::sync::Arc;

use galdex_contracts::similarity::TitleSimilarity;
use galdex_model::{
    CandidateStatus, MatchCluster, MatchClusterMember, ScanCandidate,
};
use tracing::{debug, info};

use crate::database::{
    CandidateRepository, ClusterRepository, Database, InstanceRepository,
};
use crate::error::Result;

pub use similarity::{normalize_title, JaroWinklerSimilarity};

/// Knobs governing when clusters are suggested.
#[derive(Debug, Clone)]
pub struct ClusterPolicy {
    /// Minimum normalized-title similarity that links two candidates.
    pub similarity_threshold: f64,
    /// Suggest single-member clusters for high-value candidates, forcing
    /// explicit confirmation instead of silent orphanhood.
    pub suggest_single: bool,
    /// Confidence floor for single-member suggestions.
    pub single_confidence_threshold: f64,
}

impl Default for ClusterPolicy {
    fn default() -> Self {
        ClusterPolicy {
            similarity_threshold: 0.88,
            suggest_single: false,
            single_confidence_threshold: 0.9,
        }
    }
}

/// Groups scan candidates into match clusters.
pub struct ClusterEngine {
    clusters: ClusterRepository,
    candidates: CandidateRepository,
    instances: InstanceRepository,
    similarity: Arc<dyn TitleSimilarity>,
    policy: ClusterPolicy,
}

impl std::fmt::Debug for ClusterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterEngine")
            .field("policy", &self.policy)
            .finish()
    }
}

struct Dsu {
    parent: Vec<usize>,
}

impl Dsu {
    fn new(n: usize) -> Self {
        Dsu {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

impl ClusterEngine {
    pub fn new(
        db: Database,
        similarity: Arc<dyn TitleSimilarity>,
        policy: ClusterPolicy,
    ) -> Self {
        ClusterEngine {
            clusters: ClusterRepository::new(db.pool().clone()),
            candidates: CandidateRepository::new(db.pool().clone()),
            instances: InstanceRepository::new(db.pool().clone()),
            similarity,
            policy,
        }
    }

    pub fn with_defaults(db: Database) -> Self {
        Self::new(
            db,
            Arc::new(JaroWinklerSimilarity),
            ClusterPolicy::default(),
        )
    }

    /// Consume candidates and mint suggested clusters.
    ///
    /// Candidates already canonicalized or already sitting in a live
    /// cluster are left alone.
    pub async fn process_candidates(
        &self,
        incoming: &[ScanCandidate],
    ) -> Result<Vec<MatchCluster>> {
        let mut eligible: Vec<&ScanCandidate> = Vec::new();
        let paths: Vec<String> =
            incoming.iter().map(|c| c.path.clone()).collect();
        let taken = self.clusters.paths_in_live_clusters(&paths).await?;

        for candidate in incoming {
            if candidate.status != CandidateStatus::Pending {
                continue;
            }
            if taken.contains(&candidate.path) {
                debug!(path = %candidate.path, "already in a live cluster");
                continue;
            }
            if let Some(instance) = self.instances.get(&candidate.path).await? {
                if instance.game_id.is_some() {
                    debug!(path = %candidate.path, "already canonicalized");
                    continue;
                }
            }
            eligible.push(candidate);
        }

        if eligible.is_empty() {
            return Ok(Vec::new());
        }

        // External hypotheses per path, for the shared-alias link rule.
        let eligible_paths: Vec<String> =
            eligible.iter().map(|c| c.path.clone()).collect();
        let identity = self
            .candidates
            .identity_candidates_for_paths(&eligible_paths)
            .await?;
        let alias_of: HashMap<&str, (String, String)> = identity
            .iter()
            .filter_map(|c| {
                match (&c.external_source_type, &c.external_source_id) {
                    (Some(source), Some(id)) => {
                        Some((c.path.as_str(), (source.clone(), id.clone())))
                    }
                    _ => None,
                }
            })
            .collect();

        let normalized: Vec<String> = eligible
            .iter()
            .map(|c| normalize_title(c.effective_title()))
            .collect();

        // Link pass: similarity or shared alias, then transitive closure.
        let n = eligible.len();
        let mut dsu = Dsu::new(n);
        let mut edges: Vec<(usize, usize, f64)> = Vec::new();

        for i in 0..n {
            for j in (i + 1)..n {
                let shared_alias = match (
                    alias_of.get(eligible[i].path.as_str()),
                    alias_of.get(eligible[j].path.as_str()),
                ) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                };

                let score = if shared_alias {
                    1.0
                } else {
                    self.similarity.score(&normalized[i], &normalized[j])
                };

                if shared_alias || score >= self.policy.similarity_threshold {
                    dsu.union(i, j);
                    edges.push((i, j, score));
                }
            }
        }

        let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..n {
            let root = dsu.find(i);
            components.entry(root).or_default().push(i);
        }

        let mut minted = Vec::new();
        for (root, members) in components {
            if members.len() < 2 {
                let idx = members[0];
                if self.policy.suggest_single
                    && eligible[idx].confidence
                        >= self.policy.single_confidence_threshold
                {
                    minted.push(self.mint_cluster(&eligible, &[idx], &[]));
                }
                continue;
            }

            let component_edges: Vec<&(usize, usize, f64)> = edges
                .iter()
                .filter(|(i, _, _)| dsu.find(*i) == root)
                .collect();
            minted.push(self.mint_cluster(
                &eligible,
                &members,
                &component_edges,
            ));
        }

        for cluster in &minted {
            self.clusters.insert(cluster).await?;
            let member_paths: Vec<String> = cluster
                .members
                .iter()
                .map(|m| m.instance_path.clone())
                .collect();
            self.candidates
                .set_scan_status_for_paths(&member_paths, CandidateStatus::Merged)
                .await?;
        }

        if !minted.is_empty() {
            info!(clusters = minted.len(), "suggested new clusters");
        }
        Ok(minted)
    }

    fn mint_cluster(
        &self,
        eligible: &[&ScanCandidate],
        member_indices: &[usize],
        edges: &[&(usize, usize, f64)],
    ) -> MatchCluster {
        // Confidence is the weakest link that holds the cluster together.
        let confidence = if edges.is_empty() {
            eligible[member_indices[0]].confidence
        } else {
            edges
                .iter()
                .map(|(_, _, score)| *score)
                .fold(f64::INFINITY, f64::min)
        };

        let primary = member_indices
            .iter()
            .copied()
            .max_by(|a, b| {
                eligible[*a]
                    .confidence
                    .total_cmp(&eligible[*b].confidence)
            })
            .expect("non-empty member set");

        let suggested_title =
            eligible[primary].effective_title().to_string();

        let mut cluster = MatchCluster::suggested(
            suggested_title,
            confidence.clamp(0.0, 1.0),
            Vec::new(),
        );

        cluster.members = member_indices
            .iter()
            .map(|&idx| {
                let best_edge = edges
                    .iter()
                    .filter(|(i, j, _)| *i == idx || *j == idx)
                    .map(|(_, _, score)| *score)
                    .fold(0.0f64, f64::max);
                MatchClusterMember {
                    cluster_id: cluster.id,
                    instance_path: eligible[idx].path.clone(),
                    match_score: if edges.is_empty() {
                        eligible[idx].confidence.clamp(0.0, 1.0)
                    } else {
                        best_edge.clamp(0.0, 1.0)
                    },
                    is_primary: idx == primary,
                }
            })
            .collect();

        cluster
    }
}
