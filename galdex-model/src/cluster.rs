use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::ids::{CanonicalGameId, ClusterId};

/// Lifecycle of a match cluster. `Suggested -> {Accepted | Rejected}`,
/// exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ClusterStatus {
    Suggested,
    Accepted,
    Rejected,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Suggested => "suggested",
            ClusterStatus::Accepted => "accepted",
            ClusterStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ClusterStatus {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "suggested" => Ok(ClusterStatus::Suggested),
            "accepted" => Ok(ClusterStatus::Accepted),
            "rejected" => Ok(ClusterStatus::Rejected),
            other => Err(ModelError::UnknownVariant {
                kind: "cluster status",
                value: other.to_string(),
            }),
        }
    }
}

/// One instance folder inside a cluster.
///
/// Uniqueness is on `(cluster_id, instance_path)`; at most one member per
/// cluster carries `is_primary`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchClusterMember {
    pub cluster_id: ClusterId,
    pub instance_path: String,
    /// Link strength contributed by this member, in `[0, 1]`.
    pub match_score: f64,
    pub is_primary: bool,
}

/// Proposed grouping of instances awaiting a human decision.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchCluster {
    pub id: ClusterId,
    pub status: ClusterStatus,
    /// Minimum pairwise link score across the member set.
    pub confidence: f64,
    pub suggested_title: String,
    pub suggested_canonical_id: Option<CanonicalGameId>,
    pub metadata_snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub members: Vec<MatchClusterMember>,
}

impl MatchCluster {
    pub fn suggested(
        suggested_title: String,
        confidence: f64,
        members: Vec<MatchClusterMember>,
    ) -> Self {
        let now = Utc::now();
        MatchCluster {
            id: ClusterId::new(),
            status: ClusterStatus::Suggested,
            confidence,
            suggested_title,
            suggested_canonical_id: None,
            metadata_snapshot: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
            members,
        }
    }

    pub fn primary_member(&self) -> Option<&MatchClusterMember> {
        self.members.iter().find(|m| m.is_primary)
    }
}
