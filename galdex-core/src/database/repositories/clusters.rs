use std::collections::HashSet;
use std::str::FromStr;

use chrono::Utc;
use galdex_model::{
    CanonicalGameId, ClusterId, ClusterStatus, MatchCluster, MatchClusterMember,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{CoreError, Result};

/// Match clusters and their member sets.
#[derive(Debug, Clone)]
pub struct ClusterRepository {
    pool: SqlitePool,
}

fn map_cluster(row: &SqliteRow) -> Result<MatchCluster> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let suggested_canonical_id: Option<String> =
        row.try_get("suggested_canonical_id")?;
    let metadata: Option<String> = row.try_get("metadata_snapshot")?;

    Ok(MatchCluster {
        id: ClusterId::parse(&id)?,
        status: ClusterStatus::from_str(&status)?,
        confidence: row.try_get("confidence_score")?,
        suggested_title: row.try_get("suggested_title")?,
        suggested_canonical_id: suggested_canonical_id
            .map(|id| CanonicalGameId::parse(&id))
            .transpose()?,
        metadata_snapshot: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(serde_json::Value::Null),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        members: Vec::new(),
    })
}

fn map_member(row: &SqliteRow) -> Result<MatchClusterMember> {
    let cluster_id: String = row.try_get("cluster_id")?;
    Ok(MatchClusterMember {
        cluster_id: ClusterId::parse(&cluster_id)?,
        instance_path: row.try_get("instance_path")?,
        match_score: row.try_get("match_score")?,
        is_primary: row.try_get("is_primary")?,
    })
}

impl ClusterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a cluster together with its members.
    pub async fn insert(&self, cluster: &MatchCluster) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO match_clusters (
                id, status, confidence_score, suggested_title,
                suggested_canonical_id, metadata_snapshot,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(cluster.id.to_string())
        .bind(cluster.status.as_str())
        .bind(cluster.confidence)
        .bind(&cluster.suggested_title)
        .bind(cluster.suggested_canonical_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(&cluster.metadata_snapshot)?)
        .bind(cluster.created_at)
        .bind(cluster.updated_at)
        .execute(&mut *tx)
        .await?;

        for member in &cluster.members {
            sqlx::query(
                r#"
                INSERT INTO match_cluster_members (
                    cluster_id, instance_path, match_score, is_primary,
                    created_at
                )
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(cluster.id.to_string())
            .bind(&member.instance_path)
            .bind(member.match_score)
            .bind(member.is_primary)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: ClusterId) -> Result<Option<MatchCluster>> {
        let row = sqlx::query("SELECT * FROM match_clusters WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut cluster = map_cluster(&row)?;
        cluster.members = self.members_of(id).await?;
        Ok(Some(cluster))
    }

    pub async fn require(&self, id: ClusterId) -> Result<MatchCluster> {
        self.get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("cluster not found: {id}")))
    }

    pub async fn members_of(
        &self,
        id: ClusterId,
    ) -> Result<Vec<MatchClusterMember>> {
        let rows = sqlx::query(
            "SELECT * FROM match_cluster_members WHERE cluster_id = ? \
             ORDER BY is_primary DESC, instance_path",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_member).collect()
    }

    pub async fn list(
        &self,
        status: Option<ClusterStatus>,
    ) -> Result<Vec<MatchCluster>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM match_clusters WHERE status = ? \
                     ORDER BY created_at DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM match_clusters ORDER BY created_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut clusters = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut cluster = map_cluster(row)?;
            cluster.members = self.members_of(cluster.id).await?;
            clusters.push(cluster);
        }
        Ok(clusters)
    }

    pub async fn set_status(
        &self,
        id: ClusterId,
        status: ClusterStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE match_clusters SET status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("cluster not found: {id}")));
        }
        Ok(())
    }

    pub async fn set_suggested_canonical(
        &self,
        id: ClusterId,
        canonical_id: CanonicalGameId,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE match_clusters \
             SET suggested_canonical_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(canonical_id.to_string())
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Which of the given paths already belong to a non-rejected cluster.
    pub async fn paths_in_live_clusters(
        &self,
        paths: &[String],
    ) -> Result<HashSet<String>> {
        let mut taken = HashSet::new();
        for path in paths {
            let row = sqlx::query(
                r#"
                SELECT 1 AS hit FROM match_cluster_members mcm
                INNER JOIN match_clusters mc ON mc.id = mcm.cluster_id
                WHERE mcm.instance_path = ? AND mc.status != 'rejected'
                LIMIT 1
                "#,
            )
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
            if row.is_some() {
                taken.insert(path.clone());
            }
        }
        Ok(taken)
    }
}
