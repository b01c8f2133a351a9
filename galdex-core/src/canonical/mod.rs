//! Canonicalization: promoting an accepted cluster (or a directly accepted
//! identity candidate) into the truth layer.
//!
//! Every promotion is strict, idempotent, fully journaled in the
//! provenance table, and irreversible. It runs inside one database
//! transaction; no filesystem mutation is involved. Physical
//! reorganization is a separate act through the organizer.

use chrono::Utc;
use galdex_model::{
    CanonicalGameId, ClusterId, IdentityHypothesis, MatchStatus,
};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqliteConnection};
use tracing::info;

use crate::database::Database;
use crate::error::{CoreError, Result};

/// User-supplied adjustments applied during acceptance.
#[derive(Debug, Clone, Default)]
pub struct AcceptOverrides {
    /// Replaces the suggested title on a freshly minted canonical.
    pub display_title: Option<String>,
    /// Forces reuse of an existing canonical instead of minting.
    pub canonical_id: Option<CanonicalGameId>,
    /// Extra hypotheses to link beyond what the catalog produced.
    pub hypotheses: Vec<IdentityHypothesis>,
}

/// Metadata-only promotion into canonical truth.
#[derive(Debug, Clone)]
pub struct CanonicalizationService {
    db: Database,
}

fn source_hash(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl CanonicalizationService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Promote one suggested cluster. Re-running on an accepted cluster is
    /// a no-op that returns the same canonical id.
    pub async fn promote_cluster(
        &self,
        cluster_id: ClusterId,
        overrides: AcceptOverrides,
    ) -> Result<CanonicalGameId> {
        let mut tx = self.db.pool().begin().await?;

        let cluster = sqlx::query(
            "SELECT status, confidence_score, suggested_title, \
             suggested_canonical_id, metadata_snapshot \
             FROM match_clusters WHERE id = ?",
        )
        .bind(cluster_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            CoreError::NotFound(format!("cluster not found: {cluster_id}"))
        })?;

        let status: String = cluster.try_get("status")?;
        let suggested_title: String = cluster.try_get("suggested_title")?;
        let suggested_canonical: Option<String> =
            cluster.try_get("suggested_canonical_id")?;
        let metadata_snapshot: Option<String> =
            cluster.try_get("metadata_snapshot")?;

        match status.as_str() {
            "rejected" => {
                return Err(CoreError::Precondition(format!(
                    "cluster {cluster_id} was rejected"
                )));
            }
            "accepted" => {
                // Idempotent re-run: the first acceptance recorded its
                // canonical on the cluster.
                if let Some(id) = suggested_canonical {
                    return Ok(CanonicalGameId::parse(&id)?);
                }
                return Err(CoreError::Precondition(format!(
                    "cluster {cluster_id} is accepted but has no canonical"
                )));
            }
            _ => {}
        }

        let member_paths: Vec<String> = sqlx::query(
            "SELECT instance_path FROM match_cluster_members \
             WHERE cluster_id = ? ORDER BY is_primary DESC, instance_path",
        )
        .bind(cluster_id.to_string())
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("instance_path"))
        .collect::<std::result::Result<_, _>>()?;

        if member_paths.is_empty() {
            return Err(CoreError::Precondition(format!(
                "cluster {cluster_id} has no members"
            )));
        }

        // Hypotheses: catalog rows attached to the member folders plus any
        // user-supplied extras.
        let mut hypotheses = overrides.hypotheses.clone();
        for path in &member_paths {
            let row = sqlx::query(
                "SELECT external_source_type, external_source_id \
                 FROM identity_match_candidate WHERE path = ?",
            )
            .bind(path)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(row) = row {
                let source_type: Option<String> =
                    row.try_get("external_source_type")?;
                let external_id: Option<String> =
                    row.try_get("external_source_id")?;
                if let (Some(source_type), Some(external_id)) =
                    (source_type, external_id)
                {
                    hypotheses.push(IdentityHypothesis {
                        source_type,
                        external_id,
                        title: suggested_title.clone(),
                        confidence: 1.0,
                        metadata: serde_json::Value::Null,
                    });
                }
            }
        }
        hypotheses.sort_by(|a, b| {
            (&a.source_type, &a.external_id).cmp(&(&b.source_type, &b.external_id))
        });
        hypotheses.dedup_by(|a, b| {
            a.source_type == b.source_type && a.external_id == b.external_id
        });

        let requested = overrides
            .canonical_id
            .map(Ok)
            .or_else(|| {
                suggested_canonical
                    .as_deref()
                    .map(CanonicalGameId::parse)
            })
            .transpose()?;

        let display_title = overrides
            .display_title
            .unwrap_or_else(|| suggested_title.clone());
        let metadata = metadata_snapshot.unwrap_or_else(|| "null".to_string());

        let canonical_id = ensure_canonical(
            &mut *tx,
            requested,
            &display_title,
            &metadata,
        )
        .await?;

        link_hypotheses(&mut *tx, canonical_id, &hypotheses).await?;
        attach_instances(&mut *tx, canonical_id, &member_paths).await?;
        write_provenance(
            &mut *tx,
            canonical_id,
            &hypotheses,
            &cluster_id.to_string(),
            &suggested_title,
        )
        .await?;

        sqlx::query(
            "UPDATE match_clusters \
             SET status = 'accepted', suggested_canonical_id = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(canonical_id.to_string())
        .bind(Utc::now())
        .bind(cluster_id.to_string())
        .execute(&mut *tx)
        .await?;

        for path in &member_paths {
            sqlx::query(
                "UPDATE identity_match_candidate \
                 SET status = ?, canonicalized_at = ? WHERE path = ?",
            )
            .bind(MatchStatus::Canonicalized.as_str())
            .bind(Utc::now())
            .bind(path)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            cluster = %cluster_id,
            canonical = %canonical_id,
            members = member_paths.len(),
            "cluster promoted to canonical"
        );
        Ok(canonical_id)
    }

    /// Promote one directly-accepted identity candidate without a cluster.
    pub async fn promote_identity_candidate(
        &self,
        path: &str,
        overrides: AcceptOverrides,
    ) -> Result<CanonicalGameId> {
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(
            "SELECT detected_title, status, external_source_type, \
             external_source_id FROM identity_match_candidate WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            CoreError::NotFound(format!("identity candidate not found: {path}"))
        })?;

        let status: String = row.try_get("status")?;
        if status == MatchStatus::Rejected.as_str() {
            return Err(CoreError::Precondition(format!(
                "identity candidate {path} was rejected"
            )));
        }

        let detected_title: String = row.try_get("detected_title")?;
        let source_type: Option<String> = row.try_get("external_source_type")?;
        let external_id: Option<String> = row.try_get("external_source_id")?;

        let mut hypotheses = overrides.hypotheses.clone();
        if let (Some(source_type), Some(external_id)) = (source_type, external_id)
        {
            hypotheses.push(IdentityHypothesis {
                source_type,
                external_id,
                title: detected_title.clone(),
                confidence: 1.0,
                metadata: serde_json::Value::Null,
            });
        }

        let display_title =
            overrides.display_title.unwrap_or_else(|| detected_title.clone());

        let canonical_id = ensure_canonical(
            &mut *tx,
            overrides.canonical_id,
            &display_title,
            "null",
        )
        .await?;

        link_hypotheses(&mut *tx, canonical_id, &hypotheses).await?;
        attach_instances(&mut *tx, canonical_id, &[path.to_string()]).await?;
        write_provenance(&mut *tx, canonical_id, &hypotheses, path, &detected_title)
            .await?;

        sqlx::query(
            "UPDATE identity_match_candidate \
             SET status = ?, canonicalized_at = ? WHERE path = ?",
        )
        .bind(MatchStatus::Canonicalized.as_str())
        .bind(Utc::now())
        .bind(path)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(path, canonical = %canonical_id, "identity candidate promoted");
        Ok(canonical_id)
    }
}

/// Reuse the requested canonical when it exists, else mint a new one.
async fn ensure_canonical(
    tx: &mut SqliteConnection,
    requested: Option<CanonicalGameId>,
    display_title: &str,
    metadata_snapshot: &str,
) -> Result<CanonicalGameId> {
    if let Some(id) = requested {
        let exists = sqlx::query("SELECT 1 AS hit FROM canonical_games WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if exists {
            return Ok(id);
        }
    }

    let id = CanonicalGameId::new();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO canonical_games \
         (id, display_title, metadata_snapshot, is_curated, created_at, updated_at) \
         VALUES (?, ?, ?, 0, ?, ?)",
    )
    .bind(id.to_string())
    .bind(display_title)
    .bind(metadata_snapshot)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    Ok(id)
}

/// Ensure an identity link per hypothesis. An alias already claimed by a
/// different canonical aborts the whole promotion.
async fn link_hypotheses(
    tx: &mut SqliteConnection,
    canonical_id: CanonicalGameId,
    hypotheses: &[IdentityHypothesis],
) -> Result<()> {
    for hypothesis in hypotheses {
        let existing = sqlx::query(
            "SELECT canonical_id FROM identity_links \
             WHERE source_type = ? AND external_id = ?",
        )
        .bind(&hypothesis.source_type)
        .bind(&hypothesis.external_id)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(row) => {
                let owner: String = row.try_get("canonical_id")?;
                if owner != canonical_id.to_string() {
                    return Err(CoreError::Conflict {
                        source_type: hypothesis.source_type.clone(),
                        external_id: hypothesis.external_id.clone(),
                        existing_canonical_id: owner,
                    });
                }
            }
            None => {
                sqlx::query(
                    "INSERT INTO identity_links \
                     (canonical_id, source_type, external_id, created_at) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(canonical_id.to_string())
                .bind(&hypothesis.source_type)
                .bind(&hypothesis.external_id)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
            }
        }
    }
    Ok(())
}

/// Point every member instance at the canonical, creating missing rows.
async fn attach_instances(
    tx: &mut SqliteConnection,
    canonical_id: CanonicalGameId,
    paths: &[String],
) -> Result<()> {
    for path in paths {
        let updated = sqlx::query(
            "UPDATE games SET game_id = ? WHERE folder_path = ?",
        )
        .bind(canonical_id.to_string())
        .bind(path)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let title = std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            sqlx::query(
                "INSERT INTO games (folder_path, title, game_id, created_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(path)
            .bind(title)
            .bind(canonical_id.to_string())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }
    }
    Ok(())
}

/// One provenance row per source consulted. With no external hypothesis
/// the promotion itself is the source, so a canonical never exists without
/// at least one link.
async fn write_provenance(
    tx: &mut SqliteConnection,
    canonical_id: CanonicalGameId,
    hypotheses: &[IdentityHypothesis],
    origin_id: &str,
    origin_title: &str,
) -> Result<()> {
    let now = Utc::now();

    if hypotheses.is_empty() {
        sqlx::query(
            "INSERT OR IGNORE INTO canonical_source_link \
             (entity_type, entity_id, source_type, source_id, source_hash, created_at) \
             VALUES ('canonical_game', ?, 'scanner', ?, ?, ?)",
        )
        .bind(canonical_id.to_string())
        .bind(origin_id)
        .bind(source_hash(origin_title))
        .bind(now)
        .execute(&mut *tx)
        .await?;
        return Ok(());
    }

    for hypothesis in hypotheses {
        let payload = serde_json::to_string(&hypothesis.metadata)?;
        sqlx::query(
            "INSERT OR IGNORE INTO canonical_source_link \
             (entity_type, entity_id, source_type, source_id, source_hash, created_at) \
             VALUES ('canonical_game', ?, ?, ?, ?, ?)",
        )
        .bind(canonical_id.to_string())
        .bind(&hypothesis.source_type)
        .bind(&hypothesis.external_id)
        .bind(source_hash(&payload))
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    Ok(())
}
