use std::str::FromStr;

use chrono::{DateTime, Utc};
use galdex_model::{
    CandidateStatus, IdentityMatchCandidate, MatchStatus, ScanCandidate,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{CoreError, Result};

/// Scan candidates and identity-match candidates.
#[derive(Debug, Clone)]
pub struct CandidateRepository {
    pool: SqlitePool,
}

fn map_scan_candidate(row: &SqliteRow) -> Result<ScanCandidate> {
    let indicators: String = row.try_get("game_indicators")?;
    let status: String = row.try_get("status")?;

    Ok(ScanCandidate {
        id: Some(row.try_get("id")?),
        path: row.try_get("path")?,
        detected_title: row.try_get("detected_title")?,
        detected_engine: row.try_get("detected_engine")?,
        confidence: row.try_get("confidence_score")?,
        indicators: serde_json::from_str(&indicators).unwrap_or_default(),
        status: CandidateStatus::from_str(&status)?,
        detected_at: row.try_get("detected_at")?,
        confirmed_at: row.try_get("confirmed_at")?,
        manual_correction: row.try_get("manual_correction")?,
    })
}

fn map_identity_candidate(row: &SqliteRow) -> Result<IdentityMatchCandidate> {
    let status: String = row.try_get("status")?;

    Ok(IdentityMatchCandidate {
        id: Some(row.try_get("id")?),
        path: row.try_get("path")?,
        detected_title: row.try_get("detected_title")?,
        detected_engine: row.try_get("detected_engine")?,
        confidence: row.try_get("confidence_score")?,
        external_source_type: row.try_get("external_source_type")?,
        external_source_id: row.try_get("external_source_id")?,
        status: MatchStatus::from_str(&status)?,
        detected_at: row.try_get("detected_at")?,
        canonicalized_at: row.try_get("canonicalized_at")?,
    })
}

impl CandidateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a detection result.
    ///
    /// A candidate the user already decided on keeps its status; only
    /// pending rows absorb fresh detection data.
    pub async fn upsert_scan_candidate(
        &self,
        candidate: &ScanCandidate,
    ) -> Result<i64> {
        let indicators = serde_json::to_string(&candidate.indicators)?;

        sqlx::query(
            r#"
            INSERT INTO scan_candidates (
                path, detected_title, detected_engine, confidence_score,
                game_indicators, status, detected_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                detected_title = excluded.detected_title,
                detected_engine = excluded.detected_engine,
                confidence_score = excluded.confidence_score,
                game_indicators = excluded.game_indicators,
                detected_at = excluded.detected_at
            WHERE scan_candidates.status = 'pending'
            "#,
        )
        .bind(&candidate.path)
        .bind(&candidate.detected_title)
        .bind(&candidate.detected_engine)
        .bind(candidate.confidence)
        .bind(&indicators)
        .bind(candidate.status.as_str())
        .bind(candidate.detected_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id FROM scan_candidates WHERE path = ?")
            .bind(&candidate.path)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("id")?)
    }

    pub async fn get_scan_candidate(
        &self,
        path: &str,
    ) -> Result<Option<ScanCandidate>> {
        let row = sqlx::query("SELECT * FROM scan_candidates WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_scan_candidate).transpose()
    }

    pub async fn list_scan_candidates(
        &self,
        status: Option<CandidateStatus>,
    ) -> Result<Vec<ScanCandidate>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM scan_candidates WHERE status = ? \
                     ORDER BY confidence_score DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM scan_candidates \
                     ORDER BY confidence_score DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(map_scan_candidate).collect()
    }

    /// Transition a candidate's status, stamping `confirmed_at` on
    /// terminal transitions.
    pub async fn update_scan_status(
        &self,
        path: &str,
        status: CandidateStatus,
        manual_correction: Option<&str>,
    ) -> Result<()> {
        let confirmed_at: Option<DateTime<Utc>> =
            match status {
                CandidateStatus::Pending => None,
                _ => Some(Utc::now()),
            };

        let result = sqlx::query(
            r#"
            UPDATE scan_candidates
            SET status = ?,
                confirmed_at = ?,
                manual_correction = COALESCE(?, manual_correction)
            WHERE path = ?
            "#,
        )
        .bind(status.as_str())
        .bind(confirmed_at)
        .bind(manual_correction)
        .bind(path)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!(
                "scan candidate not found: {path}"
            )));
        }
        Ok(())
    }

    /// Bulk status flip used when clusters form or get rejected.
    pub async fn set_scan_status_for_paths(
        &self,
        paths: &[String],
        status: CandidateStatus,
    ) -> Result<u64> {
        let mut affected = 0u64;
        for path in paths {
            let result = sqlx::query(
                "UPDATE scan_candidates SET status = ? WHERE path = ?",
            )
            .bind(status.as_str())
            .bind(path)
            .execute(&self.pool)
            .await?;
            affected += result.rows_affected();
        }
        Ok(affected)
    }

    pub async fn upsert_identity_candidate(
        &self,
        candidate: &IdentityMatchCandidate,
    ) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO identity_match_candidate (
                path, detected_title, detected_engine, confidence_score,
                external_source_type, external_source_id, status, detected_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                detected_title = excluded.detected_title,
                detected_engine = excluded.detected_engine,
                confidence_score = excluded.confidence_score,
                external_source_type = excluded.external_source_type,
                external_source_id = excluded.external_source_id
            WHERE identity_match_candidate.status = 'pending'
            "#,
        )
        .bind(&candidate.path)
        .bind(&candidate.detected_title)
        .bind(&candidate.detected_engine)
        .bind(candidate.confidence)
        .bind(&candidate.external_source_type)
        .bind(&candidate.external_source_id)
        .bind(candidate.status.as_str())
        .bind(candidate.detected_at)
        .execute(&self.pool)
        .await?;

        let row =
            sqlx::query("SELECT id FROM identity_match_candidate WHERE path = ?")
                .bind(&candidate.path)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.try_get("id")?)
    }

    pub async fn get_identity_candidate(
        &self,
        path: &str,
    ) -> Result<Option<IdentityMatchCandidate>> {
        let row =
            sqlx::query("SELECT * FROM identity_match_candidate WHERE path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(map_identity_candidate).transpose()
    }

    pub async fn identity_candidates_for_paths(
        &self,
        paths: &[String],
    ) -> Result<Vec<IdentityMatchCandidate>> {
        let mut out = Vec::new();
        for path in paths {
            if let Some(candidate) = self.get_identity_candidate(path).await? {
                out.push(candidate);
            }
        }
        Ok(out)
    }

    pub async fn set_identity_status_for_paths(
        &self,
        paths: &[String],
        status: MatchStatus,
    ) -> Result<u64> {
        let canonicalized_at: Option<DateTime<Utc>> =
            match status {
                MatchStatus::Canonicalized => Some(Utc::now()),
                _ => None,
            };

        let mut affected = 0u64;
        for path in paths {
            let result = sqlx::query(
                r#"
                UPDATE identity_match_candidate
                SET status = ?, canonicalized_at = COALESCE(?, canonicalized_at)
                WHERE path = ?
                "#,
            )
            .bind(status.as_str())
            .bind(canonicalized_at)
            .bind(path)
            .execute(&self.pool)
            .await?;
            affected += result.rows_affected();
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn scan_candidate(path: &str, confidence: f64) -> ScanCandidate {
        ScanCandidate::new(
            path.to_string(),
            "Some Game".to_string(),
            Some("kirikiri".to_string()),
            confidence,
            vec!["has_executable".to_string()],
        )
    }

    #[tokio::test]
    async fn upsert_refreshes_pending_but_not_decided() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = CandidateRepository::new(db.pool().clone());

        let id = repo
            .upsert_scan_candidate(&scan_candidate("/lib/game", 0.5))
            .await
            .unwrap();

        // Fresh detection data lands while pending.
        let id2 = repo
            .upsert_scan_candidate(&scan_candidate("/lib/game", 0.9))
            .await
            .unwrap();
        assert_eq!(id, id2);
        let loaded = repo.get_scan_candidate("/lib/game").await.unwrap().unwrap();
        assert!((loaded.confidence - 0.9).abs() < 1e-9);

        // Decided candidates are frozen.
        repo.update_scan_status("/lib/game", CandidateStatus::Confirmed, None)
            .await
            .unwrap();
        repo.upsert_scan_candidate(&scan_candidate("/lib/game", 0.1))
            .await
            .unwrap();
        let loaded = repo.get_scan_candidate("/lib/game").await.unwrap().unwrap();
        assert!((loaded.confidence - 0.9).abs() < 1e-9);
        assert_eq!(loaded.status, CandidateStatus::Confirmed);
        assert!(loaded.confirmed_at.is_some());
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = CandidateRepository::new(db.pool().clone());

        repo.upsert_scan_candidate(&scan_candidate("/lib/a", 0.8))
            .await
            .unwrap();
        repo.upsert_scan_candidate(&scan_candidate("/lib/b", 0.6))
            .await
            .unwrap();
        repo.update_scan_status("/lib/b", CandidateStatus::Ignored, None)
            .await
            .unwrap();

        let pending = repo
            .list_scan_candidates(Some(CandidateStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].path, "/lib/a");

        let all = repo.list_scan_candidates(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn missing_candidate_update_is_not_found() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = CandidateRepository::new(db.pool().clone());

        let err = repo
            .update_scan_status("/nope", CandidateStatus::Rejected, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn identity_candidates_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = CandidateRepository::new(db.pool().clone());

        let candidate = IdentityMatchCandidate {
            id: None,
            path: "/lib/game".to_string(),
            detected_title: "Some Game".to_string(),
            detected_engine: None,
            confidence: 0.8,
            external_source_type: Some("vndb".to_string()),
            external_source_id: Some("v12345".to_string()),
            status: MatchStatus::Pending,
            detected_at: Utc::now(),
            canonicalized_at: None,
        };
        repo.upsert_identity_candidate(&candidate).await.unwrap();

        let loaded = repo
            .get_identity_candidate("/lib/game")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.external_source_id.as_deref(), Some("v12345"));

        repo.set_identity_status_for_paths(
            &["/lib/game".to_string()],
            MatchStatus::Canonicalized,
        )
        .await
        .unwrap();
        let loaded = repo
            .get_identity_candidate("/lib/game")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, MatchStatus::Canonicalized);
        assert!(loaded.canonicalized_at.is_some());
    }
}
