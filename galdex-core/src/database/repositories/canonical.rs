use chrono::Utc;
use galdex_model::{
    CanonicalGame, CanonicalGameId, CanonicalPatch, CanonicalSourceLink,
    IdentityLink,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{CoreError, Result};

/// Canonical games, identity links and provenance records.
#[derive(Debug, Clone)]
pub struct CanonicalRepository {
    pool: SqlitePool,
}

fn map_canonical(row: &SqliteRow) -> Result<CanonicalGame> {
    let id: String = row.try_get("id")?;
    let metadata: String = row.try_get("metadata_snapshot")?;

    Ok(CanonicalGame {
        id: CanonicalGameId::parse(&id)?,
        display_title: row.try_get("display_title")?,
        metadata_snapshot: serde_json::from_str(&metadata)
            .unwrap_or(serde_json::Value::Null),
        cover_image_url: row.try_get("cover_image_url")?,
        is_curated: row.try_get("is_curated")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_identity_link(row: &SqliteRow) -> Result<IdentityLink> {
    let canonical_id: String = row.try_get("canonical_id")?;
    Ok(IdentityLink {
        canonical_id: CanonicalGameId::parse(&canonical_id)?,
        source_type: row.try_get("source_type")?,
        external_id: row.try_get("external_id")?,
        external_url: row.try_get("external_url")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_source_link(row: &SqliteRow) -> Result<CanonicalSourceLink> {
    Ok(CanonicalSourceLink {
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        source_type: row.try_get("source_type")?,
        source_id: row.try_get("source_id")?,
        source_hash: row.try_get("source_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

impl CanonicalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, game: &CanonicalGame) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO canonical_games (
                id, display_title, metadata_snapshot, cover_image_url,
                is_curated, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(game.id.to_string())
        .bind(&game.display_title)
        .bind(serde_json::to_string(&game.metadata_snapshot)?)
        .bind(&game.cover_image_url)
        .bind(game.is_curated)
        .bind(game.created_at)
        .bind(game.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(
        &self,
        id: CanonicalGameId,
    ) -> Result<Option<CanonicalGame>> {
        let row = sqlx::query("SELECT * FROM canonical_games WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_canonical).transpose()
    }

    pub async fn require(&self, id: CanonicalGameId) -> Result<CanonicalGame> {
        self.get(id).await?.ok_or_else(|| {
            CoreError::NotFound(format!("canonical game not found: {id}"))
        })
    }

    /// Apply a partial update to the mutable fields. Column-backed fields
    /// update in place; the rest merge into the metadata snapshot.
    pub async fn update_patch(
        &self,
        id: CanonicalGameId,
        patch: &CanonicalPatch,
    ) -> Result<CanonicalGame> {
        if patch.is_empty() {
            return Err(CoreError::Precondition(
                "no fields to update".to_string(),
            ));
        }

        let mut game = self.require(id).await?;

        if let Some(title) = &patch.display_title {
            game.display_title = title.clone();
        }
        if let Some(cover) = &patch.cover_image_url {
            game.cover_image_url = Some(cover.clone());
        }

        let mut metadata = match game.metadata_snapshot.clone() {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        if let Some(description) = &patch.description {
            metadata.insert("description".into(), description.clone().into());
        }
        if let Some(developer) = &patch.developer {
            metadata.insert("developer".into(), developer.clone().into());
        }
        if let Some(release_date) = &patch.release_date {
            metadata.insert("release_date".into(), release_date.clone().into());
        }
        if let Some(tags) = &patch.tags {
            metadata.insert(
                "tags".into(),
                serde_json::Value::Array(
                    tags.iter().cloned().map(Into::into).collect(),
                ),
            );
        }
        game.metadata_snapshot = serde_json::Value::Object(metadata);
        game.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE canonical_games
            SET display_title = ?, metadata_snapshot = ?, cover_image_url = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&game.display_title)
        .bind(serde_json::to_string(&game.metadata_snapshot)?)
        .bind(&game.cover_image_url)
        .bind(game.updated_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(game)
    }

    /// Batch-flip curation state; returns how many rows changed.
    pub async fn set_curated(
        &self,
        ids: &[CanonicalGameId],
        curated: bool,
    ) -> Result<u64> {
        let mut affected = 0u64;
        for id in ids {
            let result = sqlx::query(
                "UPDATE canonical_games \
                 SET is_curated = ?, updated_at = ? WHERE id = ?",
            )
            .bind(curated)
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
            affected += result.rows_affected();
        }
        Ok(affected)
    }

    /// Resolve an external alias to the canonical that owns it.
    pub async fn find_canonical_by_alias(
        &self,
        source_type: &str,
        external_id: &str,
    ) -> Result<Option<CanonicalGameId>> {
        let row = sqlx::query(
            "SELECT canonical_id FROM identity_links \
             WHERE source_type = ? AND external_id = ?",
        )
        .bind(source_type)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let id: String = r.try_get("canonical_id")?;
            Ok(CanonicalGameId::parse(&id)?)
        })
        .transpose()
    }

    pub async fn insert_identity_link(&self, link: &IdentityLink) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO identity_links (
                canonical_id, source_type, external_id, external_url, created_at
            )
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(link.canonical_id.to_string())
        .bind(&link.source_type)
        .bind(&link.external_id)
        .bind(&link.external_url)
        .bind(link.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn identity_links_for(
        &self,
        canonical_id: CanonicalGameId,
    ) -> Result<Vec<IdentityLink>> {
        let rows = sqlx::query(
            "SELECT * FROM identity_links WHERE canonical_id = ? \
             ORDER BY source_type, external_id",
        )
        .bind(canonical_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_identity_link).collect()
    }

    /// Append a provenance record; the unique key makes re-runs no-ops.
    pub async fn insert_source_link(
        &self,
        link: &CanonicalSourceLink,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO canonical_source_link (
                entity_type, entity_id, source_type, source_id, source_hash,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&link.entity_type)
        .bind(&link.entity_id)
        .bind(&link.source_type)
        .bind(&link.source_id)
        .bind(&link.source_hash)
        .bind(link.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn source_links_for(
        &self,
        entity_id: &str,
    ) -> Result<Vec<CanonicalSourceLink>> {
        let rows = sqlx::query(
            "SELECT * FROM canonical_source_link WHERE entity_id = ? \
             ORDER BY source_type, source_id",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_source_link).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn game(title: &str) -> CanonicalGame {
        let now = Utc::now();
        CanonicalGame {
            id: CanonicalGameId::new(),
            display_title: title.to_string(),
            metadata_snapshot: serde_json::json!({"developer": "Key"}),
            cover_image_url: None,
            is_curated: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_get_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = CanonicalRepository::new(db.pool().clone());

        let game = game("Clannad");
        repo.insert(&game).await.unwrap();

        let loaded = repo.require(game.id).await.unwrap();
        assert_eq!(loaded.display_title, "Clannad");
        assert_eq!(
            loaded.metadata_snapshot["developer"],
            serde_json::json!("Key")
        );
        assert!(!loaded.is_curated);
    }

    #[tokio::test]
    async fn patch_merges_metadata() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = CanonicalRepository::new(db.pool().clone());
        let game = game("Clannad");
        repo.insert(&game).await.unwrap();

        let patch = CanonicalPatch {
            display_title: Some("CLANNAD".to_string()),
            description: Some("A Key classic".to_string()),
            tags: Some(vec!["nakige".to_string()]),
            ..CanonicalPatch::default()
        };
        let updated = repo.update_patch(game.id, &patch).await.unwrap();

        assert_eq!(updated.display_title, "CLANNAD");
        assert_eq!(
            updated.metadata_snapshot["description"],
            serde_json::json!("A Key classic")
        );
        // Existing metadata keys survive the merge.
        assert_eq!(
            updated.metadata_snapshot["developer"],
            serde_json::json!("Key")
        );

        let empty = CanonicalPatch::default();
        assert!(matches!(
            repo.update_patch(game.id, &empty).await,
            Err(CoreError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn curation_is_batch_and_counted() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = CanonicalRepository::new(db.pool().clone());
        let a = game("A");
        let b = game("B");
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();

        let affected = repo
            .set_curated(&[a.id, b.id, CanonicalGameId::new()], true)
            .await
            .unwrap();
        assert_eq!(affected, 2);
        assert!(repo.require(a.id).await.unwrap().is_curated);
    }

    #[tokio::test]
    async fn identity_link_uniqueness() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = CanonicalRepository::new(db.pool().clone());
        let a = game("A");
        let b = game("B");
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();

        let link = IdentityLink {
            canonical_id: a.id,
            source_type: "vndb".to_string(),
            external_id: "v12345".to_string(),
            external_url: None,
            created_at: Utc::now(),
        };
        repo.insert_identity_link(&link).await.unwrap();

        // The same alias for another canonical violates the unique index.
        let stolen = IdentityLink {
            canonical_id: b.id,
            ..link.clone()
        };
        assert!(repo.insert_identity_link(&stolen).await.is_err());

        assert_eq!(
            repo.find_canonical_by_alias("vndb", "v12345").await.unwrap(),
            Some(a.id)
        );
        assert_eq!(
            repo.find_canonical_by_alias("vndb", "v999").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn source_links_are_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = CanonicalRepository::new(db.pool().clone());
        let a = game("A");
        repo.insert(&a).await.unwrap();

        let link = CanonicalSourceLink {
            entity_type: "canonical_game".to_string(),
            entity_id: a.id.to_string(),
            source_type: "vndb".to_string(),
            source_id: "v12345".to_string(),
            source_hash: "abc123".to_string(),
            created_at: Utc::now(),
        };
        repo.insert_source_link(&link).await.unwrap();
        repo.insert_source_link(&link).await.unwrap();

        let links = repo.source_links_for(&a.id.to_string()).await.unwrap();
        assert_eq!(links.len(), 1);
    }
}
