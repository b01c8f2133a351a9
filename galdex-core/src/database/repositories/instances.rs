use galdex_model::{CanonicalGameId, LocalInstance};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{CoreError, Result};

/// The `games` table: one row per folder believed to hold a game.
#[derive(Debug, Clone)]
pub struct InstanceRepository {
    pool: SqlitePool,
}

fn map_instance(row: &SqliteRow) -> Result<LocalInstance> {
    let game_id: Option<String> = row.try_get("game_id")?;

    Ok(LocalInstance {
        folder_path: row.try_get("folder_path")?,
        title: row.try_get("title")?,
        developer: row.try_get("developer")?,
        cover_image: row.try_get("cover_image")?,
        game_id: game_id
            .map(|id| CanonicalGameId::parse(&id))
            .transpose()?,
        scan_signature: row.try_get("scan_signature")?,
        folder_mtime: row.try_get("folder_mtime")?,
        metadata_mtime: row.try_get("metadata_mtime")?,
        created_at: row.try_get("created_at")?,
    })
}

impl InstanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh an instance row. The canonical link survives
    /// refreshes; only scan-derived fields are replaced.
    pub async fn upsert(&self, instance: &LocalInstance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO games (
                folder_path, title, developer, cover_image, game_id,
                scan_signature, folder_mtime, metadata_mtime, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(folder_path) DO UPDATE SET
                title = excluded.title,
                developer = COALESCE(excluded.developer, games.developer),
                cover_image = COALESCE(excluded.cover_image, games.cover_image),
                scan_signature = excluded.scan_signature,
                folder_mtime = excluded.folder_mtime,
                metadata_mtime = excluded.metadata_mtime
            "#,
        )
        .bind(&instance.folder_path)
        .bind(&instance.title)
        .bind(&instance.developer)
        .bind(&instance.cover_image)
        .bind(instance.game_id.map(|id| id.to_string()))
        .bind(&instance.scan_signature)
        .bind(instance.folder_mtime)
        .bind(instance.metadata_mtime)
        .bind(instance.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, folder_path: &str) -> Result<Option<LocalInstance>> {
        let row = sqlx::query("SELECT * FROM games WHERE folder_path = ?")
            .bind(folder_path)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_instance).transpose()
    }

    pub async fn list_by_canonical(
        &self,
        canonical_id: CanonicalGameId,
    ) -> Result<Vec<LocalInstance>> {
        let rows = sqlx::query(
            "SELECT * FROM games WHERE game_id = ? ORDER BY folder_path",
        )
        .bind(canonical_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_instance).collect()
    }

    pub async fn set_game_id(
        &self,
        folder_path: &str,
        game_id: Option<CanonicalGameId>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE games SET game_id = ? WHERE folder_path = ?",
        )
        .bind(game_id.map(|id| id.to_string()))
        .bind(folder_path)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!(
                "instance not found: {folder_path}"
            )));
        }
        Ok(())
    }

    pub async fn delete(&self, folder_path: &str) -> Result<()> {
        sqlx::query("DELETE FROM games WHERE folder_path = ?")
            .bind(folder_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
