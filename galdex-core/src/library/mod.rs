//! Library read-view (CQRS query side).
//!
//! One projection over canonical entities, pending suggestions and orphan
//! folders. Strictly read-only; every write goes through the decision
//! commands.

use std::str::FromStr;

use galdex_model::{
    CanonicalGameId, ClusterId, LibraryEntry, LibraryEntryKind,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::database::Database;
use crate::error::Result;

/// Paged access to `library_entry_view`.
#[derive(Debug, Clone)]
pub struct LibraryReadView {
    db: Database,
}

fn map_entry(row: &SqliteRow) -> Result<LibraryEntry> {
    let entry_type: String = row.try_get("entry_type")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    let cluster_id: Option<String> = row.try_get("cluster_id")?;
    let canonical_id: Option<String> = row.try_get("canonical_id")?;

    Ok(LibraryEntry {
        entry_id: row.try_get("entry_id")?,
        entry_type: LibraryEntryKind::from_str(&entry_type)?,
        display_title: row.try_get("display_title")?,
        cover_image_url: row.try_get("cover_image_url")?,
        metadata: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(serde_json::Value::Null),
        cluster_id: cluster_id.map(|id| ClusterId::parse(&id)).transpose()?,
        canonical_id: canonical_id
            .map(|id| CanonicalGameId::parse(&id))
            .transpose()?,
        instance_count: row.try_get("instance_count")?,
        confidence_score: row.try_get("confidence_score")?,
        created_at: row.try_get("created_at")?,
    })
}

impl LibraryReadView {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// List entries newest-first. `filter` restricts to one arm of the
    /// projection.
    pub async fn list_library_entries(
        &self,
        offset: i64,
        limit: i64,
        filter: Option<LibraryEntryKind>,
    ) -> Result<Vec<LibraryEntry>> {
        let rows = match filter {
            Some(kind) => {
                sqlx::query(
                    "SELECT * FROM library_entry_view WHERE entry_type = ? \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(kind.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM library_entry_view \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        rows.iter().map(map_entry).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM library_entry_view")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.try_get("n")?)
    }
}
