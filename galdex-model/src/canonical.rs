use chrono::{DateTime, Utc};

use crate::ids::CanonicalGameId;

/// The sole source of truth for a game identity.
///
/// Created only by the canonicalization service; thereafter the id is
/// permanent and only the mutable display fields may change.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanonicalGame {
    pub id: CanonicalGameId,
    pub display_title: String,
    pub metadata_snapshot: serde_json::Value,
    pub cover_image_url: Option<String>,
    /// Set by a later user act, never by canonicalization itself.
    pub is_curated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// External-ecosystem alias for a canonical game.
///
/// `(source_type, external_id)` is globally unique: two canonical games can
/// never claim the same external alias.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdentityLink {
    pub canonical_id: CanonicalGameId,
    pub source_type: String,
    pub external_id: String,
    pub external_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Provenance record for a canonical entity creation.
///
/// Append-only. No canonical entity may exist without at least one link.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanonicalSourceLink {
    pub entity_type: String,
    pub entity_id: String,
    pub source_type: String,
    pub source_id: String,
    pub source_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Partial update applied to the mutable fields of a canonical game.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanonicalPatch {
    pub display_title: Option<String>,
    pub cover_image_url: Option<String>,
    pub description: Option<String>,
    pub developer: Option<String>,
    pub release_date: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl CanonicalPatch {
    pub fn is_empty(&self) -> bool {
        self.display_title.is_none()
            && self.cover_image_url.is_none()
            && self.description.is_none()
            && self.developer.is_none()
            && self.release_date.is_none()
            && self.tags.is_none()
    }
}
