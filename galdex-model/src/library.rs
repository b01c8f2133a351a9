use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::ids::{CanonicalGameId, ClusterId};

/// Which arm of the library projection a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LibraryEntryKind {
    Canonical,
    Suggested,
    Orphan,
}

impl LibraryEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryEntryKind::Canonical => "canonical",
            LibraryEntryKind::Suggested => "suggested",
            LibraryEntryKind::Orphan => "orphan",
        }
    }
}

impl std::str::FromStr for LibraryEntryKind {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "canonical" => Ok(LibraryEntryKind::Canonical),
            "suggested" => Ok(LibraryEntryKind::Suggested),
            "orphan" => Ok(LibraryEntryKind::Orphan),
            other => Err(ModelError::UnknownVariant {
                kind: "library entry",
                value: other.to_string(),
            }),
        }
    }
}

/// One row of the unified library projection backing the UI.
///
/// `entry_id` is `canonical:<id>`, `cluster:<id>` or `orphan:<path>`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LibraryEntry {
    pub entry_id: String,
    pub entry_type: LibraryEntryKind,
    pub display_title: String,
    pub cover_image_url: Option<String>,
    pub metadata: serde_json::Value,
    pub cluster_id: Option<ClusterId>,
    pub canonical_id: Option<CanonicalGameId>,
    pub instance_count: i64,
    pub confidence_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}
