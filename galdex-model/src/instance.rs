use chrono::{DateTime, Utc};

use crate::ids::CanonicalGameId;

/// A concrete folder on disk believed to contain one copy of a game.
///
/// Keyed by `folder_path`. May link to at most one canonical game; the link
/// is nulled (never cascaded) when the canonical is deleted.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalInstance {
    pub folder_path: String,
    pub title: String,
    pub developer: Option<String>,
    pub cover_image: Option<String>,
    pub game_id: Option<CanonicalGameId>,
    /// Opaque fingerprint of the folder contents at last scan.
    pub scan_signature: Option<String>,
    /// Folder mtime at last scan, seconds since the epoch.
    pub folder_mtime: i64,
    /// Sidecar-metadata mtime at last scan, seconds since the epoch.
    pub metadata_mtime: i64,
    pub created_at: DateTime<Utc>,
}

impl LocalInstance {
    pub fn new(folder_path: String, title: String) -> Self {
        LocalInstance {
            folder_path,
            title,
            developer: None,
            cover_image: None,
            game_id: None,
            scan_signature: None,
            folder_mtime: 0,
            metadata_mtime: 0,
            created_at: Utc::now(),
        }
    }
}
