//! Naming/category standard contract consumed by the organizer.
//!
//! The organizer classifies every file in a source tree against a standard
//! and derives target paths from it; the aesthetics of the layout are the
//! standard's business, not the organizer's.

use std::path::{Path, PathBuf};

/// Category a file is sorted into within an organized game directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    /// Extracted game files and executables.
    Game,
    /// ISOs, installers and archives in original distribution format.
    Repository,
    /// Patches, cracks, translations and modifications.
    PatchWork,
    /// OSTs, artbooks, manuals and bonus content.
    Extras,
    /// System metadata and cached images.
    Metadata,
    /// Could not be categorized; needs a user decision.
    Unknown,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Game => "Game",
            FileCategory::Repository => "Repository",
            FileCategory::PatchWork => "Patch_Work",
            FileCategory::Extras => "Extras",
            FileCategory::Metadata => "Metadata",
            FileCategory::Unknown => "UNKNOWN",
        }
    }
}

/// Metadata driving target-path generation for one game.
#[derive(Debug, Clone)]
pub struct NamingContext {
    pub developer: String,
    /// Release year; a full `YYYY-MM-DD` date is reduced to the year.
    pub year: String,
    pub title: String,
    /// External catalog id embedded in the folder name, e.g. `v12345`.
    pub catalog_id: String,
}

/// Pluggable naming/category standard.
pub trait NamingStandard: Send + Sync {
    /// Classify one file from the source tree.
    fn categorize(&self, file: &Path) -> FileCategory;

    /// Base directory for the organized game under the library root.
    fn base_dir(&self, root: &Path, ctx: &NamingContext) -> PathBuf;

    /// Target directory for a category beneath the base directory.
    fn category_dir(
        &self,
        root: &Path,
        ctx: &NamingContext,
        category: FileCategory,
    ) -> PathBuf {
        self.base_dir(root, ctx).join(category.as_str())
    }
}
