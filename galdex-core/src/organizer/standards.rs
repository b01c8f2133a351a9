//! Shipped naming standard and file categorization rules.
//!
//! The organizer itself is standard-agnostic; this module provides the
//! default layout `<root>/<Developer>/<Year> <Title> [<id>]/<Category>`
//! with category rules tuned for game folders.

use std::path::{Path, PathBuf};

use galdex_contracts::naming::{FileCategory, NamingContext, NamingStandard};
use once_cell::sync::Lazy;
use regex::Regex;

/// Exact names that are always metadata.
const METADATA_NAMES: &[&str] =
    &["metadata.json", "folder.jpg", "cover.jpg", "background.jpg"];

/// Installer names that belong in the repository.
const INSTALLER_NAMES: &[&str] = &["setup.exe", "install.exe"];

static PATCH_HINTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(patch|crack|nodvd|no.?dvd|update|hotfix|chinese|decensor)")
        .expect("static pattern")
});

static EXTRAS_HINTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(ost|soundtrack|bgm|artbook|art.?book|gallery|manual|guide|walkthrough|save)",
    )
    .expect("static pattern")
});

static SPLIT_ARCHIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\.part\d+\.rar$|\.r\d{2}$|\.z\d{2}$|\.\d{3}$)")
        .expect("static pattern")
});

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())
}

/// Whether a file is one piece of a split archive set.
pub fn is_split_archive(file: &Path) -> bool {
    file.file_name()
        .map(|n| SPLIT_ARCHIVE.is_match(&n.to_string_lossy()))
        .unwrap_or(false)
}

/// Base name shared by all pieces of a split archive.
pub fn archive_group_name(file: &Path) -> String {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    SPLIT_ARCHIVE.replace(&name, "").into_owned()
}

/// Strip characters that are invalid in path components and trim the
/// trailing dots/spaces Windows refuses.
pub fn sanitize_component(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches(['.', ' ']).to_string();
    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed
    }
}

/// The default standard.
#[derive(Debug, Clone, Copy, Default)]
pub struct GalgameStandard;

impl NamingStandard for GalgameStandard {
    fn categorize(&self, file: &Path) -> FileCategory {
        let Some(name) = file.file_name().map(|n| n.to_string_lossy().to_lowercase())
        else {
            return FileCategory::Unknown;
        };

        if METADATA_NAMES.contains(&name.as_str()) {
            return FileCategory::Metadata;
        }
        if INSTALLER_NAMES.contains(&name.as_str()) {
            return FileCategory::Repository;
        }
        if PATCH_HINTS.is_match(&name) {
            return FileCategory::PatchWork;
        }
        if EXTRAS_HINTS.is_match(&name) {
            return FileCategory::Extras;
        }

        match extension_of(&name).as_deref() {
            Some("exe" | "dll" | "xp3" | "dat" | "pack" | "pck" | "arc" | "rpyc") => {
                FileCategory::Game
            }
            Some("iso" | "mdf" | "cue" | "ccd" | "bin" | "zip" | "rar" | "7z") => {
                FileCategory::Repository
            }
            Some("mp3" | "flac" | "pdf") => FileCategory::Extras,
            Some("json" | "jpg" | "jpeg" | "png" | "webp") => FileCategory::Metadata,
            _ => FileCategory::Unknown,
        }
    }

    fn base_dir(&self, root: &Path, ctx: &NamingContext) -> PathBuf {
        let year = ctx
            .year
            .split('-')
            .next()
            .unwrap_or(&ctx.year)
            .to_string();
        let folder = format!(
            "{} {} [{}]",
            year,
            sanitize_component(&ctx.title),
            ctx.catalog_id
        );
        root.join(sanitize_component(&ctx.developer)).join(folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> NamingContext {
        NamingContext {
            developer: "Key".to_string(),
            year: "2004-04-28".to_string(),
            title: "CLANNAD".to_string(),
            catalog_id: "v4".to_string(),
        }
    }

    #[test]
    fn categorization_rules() {
        let std = GalgameStandard;
        assert_eq!(std.categorize(Path::new("start.exe")), FileCategory::Game);
        assert_eq!(std.categorize(Path::new("data.xp3")), FileCategory::Game);
        assert_eq!(
            std.categorize(Path::new("setup.exe")),
            FileCategory::Repository
        );
        assert_eq!(
            std.categorize(Path::new("game.iso")),
            FileCategory::Repository
        );
        assert_eq!(
            std.categorize(Path::new("crack-nodvd.zip")),
            FileCategory::PatchWork
        );
        assert_eq!(
            std.categorize(Path::new("artbook-scans.rar")),
            FileCategory::Extras
        );
        assert_eq!(std.categorize(Path::new("ost.mp3")), FileCategory::Extras);
        assert_eq!(
            std.categorize(Path::new("cover.jpg")),
            FileCategory::Metadata
        );
        assert_eq!(
            std.categorize(Path::new("mystery.bin2")),
            FileCategory::Unknown
        );
    }

    #[test]
    fn layout_follows_developer_year_title() {
        let std = GalgameStandard;
        let base = std.base_dir(Path::new("/library"), &ctx());
        assert_eq!(
            base,
            Path::new("/library/Key/2004 CLANNAD [v4]")
        );

        let game = std.category_dir(Path::new("/library"), &ctx(), FileCategory::Game);
        assert_eq!(game, Path::new("/library/Key/2004 CLANNAD [v4]/Game"));
    }

    #[test]
    fn sanitization_removes_reserved_characters() {
        assert_eq!(sanitize_component("A:B/C?D"), "A_B_C_D");
        assert_eq!(sanitize_component("  name. "), "name");
        assert_eq!(sanitize_component("???"), "___");
        assert_eq!(sanitize_component("   "), "Unknown");
    }

    #[test]
    fn split_archives_share_a_group() {
        assert!(is_split_archive(Path::new("game.part1.rar")));
        assert!(is_split_archive(Path::new("game.r00")));
        assert!(is_split_archive(Path::new("game.7z.001")));
        assert!(!is_split_archive(Path::new("game.rar")));

        assert_eq!(
            archive_group_name(Path::new("game.part1.rar")),
            archive_group_name(Path::new("game.part2.rar"))
        );
    }
}
