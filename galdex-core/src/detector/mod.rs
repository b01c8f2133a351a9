//! Heuristic candidate detector.
//!
//! Deterministic, read-only analysis of one directory snapshot. Produces
//! `ScanCandidate`s for the confirmation workflow — evidence, never truth.
//! The detector can never insert into the games table.

use std::path::Path;

use galdex_model::ScanCandidate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Confidence cap once indicator boosts are applied.
const CONFIDENCE_CAP: f64 = 0.95;
/// Base confidence when only generic indicators matched.
const INDICATOR_BASE: f64 = 0.3;
/// Boost applied when generic indicators are present.
const INDICATOR_BOOST: f64 = 0.2;

/// Engine fingerprints, ordered; the first match wins.
struct EngineSignature {
    name: &'static str,
    files: &'static [&'static str],
    dirs: &'static [&'static str],
    confidence: f64,
}

const ENGINE_SIGNATURES: &[EngineSignature] = &[
    EngineSignature {
        name: "kirikiri",
        files: &["data.xp3", "*.xp3"],
        dirs: &[],
        confidence: 0.8,
    },
    EngineSignature {
        name: "siglus",
        files: &["SiglusEngine.exe", "Scene.pck"],
        dirs: &[],
        confidence: 0.9,
    },
    EngineSignature {
        name: "willplus",
        files: &["Rio.arc", "*.arc"],
        dirs: &[],
        confidence: 0.75,
    },
    EngineSignature {
        name: "unity",
        files: &["UnityPlayer.dll", "Assembly-CSharp.dll"],
        dirs: &[],
        confidence: 0.6,
    },
    EngineSignature {
        name: "renpy",
        files: &["*.rpyc"],
        dirs: &["renpy"],
        confidence: 0.85,
    },
];

/// Files that commonly sit next to a game and raise confidence.
const GAME_INDICATORS: &[&str] =
    &["*.exe", "*.lnk", "unins000.exe", "*.url", "*.desktop"];

static IGNORE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Image-only folders.
        r"(?i)^photos?$",
        r"(?i)^images?$",
        r"(?i)^screenshots?$",
        r"(?i)^wallpapers?$",
        // System folders.
        r"^[._]",
        // Archive/backup folders.
        r"(?i)^(backup|old|archive|temp)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

static BRACKET_GROUPS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]").expect("static pattern"));
static LEADING_JUNK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(~\$|~|\d+[.\-_]*\s+)").expect("static pattern"));
static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("static pattern"));

/// Clean a folder name into a displayable title.
///
/// Strips bracketed date/version groups (`[2021-05-28][v1.0] Title`),
/// leading numeric prefixes, and collapses whitespace. Falls back to the
/// raw name when cleaning eats everything.
pub fn clean_title(folder_name: &str) -> String {
    let cleaned = BRACKET_GROUPS.replace_all(folder_name, "");
    let cleaned = LEADING_JUNK.replace(cleaned.trim(), "");
    let cleaned = WHITESPACE.replace_all(cleaned.trim(), " ").to_string();

    if cleaned.is_empty() {
        folder_name.to_string()
    } else {
        cleaned
    }
}

/// Whether a folder name is categorically not a game.
pub fn should_ignore(folder_name: &str) -> bool {
    IGNORE_PATTERNS.iter().any(|p| p.is_match(folder_name))
}

/// Top-level listing of a folder, split by kind.
struct Listing {
    files: Vec<String>,
    dirs: Vec<String>,
}

fn list_folder(folder: &Path) -> Option<Listing> {
    let read_dir = std::fs::read_dir(folder).ok()?;
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    for entry in read_dir.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        match entry.file_type() {
            Ok(t) if t.is_dir() => dirs.push(name),
            Ok(_) => files.push(name),
            Err(_) => {}
        }
    }

    Some(Listing { files, dirs })
}

fn matches_pattern(name: &str, pattern: &str) -> bool {
    if let Some(ext) = pattern.strip_prefix("*.") {
        name.rsplit_once('.')
            .map(|(_, e)| e.eq_ignore_ascii_case(ext))
            .unwrap_or(false)
    } else {
        name == pattern
    }
}

/// Detect the engine from file signatures. First match wins.
fn detect_engine(listing: &Listing) -> Option<(&'static str, f64)> {
    for signature in ENGINE_SIGNATURES {
        let file_hit = signature
            .files
            .iter()
            .any(|p| listing.files.iter().any(|f| matches_pattern(f, p)));
        let dir_hit = signature
            .dirs
            .iter()
            .any(|d| listing.dirs.iter().any(|name| name == d));

        if file_hit || dir_hit {
            return Some((signature.name, signature.confidence));
        }
    }
    None
}

fn has_game_indicators(listing: &Listing) -> bool {
    GAME_INDICATORS
        .iter()
        .any(|p| listing.files.iter().any(|f| matches_pattern(f, p)))
}

/// Analyze one folder; `None` means "not a game".
pub fn analyze_folder(folder: &Path) -> Option<ScanCandidate> {
    if !folder.is_dir() {
        return None;
    }

    let folder_name = folder.file_name()?.to_string_lossy().into_owned();

    if should_ignore(&folder_name) {
        debug!(folder = %folder_name, "ignoring folder");
        return None;
    }

    let listing = match list_folder(folder) {
        Some(listing) => listing,
        None => {
            warn!(folder = %folder.display(), "cannot list folder");
            return None;
        }
    };

    let engine = detect_engine(&listing);
    let indicators_found = has_game_indicators(&listing);

    if engine.is_none() && !indicators_found {
        debug!(folder = %folder_name, "no engine or indicators, skipping");
        return None;
    }

    let mut confidence = engine.map(|(_, c)| c).unwrap_or(INDICATOR_BASE);
    let mut indicators = Vec::new();
    if indicators_found {
        confidence = (confidence + INDICATOR_BOOST).min(CONFIDENCE_CAP);
        indicators.push("has_executable".to_string());
        indicators.push("has_game_files".to_string());
    }

    let title = clean_title(&folder_name);
    debug!(
        title,
        engine = engine.map(|(n, _)| n),
        confidence,
        "detected candidate"
    );

    Some(ScanCandidate::new(
        folder.display().to_string(),
        title,
        engine.map(|(name, _)| name.to_string()),
        confidence,
        indicators,
    ))
}

/// Analyze every immediate subdirectory of `root`.
pub fn analyze_directory(root: &Path) -> Vec<ScanCandidate> {
    let Ok(read_dir) = std::fs::read_dir(root) else {
        warn!(root = %root.display(), "cannot read scan root");
        return Vec::new();
    };

    read_dir
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| analyze_folder(&e.path()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn game_dir(root: &TempDir, name: &str, files: &[&str]) -> std::path::PathBuf {
        let dir = root.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        for file in files {
            fs::write(dir.join(file), b"x").unwrap();
        }
        dir
    }

    #[test]
    fn kirikiri_signature_wins() {
        let root = TempDir::new().unwrap();
        let dir = game_dir(&root, "Fate", &["data.xp3", "game.exe"]);

        let candidate = analyze_folder(&dir).unwrap();
        assert_eq!(candidate.detected_engine.as_deref(), Some("kirikiri"));
        // 0.8 engine base + 0.2 indicator boost, capped.
        assert!((candidate.confidence - 0.95).abs() < 1e-9);
        assert!(candidate.indicators.contains(&"has_executable".to_string()));
    }

    #[test]
    fn siglus_without_indicators_keeps_engine_confidence() {
        let root = TempDir::new().unwrap();
        let dir = game_dir(&root, "Clannad", &["Scene.pck"]);

        let candidate = analyze_folder(&dir).unwrap();
        assert_eq!(candidate.detected_engine.as_deref(), Some("siglus"));
        assert!((candidate.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn renpy_detected_by_subdirectory() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("DDLC");
        fs::create_dir_all(dir.join("renpy")).unwrap();

        let candidate = analyze_folder(&dir).unwrap();
        assert_eq!(candidate.detected_engine.as_deref(), Some("renpy"));
    }

    #[test]
    fn indicator_only_folder_scores_half() {
        let root = TempDir::new().unwrap();
        let dir = game_dir(&root, "SomeGame", &["start.exe"]);

        let candidate = analyze_folder(&dir).unwrap();
        assert!(candidate.detected_engine.is_none());
        assert!((candidate.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn folder_without_signals_is_skipped() {
        let root = TempDir::new().unwrap();
        let dir = game_dir(&root, "JustDocs", &["readme.txt", "notes.md"]);

        assert!(analyze_folder(&dir).is_none());
    }

    #[test]
    fn ignore_patterns_filter_noise_folders() {
        assert!(should_ignore("Photos"));
        assert!(should_ignore("screenshots"));
        assert!(should_ignore(".hidden"));
        assert!(should_ignore("_meta"));
        assert!(should_ignore("backup-2024"));
        assert!(should_ignore("temp"));
        assert!(!should_ignore("Fate Stay Night"));

        let root = TempDir::new().unwrap();
        let dir = game_dir(&root, "Photos", &["viewer.exe"]);
        assert!(analyze_folder(&dir).is_none());
    }

    #[test]
    fn title_cleaning() {
        assert_eq!(
            clean_title("[2021-05-28][v1.0] Summer Pockets"),
            "Summer Pockets"
        );
        assert_eq!(clean_title("Muv-Luv [Remastered]"), "Muv-Luv");
        assert_eq!(clean_title("03. Rewrite"), "Rewrite");
        assert_eq!(clean_title("   spaced    out   "), "spaced out");
        // Cleaning that eats everything falls back to the raw name.
        assert_eq!(clean_title("[v1.0]"), "[v1.0]");
    }

    #[test]
    fn analyze_directory_walks_subfolders_only() {
        let root = TempDir::new().unwrap();
        game_dir(&root, "GameA", &["data.xp3"]);
        game_dir(&root, "Photos", &["a.jpg"]);
        game_dir(&root, "Docs", &["readme.txt"]);
        fs::write(root.path().join("loose.exe"), b"x").unwrap();

        let candidates = analyze_directory(root.path());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].detected_title, "GameA");
    }
}
