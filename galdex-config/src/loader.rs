//! Environment resolution.
//!
//! Precedence, highest first: sandbox mode (`GALGAME_ENV=sandbox`)
//! redirects every path under `./sandbox_data`; portable mode
//! (`VNITE_DATA_PATH`) roots everything under one app dir; otherwise the
//! explicit variables (`GALGAME_CONFIG_DIR`, `GALGAME_LIBRARY_ROOTS` /
//! `GALGAME_LIBRARY_ROOT`) apply over the defaults.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{ConfigError, Result};
use crate::settings::{SchedulerSettings, ScannerSettings, Settings};

pub const ENV_MODE: &str = "GALGAME_ENV";
pub const ENV_CONFIG_DIR: &str = "GALGAME_CONFIG_DIR";
pub const ENV_LIBRARY_ROOTS: &str = "GALGAME_LIBRARY_ROOTS";
pub const ENV_LIBRARY_ROOT: &str = "GALGAME_LIBRARY_ROOT";
pub const ENV_PORTABLE_DATA: &str = "VNITE_DATA_PATH";

const SANDBOX_BASE: &str = "sandbox_data";
const DEFAULT_BASE: &str = "galdex_data";

/// Abstraction over `std::env::var` so resolution is testable.
pub trait EnvLookup {
    fn get(&self, key: &str) -> Option<String>;
}

impl<F> EnvLookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Load settings from the process environment (after `.env`).
pub fn load() -> Result<Settings> {
    // A missing .env file is the normal case.
    let _ = dotenvy::dotenv();
    load_with(
        &|key: &str| std::env::var(key).ok(),
        &std::env::current_dir()?,
    )
}

/// Resolve settings from an explicit environment and working directory.
pub fn load_with(env: &dyn EnvLookup, cwd: &Path) -> Result<Settings> {
    let sandbox_mode = env
        .get(ENV_MODE)
        .map(|v| v.eq_ignore_ascii_case("sandbox"))
        .unwrap_or(false);
    let portable_data = env.get(ENV_PORTABLE_DATA).map(PathBuf::from);
    let portable_mode = portable_data.is_some();

    let (config_dir, library_roots) = if sandbox_mode {
        // Everything is isolated under the sandbox tree, no exceptions.
        let base = cwd.join(SANDBOX_BASE);
        info!(base = %base.display(), "sandbox mode: all paths redirected");
        (base.join("config"), vec![base.join("library")])
    } else if let Some(data) = portable_data {
        info!(data = %data.display(), "portable mode");
        let roots = parse_roots(env)?
            .unwrap_or_else(|| vec![data.join("library")]);
        (data.join("config"), roots)
    } else {
        let config_dir = env
            .get(ENV_CONFIG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| cwd.join(DEFAULT_BASE).join("config"));
        let roots = parse_roots(env)?.unwrap_or_else(|| {
            vec![cwd.join(DEFAULT_BASE).join("library")]
        });
        (config_dir, roots)
    };

    let mut settings = Settings {
        library_roots,
        config_dir,
        sandbox_mode,
        portable_mode,
        scanner: ScannerSettings::default(),
        scheduler: SchedulerSettings::default(),
    };
    settings.apply_file_overrides()?;

    info!(
        roots = settings.library_roots.len(),
        config = %settings.config_dir.display(),
        sandbox = settings.sandbox_mode,
        portable = settings.portable_mode,
        "configuration resolved"
    );
    Ok(settings)
}

/// `GALGAME_LIBRARY_ROOTS` (JSON array) wins over the single-root
/// variable; invalid JSON falls back to the single root with a warning.
fn parse_roots(env: &dyn EnvLookup) -> Result<Option<Vec<PathBuf>>> {
    if let Some(raw) = env.get(ENV_LIBRARY_ROOTS) {
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(paths) if !paths.is_empty() => {
                return Ok(Some(paths.into_iter().map(PathBuf::from).collect()));
            }
            Ok(_) => {
                return Err(ConfigError::InvalidRootsJson(
                    "empty array".to_string(),
                ));
            }
            Err(err) => {
                warn!(%err, "invalid GALGAME_LIBRARY_ROOTS, trying single root");
            }
        }
    }

    Ok(env
        .get(ENV_LIBRARY_ROOT)
        .map(|root| vec![PathBuf::from(root)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl EnvLookup {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_live_under_the_working_directory() {
        let cwd = TempDir::new().unwrap();
        let settings = load_with(&env_of(&[]), cwd.path()).unwrap();

        assert_eq!(
            settings.config_dir,
            cwd.path().join(DEFAULT_BASE).join("config")
        );
        assert_eq!(
            settings.library_roots,
            vec![cwd.path().join(DEFAULT_BASE).join("library")]
        );
        assert!(!settings.sandbox_mode);
        assert!(!settings.portable_mode);
    }

    #[test]
    fn roots_json_overrides_single_root() {
        let cwd = TempDir::new().unwrap();
        let settings = load_with(
            &env_of(&[
                (ENV_LIBRARY_ROOTS, r#"["/games", "/nas/archive"]"#),
                (ENV_LIBRARY_ROOT, "/ignored"),
            ]),
            cwd.path(),
        )
        .unwrap();

        assert_eq!(
            settings.library_roots,
            vec![PathBuf::from("/games"), PathBuf::from("/nas/archive")]
        );
    }

    #[test]
    fn single_root_variable_works() {
        let cwd = TempDir::new().unwrap();
        let settings = load_with(
            &env_of(&[(ENV_LIBRARY_ROOT, "/games")]),
            cwd.path(),
        )
        .unwrap();
        assert_eq!(settings.library_roots, vec![PathBuf::from("/games")]);
    }

    #[test]
    fn sandbox_mode_redirects_everything() {
        let cwd = TempDir::new().unwrap();
        let settings = load_with(
            &env_of(&[
                (ENV_MODE, "sandbox"),
                (ENV_LIBRARY_ROOTS, r#"["/games"]"#),
                (ENV_CONFIG_DIR, "/etc/galdex"),
            ]),
            cwd.path(),
        )
        .unwrap();

        assert!(settings.sandbox_mode);
        let base = cwd.path().join(SANDBOX_BASE);
        assert_eq!(settings.config_dir, base.join("config"));
        assert_eq!(settings.library_roots, vec![base.join("library")]);
    }

    #[test]
    fn portable_mode_roots_under_data_path() {
        let cwd = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let settings = load_with(
            &env_of(&[(
                ENV_PORTABLE_DATA,
                data.path().to_str().unwrap(),
            )]),
            cwd.path(),
        )
        .unwrap();

        assert!(settings.portable_mode);
        assert_eq!(settings.config_dir, data.path().join("config"));
        assert_eq!(settings.library_roots, vec![data.path().join("library")]);
    }

    #[test]
    fn empty_roots_array_is_an_error() {
        let cwd = TempDir::new().unwrap();
        let err = load_with(&env_of(&[(ENV_LIBRARY_ROOTS, "[]")]), cwd.path())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRootsJson(_)));
    }

    #[test]
    fn config_file_overrides_and_round_trips() {
        let cwd = TempDir::new().unwrap();
        let mut settings = load_with(&env_of(&[]), cwd.path()).unwrap();
        settings.ensure_directories().unwrap();

        settings.scanner.mode = galdex_model::ScannerMode::Realtime;
        settings.scheduler.scan_interval_min = 30;
        settings.save().unwrap();

        let reloaded = load_with(&env_of(&[]), cwd.path()).unwrap();
        assert_eq!(
            reloaded.scanner.mode,
            galdex_model::ScannerMode::Realtime
        );
        assert_eq!(reloaded.scheduler.scan_interval_min, 30);
    }

    #[test]
    fn ensure_directories_creates_missing_roots() {
        let cwd = TempDir::new().unwrap();
        let settings = load_with(&env_of(&[]), cwd.path()).unwrap();
        settings.ensure_directories().unwrap();

        assert!(settings.config_dir.is_dir());
        assert!(settings.library_roots[0].is_dir());
    }
}
