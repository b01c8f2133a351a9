//! Canonical-path containment checks.
//!
//! Every path the transaction engine accepts funnels through this module.
//! Resolution follows symlinks and collapses `..`; any OS error during
//! resolution makes the path unsafe (fail closed).

use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Resolve a path to its canonical absolute form.
///
/// Unlike [`std::fs::canonicalize`], the deepest suffix of the path is
/// allowed to not exist yet: the longest existing ancestor is canonicalized
/// and the remaining plain components are appended. A `..` inside the
/// non-existent suffix cannot be resolved and yields `None`.
fn resolve(path: &Path) -> Option<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };

    let mut existing = absolute;
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(mut resolved) => {
                for component in tail.iter().rev() {
                    resolved.push(component);
                }
                return Some(resolved);
            }
            Err(_) => {
                // file_name() is None for paths ending in `..` or `.`,
                // which keeps unresolvable traversals unsafe.
                let name = existing.file_name()?.to_os_string();
                tail.push(name);
                existing = existing.parent()?.to_path_buf();
            }
        }
    }
}

/// Validate that `path` is safely contained within `root`.
///
/// Returns `false` when the resolved path escapes the resolved root or when
/// either side cannot be resolved.
pub fn is_safe(path: &Path, root: &Path) -> bool {
    let Some(real_root) = resolve(root) else {
        return false;
    };
    if !real_root.exists() {
        return false;
    }
    match resolve(path) {
        Some(real_path) => real_path.starts_with(&real_root),
        None => false,
    }
}

/// Validate `path` against `root` and return its canonical form.
pub fn validate_or_deny(path: &Path, root: &Path) -> Result<PathBuf> {
    if !is_safe(path, root) {
        return Err(CoreError::PathUnsafe(format!(
            "{} is not contained within {}",
            path.display(),
            root.display()
        )));
    }
    resolve(path)
        .ok_or_else(|| CoreError::PathUnsafe(path.display().to_string()))
}

/// Validate that a directory may host the journal.
///
/// It must exist, be a directory, not be a symlink, and accept a write
/// probe (removed before return).
pub fn is_safe_config_dir(dir: &Path) -> bool {
    let Ok(meta) = std::fs::symlink_metadata(dir) else {
        return false;
    };
    if meta.file_type().is_symlink() || !meta.is_dir() {
        return false;
    }

    let probe = dir.join(".write_test_probe");
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn contained_path_is_safe() {
        let root = TempDir::new().unwrap();
        let inside = root.path().join("game").join("start.exe");
        fs::create_dir_all(inside.parent().unwrap()).unwrap();
        fs::write(&inside, b"x").unwrap();

        assert!(is_safe(&inside, root.path()));
        assert!(is_safe(root.path(), root.path()));
    }

    #[test]
    fn parent_traversal_is_unsafe() {
        let root = TempDir::new().unwrap();
        let outside = root.path().join("..").join("etc").join("passwd");

        assert!(!is_safe(&outside, root.path()));
    }

    #[test]
    fn absolute_path_outside_root_is_unsafe() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();

        assert!(!is_safe(other.path(), root.path()));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_root_is_unsafe() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let link = root.path().join("sneaky");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        assert!(!is_safe(&link, root.path()));
        assert!(!is_safe(&link.join("file"), root.path()));
    }

    #[test]
    fn nonexistent_leaf_under_root_is_safe() {
        let root = TempDir::new().unwrap();
        let dest = root.path().join("not-yet-created");

        assert!(is_safe(&dest, root.path()));
    }

    #[test]
    fn missing_root_is_unsafe() {
        let root = TempDir::new().unwrap();
        let gone = root.path().join("missing-root");

        assert!(!is_safe(&gone.join("x"), &gone));
    }

    #[test]
    fn validate_or_deny_returns_canonical_path() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("a.txt");
        fs::write(&file, b"x").unwrap();

        let resolved = validate_or_deny(&file, root.path()).unwrap();
        assert!(resolved.is_absolute());

        let err = validate_or_deny(Path::new("/etc/passwd"), root.path());
        assert!(matches!(err, Err(CoreError::PathUnsafe(_))));
    }

    #[test]
    fn config_dir_probe() {
        let dir = TempDir::new().unwrap();
        assert!(is_safe_config_dir(dir.path()));

        let file = dir.path().join("plain-file");
        fs::write(&file, b"x").unwrap();
        assert!(!is_safe_config_dir(&file));

        assert!(!is_safe_config_dir(&dir.path().join("missing")));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_config_dir_is_rejected() {
        let real = TempDir::new().unwrap();
        let holder = TempDir::new().unwrap();
        let link = holder.path().join("config");
        std::os::unix::fs::symlink(real.path(), &link).unwrap();

        assert!(!is_safe_config_dir(&link));
    }
}
