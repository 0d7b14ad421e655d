//! Process environment setup
//!
//! Speech engines (the Swift script in particular) need a writable scratch
//! directory. The server may be launched by an agent host with a read-only
//! or missing `TMPDIR`, so we check it once and repoint it if needed.

use crate::Result;
use log::{debug, info};
use once_cell::sync::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolved scratch directory, fixed for the lifetime of the process
static SCRATCH_DIR: OnceCell<PathBuf> = OnceCell::new();

/// Swift's clang integration writes module caches here
const CLANG_CACHE_ENV: &str = "CLANG_MODULE_CACHE_PATH";

/// Ensure `TMPDIR` points at a writable directory
///
/// Resolved once per process. Falls back to `tmp/` next to the installed
/// executable when `TMPDIR` is unset or unusable, and exports the result
/// so child processes inherit it. Also makes sure
/// `CLANG_MODULE_CACHE_PATH` is writable.
pub fn ensure_scratch_dir() -> Result<PathBuf> {
    SCRATCH_DIR
        .get_or_try_init(|| {
            let base = install_dir();
            let dir = resolve_scratch_dir(std::env::var_os("TMPDIR").map(PathBuf::from), &base)?;
            std::env::set_var("TMPDIR", &dir);

            let cache = std::env::var_os(CLANG_CACHE_ENV).map(PathBuf::from);
            let cache = match cache {
                Some(path) if is_writable_dir(&path) => path,
                _ => {
                    let path = dir.join("clang-module-cache");
                    fs::create_dir_all(&path)?;
                    std::env::set_var(CLANG_CACHE_ENV, &path);
                    path
                }
            };
            debug!("Clang module cache at {}", cache.display());

            info!("Scratch directory: {}", dir.display());
            Ok(dir)
        })
        .cloned()
}

/// Pick the scratch directory: the current one if usable, else `<base>/tmp`
pub fn resolve_scratch_dir(current: Option<PathBuf>, base: &Path) -> Result<PathBuf> {
    if let Some(path) = current {
        if is_writable_dir(&path) {
            return Ok(path);
        }
        debug!("TMPDIR {} is not a writable directory", path.display());
    }

    let fallback = base.join("tmp");
    fs::create_dir_all(&fallback)?;
    Ok(fallback)
}

/// Directory containing the running executable
///
/// This is where the Swift TTS script is shipped as well.
pub fn install_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.canonicalize().ok())
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn is_writable_dir(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_writable_tmpdir() {
        let dir = tempfile::tempdir().unwrap();
        let base = tempfile::tempdir().unwrap();
        let resolved = resolve_scratch_dir(Some(dir.path().to_path_buf()), base.path()).unwrap();
        assert_eq!(resolved, dir.path());
        assert!(!base.path().join("tmp").exists());
    }

    #[test]
    fn test_falls_back_when_missing() {
        let base = tempfile::tempdir().unwrap();
        let missing = base.path().join("does-not-exist");
        let resolved = resolve_scratch_dir(Some(missing), base.path()).unwrap();
        assert_eq!(resolved, base.path().join("tmp"));
        assert!(resolved.is_dir());
    }

    #[test]
    fn test_falls_back_when_unset() {
        let base = tempfile::tempdir().unwrap();
        let resolved = resolve_scratch_dir(None, base.path()).unwrap();
        assert_eq!(resolved, base.path().join("tmp"));
    }
}
