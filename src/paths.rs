use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::settings::APP_NAME;

pub struct DataPaths {
    pub root: PathBuf,
    pub signatures_dir: PathBuf,
    pub preferences_dir: PathBuf,
}

/// MD5 hex digest of a document path, used to key per-document records.
pub fn document_key(path: &Path) -> String {
    let digest = md5::compute(path.to_string_lossy().as_bytes());
    format!("{digest:x}")
}

/// Compute data directories, rooted at `override_root` when given,
/// otherwise at the platform data dir. Creates them if they don't exist.
pub fn resolve_data_paths(override_root: Option<&Path>) -> Result<DataPaths> {
    let root = match override_root {
        Some(root) if root.is_absolute() => root.to_path_buf(),
        Some(root) => std::env::current_dir()
            .context("Failed to get current directory")?
            .join(root),
        None => dirs::data_dir()
            .context("Could not determine data directory")?
            .join(APP_NAME),
    };

    let signatures_dir = root.join("signatures");
    let preferences_dir = root.join("preferences");

    fs::create_dir_all(&signatures_dir)
        .with_context(|| format!("Failed to create signatures directory: {signatures_dir:?}"))?;
    fs::create_dir_all(&preferences_dir).with_context(|| {
        format!("Failed to create preferences directory: {preferences_dir:?}")
    })?;

    Ok(DataPaths {
        root,
        signatures_dir,
        preferences_dir,
    })
}

/// Compute the XDG-compliant log file path.
/// Uses `state_dir` on platforms that have it, falls back to `cache_dir`.
pub fn resolve_log_path() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(dirs::cache_dir)
        .context("Could not determine state or cache directory")?;

    let log_dir = base.join(APP_NAME);
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {log_dir:?}"))?;

    Ok(log_dir.join(format!("{APP_NAME}.log")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_document_key_is_stable_hex() {
        let key = document_key(Path::new("/books/contract.pdf"));
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, document_key(Path::new("/books/contract.pdf")));
        assert_ne!(key, document_key(Path::new("/books/other.pdf")));
    }

    #[test]
    fn test_resolve_data_paths_creates_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let paths = resolve_data_paths(Some(temp_dir.path())).unwrap();

        assert_eq!(paths.root, temp_dir.path());
        assert!(paths.signatures_dir.is_dir());
        assert!(paths.preferences_dir.is_dir());
        assert!(paths.signatures_dir.starts_with(temp_dir.path()));
    }
}
