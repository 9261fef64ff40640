//! Directory-backed store for extracted signatures

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Local;
use image::ImageFormat;
use log::{debug, error, warn};
use regex::Regex;

use crate::pixels::PixelBuffer;

const EXTENSION: &str = "png";
const MAX_NAME_LEN: usize = 64;

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("signature name pattern is valid"));

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode signature: {0}")]
    Encode(#[from] image::ImageError),

    #[error("cannot save an empty signature")]
    Empty,
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File stem of a stored signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignatureId(String);

impl SignatureId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduce a user-supplied name to `[A-Za-z0-9_-]`, at most 64 characters.
///
/// Runs of other characters collapse into one `_`; leading and trailing `_`
/// are trimmed. May return an empty string.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let replaced = DISALLOWED.replace_all(name, "_");
    let trimmed = replaced.trim_matches('_');
    // Only ASCII survives the replacement, so byte slicing is safe.
    let limited = &trimmed[..trimmed.len().min(MAX_NAME_LEN)];
    limited.trim_end_matches('_').to_string()
}

fn timestamp_name() -> String {
    format!("signature_{}", Local::now().format("%Y%m%d_%H%M%S_%3f"))
}

/// `base` for the first attempt, then `base_N`, cut so the result stays
/// within the name limit.
fn candidate_id(base: &str, n: u32) -> String {
    if n == 0 {
        return base.to_string();
    }
    let suffix = format!("_{n}");
    let keep = base.len().min(MAX_NAME_LEN.saturating_sub(suffix.len()));
    format!("{}{suffix}", base[..keep].trim_end_matches('_'))
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && sanitize_name(id) == id
}

/// PNG files in one directory, one per signature
#[derive(Debug, Clone)]
pub struct SignatureStore {
    dir: PathBuf,
}

impl SignatureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a valid id maps to, whether or not it exists
    #[must_use]
    pub fn path_for(&self, id: &str) -> Option<PathBuf> {
        is_valid_id(id).then(|| self.dir.join(format!("{id}.{EXTENSION}")))
    }

    /// Persist `buffer` as PNG. Never overwrites: an existing id gets a
    /// numeric suffix.
    pub fn save(&self, buffer: &PixelBuffer, name: Option<&str>) -> Result<SignatureId, StoreError> {
        if buffer.is_empty() {
            return Err(StoreError::Empty);
        }

        let base = name
            .map(sanitize_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(timestamp_name);
        let mut encoded = Cursor::new(Vec::new());
        buffer.to_image().write_to(&mut encoded, ImageFormat::Png)?;
        let (id, path) = self.claim_id(&base)?;

        // Write next to the claimed file, then rename over it, so a failed write leaves no half file.
        let partial = path.with_extension("png.partial");
        let stored = fs::write(&partial, encoded.into_inner())
            .map_err(|e| StoreError::io(&partial, e))
            .and_then(|()| fs::rename(&partial, &path).map_err(|e| StoreError::io(&path, e)));
        if let Err(e) = stored {
            let _ = fs::remove_file(&partial);
            let _ = fs::remove_file(&path);
            error!("Failed to store signature {path:?}: {e}");
            return Err(e);
        }

        debug!(
            "Saved signature {id} ({}x{}) to {path:?}",
            buffer.width(),
            buffer.height()
        );
        Ok(SignatureId(id))
    }

    /// Reserve the first free id by creating its file exclusively, so
    /// concurrent saves of one name never land on the same path.
    fn claim_id(&self, base: &str) -> Result<(String, PathBuf), StoreError> {
        let mut n = 0;
        loop {
            let id = candidate_id(base, n);
            let path = self.dir.join(format!("{id}.{EXTENSION}"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok((id, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => {
                    error!("Failed to reserve signature {path:?}: {e}");
                    return Err(StoreError::io(&path, e));
                }
            }
        }
    }

    pub fn load(&self, id: &str) -> Option<PixelBuffer> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return None;
        }
        match image::open(&path) {
            Ok(image) => Some(PixelBuffer::from_image(&image)),
            Err(e) => {
                warn!("Failed to load signature {path:?}: {e}");
                None
            }
        }
    }

    /// Stored ids in ascending order
    #[must_use]
    pub fn list(&self) -> Vec<SignatureId> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list signatures in {:?}: {e}", self.dir);
                return Vec::new();
            }
        };

        let mut ids: Vec<SignatureId> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case(EXTENSION))
            })
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
            .filter(|stem| is_valid_id(stem))
            .map(SignatureId)
            .collect();
        ids.sort();
        ids
    }

    /// Remove a signature. False when it did not exist or could not be removed.
    pub fn delete(&self, id: &str) -> bool {
        let Some(path) = self.path_for(id) else {
            warn!("Refusing to delete invalid signature id {id:?}");
            return false;
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted signature {id}");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                error!("Failed to delete signature {path:?}: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::PixelFormat;
    use tempfile::TempDir;

    fn ink() -> PixelBuffer {
        let mut buffer = PixelBuffer::new(6, 3, PixelFormat::Rgba8);
        buffer.set_pixel(1, 1, [12, 12, 12, 255]);
        buffer
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Jane Doe"), "Jane_Doe");
        assert_eq!(sanitize_name("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_name("initials-v2"), "initials-v2");
        assert_eq!(sanitize_name("  !!! "), "");
        assert_eq!(sanitize_name("日本語 sig"), "sig");
        assert_eq!(sanitize_name(&"a".repeat(100)).len(), 64);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = SignatureStore::new(temp_dir.path()).unwrap();

        let id = store.save(&ink(), Some("My Signature")).unwrap();
        assert_eq!(id.as_str(), "My_Signature");

        let loaded = store.load(id.as_str()).unwrap();
        assert_eq!(loaded, ink());
    }

    #[test]
    fn test_save_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let store = SignatureStore::new(temp_dir.path()).unwrap();

        let first = store.save(&ink(), Some("sig")).unwrap();
        let second = store.save(&ink(), Some("sig")).unwrap();
        let third = store.save(&ink(), Some("sig")).unwrap();

        assert_eq!(first.as_str(), "sig");
        assert_eq!(second.as_str(), "sig_1");
        assert_eq!(third.as_str(), "sig_2");
        assert_eq!(store.list().len(), 3);
    }

    #[test]
    fn test_long_name_collisions_stay_reachable() {
        let temp_dir = TempDir::new().unwrap();
        let store = SignatureStore::new(temp_dir.path()).unwrap();
        let long = "a".repeat(64);

        let first = store.save(&ink(), Some(&long)).unwrap();
        let second = store.save(&ink(), Some(&long)).unwrap();
        assert_eq!(first.as_str(), long);
        assert_eq!(second.as_str(), format!("{}_1", "a".repeat(62)));
        assert_eq!(second.as_str().len(), 64);

        assert_eq!(store.load(first.as_str()), Some(ink()));
        assert_eq!(store.load(second.as_str()), Some(ink()));
        // `_` sorts before `a`, so the suffixed id lists first.
        assert_eq!(store.list(), vec![second.clone(), first.clone()]);
        assert!(store.delete(first.as_str()));
        assert!(store.delete(second.as_str()));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_candidate_id_drops_trailing_separator() {
        let base = format!("{}_b", "a".repeat(61));
        assert_eq!(candidate_id(&base, 0), base);
        assert_eq!(candidate_id(&base, 1), format!("{}_1", "a".repeat(61)));
        assert_eq!(candidate_id(&"a".repeat(64), 12).len(), 64);
    }

    #[test]
    fn test_save_keeps_existing_file_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let store = SignatureStore::new(temp_dir.path()).unwrap();
        let existing = temp_dir.path().join("sig.png");
        fs::write(&existing, b"someone else's bytes").unwrap();

        let id = store.save(&ink(), Some("sig")).unwrap();
        assert_eq!(id.as_str(), "sig_1");
        assert_eq!(fs::read(&existing).unwrap(), b"someone else's bytes");
        assert!(!temp_dir.path().join("sig_1.png.partial").exists());
    }

    #[test]
    fn test_concurrent_saves_get_distinct_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = SignatureStore::new(temp_dir.path()).unwrap();

        let ids: Vec<SignatureId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| store.save(&ink(), Some("shared")).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 8);
        assert_eq!(store.list(), unique);
        for id in &unique {
            assert_eq!(store.load(id.as_str()), Some(ink()));
        }
    }

    #[test]
    fn test_unnamed_signature_gets_timestamp() {
        let temp_dir = TempDir::new().unwrap();
        let store = SignatureStore::new(temp_dir.path()).unwrap();

        let id = store.save(&ink(), None).unwrap();
        assert!(id.as_str().starts_with("signature_"));

        let blank = store.save(&ink(), Some("???")).unwrap();
        assert!(blank.as_str().starts_with("signature_"));
    }

    #[test]
    fn test_list_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = SignatureStore::new(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "not a signature").unwrap();

        store.save(&ink(), Some("b")).unwrap();
        store.save(&ink(), Some("a")).unwrap();
        let ids: Vec<String> = store.list().iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert!(!store.delete("../b"));
        assert!(store.load("a").is_none());
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_empty_buffer_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = SignatureStore::new(temp_dir.path()).unwrap();
        let empty = PixelBuffer::new(0, 0, PixelFormat::Rgba8);
        assert!(matches!(store.save(&empty, None), Err(StoreError::Empty)));
    }
}
