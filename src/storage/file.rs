//! File-backed store: one JSON file per key under a root directory.
//!
//! Keys containing `/` map to subdirectories (`bets/4` → `<root>/bets/4.json`).
//! Segments that would not map back to the same key (empty, `.`, `..`,
//! backslashes) are rejected rather than rewritten. Saves write a sibling temp file and `rename` it into place, so a crash
//! mid-write leaves either the old record or the new one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{PersistenceProvider, StorageError};

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn segments(key: &str) -> Result<Vec<&str>, StorageError> {
        let segments: Vec<&str> = key.split('/').collect();
        let invalid = segments
            .iter()
            .any(|s| s.is_empty() || *s == "." || *s == ".." || s.contains(['\\', '\0']));
        if invalid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(segments)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let segments = Self::segments(key)?;
        let mut path = self.root.clone();
        if let Some((last, dirs)) = segments.split_last() {
            for dir in dirs {
                path.push(dir);
            }
            path.push(format!("{last}.json"));
        }
        Ok(path)
    }
}

fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        key: key.to_string(),
        source,
    }
}

impl PersistenceProvider for FileStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(key)(e)),
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(key))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(io_err(key))?;
        fs::rename(&tmp, &path).map_err(io_err(key))?;
        debug!(key, bytes = bytes.len(), "Record saved");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(key)(e)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = match prefix.strip_suffix('/') {
            Some(dir) => dir,
            None => return Err(StorageError::InvalidKey(prefix.to_string())),
        };
        let mut path = self.root.clone();
        for segment in Self::segments(dir)? {
            path.push(segment);
        }

        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(prefix)(e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(prefix))?;
            if !entry.file_type().map_err(io_err(prefix))?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                keys.push(format!("{prefix}{stem}"));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
