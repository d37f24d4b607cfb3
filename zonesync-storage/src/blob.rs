//! Blob store contract and implementations.
//!
//! Blobs are addressed by key on the way in and by locator on the way out.
//! Keys follow `{recordType}_{primaryKey}_{field}` so that every blob of
//! one entity can be dropped with a single prefix delete.

use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Storage for binary field payloads.
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `key`, replacing any previous payload, and
    /// returns the locator to persist in the entity.
    fn store(&self, key: &str, bytes: &[u8]) -> StorageResult<String>;

    /// Reads a payload by locator. Missing payloads are `None`.
    fn fetch(&self, locator: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Deletes every payload whose key starts with `prefix`.
    /// Returns the number removed.
    fn delete_prefix(&self, prefix: &str) -> StorageResult<usize>;
}

/// Blob store held in process memory. Locators are the keys themselves.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn store(&self, key: &str, bytes: &[u8]) -> StorageResult<String> {
        let mut blobs = self.blobs.lock().map_err(|_| StorageError::Poisoned)?;
        blobs.insert(key.to_string(), bytes.to_vec());
        Ok(key.to_string())
    }

    fn fetch(&self, locator: &str) -> StorageResult<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(blobs.get(locator).cloned())
    }

    fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let mut blobs = self.blobs.lock().map_err(|_| StorageError::Poisoned)?;
        let before = blobs.len();
        blobs.retain(|k, _| !k.starts_with(prefix));
        Ok(before - blobs.len())
    }
}

/// Blob store writing one file per key under a root directory.
///
/// The locator is the file name. Writes go to a temporary file first and
/// are renamed into place.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Opens (creating if needed) a blob directory.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "blob store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(key: &str) -> StorageResult<String> {
        if key.is_empty() {
            return Err(StorageError::InvalidData("empty blob key".into()));
        }
        Ok(key
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' => c,
                _ => '_',
            })
            .collect())
    }
}

impl BlobStore for FileBlobStore {
    fn store(&self, key: &str, bytes: &[u8]) -> StorageResult<String> {
        let name = Self::file_name(key)?;
        let tmp = self.root.join(format!(".{name}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, self.root.join(&name))?;
        Ok(name)
    }

    fn fetch(&self, locator: &str) -> StorageResult<Option<Vec<u8>>> {
        let name = Self::file_name(locator)?;
        match fs::read(self.root.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let prefix = Self::file_name(prefix)?;
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(file = name, error = %e, "blob delete failed");
                    return Err(e.into());
                }
            }
        }
        Ok(removed)
    }
}
