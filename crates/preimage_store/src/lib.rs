//! Hash-to-preimage storage.
//!
//! This crate provides the key-value stores that back the NMT preimage
//! relation and the stub DA path:
//! - [`MemoryStore`]: concurrent in-memory map
//! - [`SledStore`]: persistent store backed by sled
//! - [`FileStore`]: one file per key, written via temp file + rename
//!
//! All stores report a missing key as [`StoreError::NotFound`], distinct
//! from I/O or database failures.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::trace;

/// A 32-byte hash key.
pub type Hash32 = [u8; 32];

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("preimage not found: {}", hex::encode(.0))]
    NotFound(Hash32),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Whether this error only means the key is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Hash arbitrary bytes with SHA-256.
pub fn hash_bytes(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// A hash-keyed preimage store, safe to share across concurrent callers.
pub trait PreimageStore: Send + Sync {
    /// Store `preimage` under `hash`.
    fn put(&self, hash: &Hash32, preimage: &[u8]) -> Result<(), StoreError>;

    /// Fetch the preimage stored under `hash`.
    fn get(&self, hash: &Hash32) -> Result<Vec<u8>, StoreError>;

    /// Fetch a preimage, mapping absence to `None`.
    fn try_get(&self, hash: &Hash32) -> Result<Option<Vec<u8>>, StoreError> {
        match self.get(hash) {
            Ok(data) => Ok(Some(data)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store data under its own SHA-256 hash and return the key.
    fn put_content(&self, data: &[u8]) -> Result<Hash32, StoreError> {
        let key = hash_bytes(data);
        self.put(&key, data)?;
        Ok(key)
    }

    /// Make previous writes durable.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Hash32, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored preimages.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a preimage, returning it if present.
    pub fn remove(&self, hash: &Hash32) -> Result<Option<Vec<u8>>, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.remove(hash))
    }
}

impl PreimageStore for MemoryStore {
    fn put(&self, hash: &Hash32, preimage: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(*hash, preimage.to_vec());
        Ok(())
    }

    fn get(&self, hash: &Hash32) -> Result<Vec<u8>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        entries.get(hash).cloned().ok_or(StoreError::NotFound(*hash))
    }
}

/// Persistent store backed by sled.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Create a temporary store (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl PreimageStore for SledStore {
    fn put(&self, hash: &Hash32, preimage: &[u8]) -> Result<(), StoreError> {
        self.db.insert(hash, preimage)?;
        Ok(())
    }

    fn get(&self, hash: &Hash32) -> Result<Vec<u8>, StoreError> {
        self.db
            .get(hash)?
            .map(|v| v.to_vec())
            .ok_or(StoreError::NotFound(*hash))
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Directory-backed store with one file per key, named by the hex key.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `data_dir`, creating the directory if needed.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    /// Directory the store writes into.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, hash: &Hash32) -> PathBuf {
        self.data_dir.join(hex::encode(hash))
    }
}

impl PreimageStore for FileStore {
    fn put(&self, hash: &Hash32, preimage: &[u8]) -> Result<(), StoreError> {
        let final_path = self.path_for(hash);
        trace!(key = %hex::encode(hash), dir = %self.data_dir.display(), "FileStore::put");

        // Readers never observe a partially written file.
        let mut file = tempfile::NamedTempFile::new_in(&self.data_dir)?;
        file.write_all(preimage)?;
        file.as_file().sync_all()?;
        file.persist(&final_path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn get(&self, hash: &Hash32) -> Result<Vec<u8>, StoreError> {
        trace!(key = %hex::encode(hash), dir = %self.data_dir.display(), "FileStore::get");
        match fs::read(self.path_for(hash)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(*hash)),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn exercise(store: &dyn PreimageStore) {
        let key = hash_bytes(b"preimage");
        assert!(store.get(&key).unwrap_err().is_not_found());
        assert_eq!(store.try_get(&key).unwrap(), None);

        store.put(&key, b"preimage").unwrap();
        assert_eq!(store.get(&key).unwrap(), b"preimage".to_vec());

        // Overwrite is idempotent for content-addressed data.
        store.put(&key, b"preimage").unwrap();
        assert_eq!(store.try_get(&key).unwrap(), Some(b"preimage".to_vec()));

        let content_key = store.put_content(b"other").unwrap();
        assert_eq!(content_key, hash_bytes(b"other"));
        assert_eq!(store.get(&content_key).unwrap(), b"other".to_vec());
        store.flush().unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        exercise(&store);
        assert_eq!(store.len(), 2);

        let key = hash_bytes(b"other");
        assert!(store.remove(&key).unwrap().is_some());
        assert!(store.get(&key).unwrap_err().is_not_found());
    }

    #[test]
    fn test_sled_store() {
        let store = SledStore::in_memory().unwrap();
        exercise(&store);
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("daroot")).unwrap();
        exercise(&store);

        let key = hash_bytes(b"preimage");
        let on_disk = fs::read(store.data_dir().join(hex::encode(key))).unwrap();
        assert_eq!(on_disk, b"preimage".to_vec());

        // Only the two final files remain; temp files were renamed away.
        assert_eq!(fs::read_dir(store.data_dir()).unwrap().count(), 2);
    }

    #[test]
    fn test_file_store_io_error_is_not_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = hash_bytes(b"dir");
        // A directory where a file is expected is an I/O failure, not absence.
        fs::create_dir(dir.path().join(hex::encode(key))).unwrap();
        let err = store.get(&key).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn test_memory_store_concurrent_access() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.put_content(&[i; 16]).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 8);
    }

    #[test]
    fn test_sled_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = {
            let store = SledStore::open(dir.path().join("db")).unwrap();
            let key = store.put_content(b"durable").unwrap();
            store.flush().unwrap();
            key
        };
        let store = SledStore::open(dir.path().join("db")).unwrap();
        assert_eq!(store.get(&key).unwrap(), b"durable".to_vec());
    }
}
