//! In-memory store with switchable write failures for integration testing.
//!
//! Behaves like `MemoryStore` until told to fail. Failures can target every
//! write or only keys under a prefix, so a test can break exactly the record
//! a transition needs and then heal the store.

use std::sync::{Arc, Mutex};

use tiranga::storage::{MemoryStore, PersistenceProvider, StorageError};

#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    /// If set, saves and deletes of keys with this prefix fail.
    fail_prefix: Arc<Mutex<Option<String>>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write whose key starts with `prefix`.
    pub fn fail_writes_to(&self, prefix: &str) {
        *self.fail_prefix.lock().unwrap() = Some(prefix.to_string());
    }

    /// Fail every write.
    pub fn fail_all_writes(&self) {
        self.fail_writes_to("");
    }

    /// Clear any forced failure.
    pub fn heal(&self) {
        *self.fail_prefix.lock().unwrap() = None;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    fn check(&self, key: &str) -> Result<(), StorageError> {
        match self.fail_prefix.lock().unwrap().as_deref() {
            Some(prefix) if key.starts_with(prefix) => {
                Err(StorageError::Unavailable(format!("forced failure writing {key}")))
            }
            _ => Ok(()),
        }
    }
}

impl PersistenceProvider for FlakyStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.load(key)
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.check(key)?;
        self.inner.save(key, bytes)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check(key)?;
        self.inner.delete(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix)
    }
}
