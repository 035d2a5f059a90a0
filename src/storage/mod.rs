//! Persistence layer.
//!
//! The engine talks to storage only through the byte-oriented
//! `PersistenceProvider` trait. Records are JSON; the typed helpers below
//! do the (de)serialisation so components never touch raw bytes.
//!
//! Writes are synchronous and treated as durable. Failures are surfaced
//! to the caller, never retried here.

pub mod file;
pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{RoundId, UserId};

pub use file::FileStore;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt record '{key}': {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid key '{0}'")]
    InvalidKey(String),
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Key/value durable storage.
///
/// `load` returns `Ok(None)` for a key that was never saved or has been
/// deleted. Deleting a missing key is not an error. Two distinct keys never
/// share a record; a key a provider cannot store faithfully is rejected
/// with `InvalidKey`.
#[cfg_attr(test, mockall::automock)]
pub trait PersistenceProvider: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Every stored key directly under `prefix` (which ends in `/`), sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

pub mod keys {
    use super::*;

    pub const CURRENT_ROUND: &str = "round/current";
    pub const ROUND_HISTORY: &str = "rounds/history";
    pub const ACCOUNT_INDEX: &str = "accounts/index";
    pub const BETS_PREFIX: &str = "bets/";

    pub fn bets(round_id: RoundId) -> String {
        format!("{BETS_PREFIX}{round_id}")
    }

    /// Round id of a `bets/{id}` key.
    pub fn bets_round(key: &str) -> Option<RoundId> {
        key.strip_prefix(BETS_PREFIX)?.parse().ok()
    }

    pub fn settlement(round_id: RoundId) -> String {
        format!("settlement/{round_id}")
    }

    pub fn account(user_id: &UserId) -> String {
        format!("account/{user_id}")
    }
}

// ---------------------------------------------------------------------------
// Typed helpers
// ---------------------------------------------------------------------------

/// Serialise a record to the bytes stored under `key`.
pub fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|source| StorageError::Codec {
        key: key.to_string(),
        source,
    })
}

/// Load and deserialise the record under `key`, if any.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn PersistenceProvider,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.load(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Codec {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Serialise and save a record under `key`.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn PersistenceProvider,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = encode(key, value)?;
    store.save(key, &bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;

    #[test]
    fn test_keys() {
        assert_eq!(keys::bets(12), "bets/12");
        assert_eq!(keys::settlement(3), "settlement/3");
        assert_eq!(keys::account(&"alice".to_string()), "account/alice");
        assert_eq!(keys::bets_round("bets/12"), Some(12));
        assert_eq!(keys::bets_round("bets/x"), None);
        assert_eq!(keys::bets_round("settlement/12"), None);
    }

    #[test]
    fn test_json_helpers_roundtrip_through_store() {
        let store = MemoryStore::new();
        save_json(&store, "colors", &vec![Color::Red, Color::Violet]).unwrap();
        let loaded: Option<Vec<Color>> = load_json(&store, "colors").unwrap();
        assert_eq!(loaded, Some(vec![Color::Red, Color::Violet]));
    }

    #[test]
    fn test_load_json_missing_is_none() {
        let store = MemoryStore::new();
        let loaded: Option<Vec<Color>> = load_json(&store, "nothing").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_json_corrupt_record() {
        let store = MemoryStore::new();
        store.save("bad", b"{not json").unwrap();
        let err = load_json::<Vec<Color>>(&store, "bad").unwrap_err();
        assert!(matches!(err, StorageError::Codec { ref key, .. } if key == "bad"));
    }

    #[test]
    fn test_save_json_surfaces_provider_failure() {
        let mut mock = MockPersistenceProvider::new();
        mock.expect_save()
            .returning(|_, _| Err(StorageError::Unavailable("disk full".into())));
        let err = save_json(&mock, "k", &1u32).unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }
}
