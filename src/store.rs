//! Key-value backends and the record layout on top of them
//!
//! A backend is any string-to-string map implementing [`KeyValueStore`].
//! [`StoreAdapter`] lays a [`Record`] out over four keys per digest:
//!
//! ```text
//! D                    -> payload
//! D_item_type          -> item type name
//! D_digest_version     -> digest scheme tag
//! D_external_string    -> canonical external properties, or "null"
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

pub const ITEM_TYPE_SUFFIX: &str = "_item_type";
pub const DIGEST_VERSION_SUFFIX: &str = "_digest_version";
pub const EXTERNAL_STRING_SUFFIX: &str = "_external_string";

/// Stored in the external slot when a record has no external properties
pub const NULL_MARKER: &str = "null";

/// Errors raised by a backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("backend error: {0}")]
    Other(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A synchronous string key-value map
pub trait KeyValueStore: Send + Sync {
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Returns `true` if the key existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Every key in the store. Only used for bulk operations.
    fn keys(&self) -> StoreResult<Vec<String>>;
}

/// `HashMap` behind an `RwLock`, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let map = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut map = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut map = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        Ok(map.remove(key).is_some())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let map = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for dyn KeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyValueStore")
    }
}

/// What is persisted per digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub payload: String,
    pub item_type: String,
    pub digest_version: String,
    pub external_string: String,
}

impl Record {
    pub fn has_external(&self) -> bool {
        self.external_string != NULL_MARKER && !self.external_string.is_empty()
    }
}

/// Record layout over a [`KeyValueStore`]
pub struct StoreAdapter<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> StoreAdapter<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    /// Write all four slots
    pub fn put(&self, druid: &str, record: &Record) -> StoreResult<()> {
        self.store.set(druid, &record.payload)?;
        self.put_metadata(druid, record)?;
        self.store
            .set(&slot(druid, EXTERNAL_STRING_SUFFIX), &record.external_string)
    }

    /// Write only the item type and digest version slots
    pub fn put_metadata(&self, druid: &str, record: &Record) -> StoreResult<()> {
        self.store.set(&slot(druid, ITEM_TYPE_SUFFIX), &record.item_type)?;
        self.store
            .set(&slot(druid, DIGEST_VERSION_SUFFIX), &record.digest_version)
    }

    pub fn payload(&self, druid: &str) -> StoreResult<Option<String>> {
        self.store.get(druid)
    }

    pub fn item_type(&self, druid: &str) -> StoreResult<Option<String>> {
        self.store.get(&slot(druid, ITEM_TYPE_SUFFIX))
    }

    pub fn digest_version(&self, druid: &str) -> StoreResult<Option<String>> {
        self.store.get(&slot(druid, DIGEST_VERSION_SUFFIX))
    }

    /// The external slot, with the "null" marker mapped to `None`
    pub fn external_string(&self, druid: &str) -> StoreResult<Option<String>> {
        Ok(self
            .store
            .get(&slot(druid, EXTERNAL_STRING_SUFFIX))?
            .filter(|s| s != NULL_MARKER && !s.is_empty()))
    }

    /// Remove a record and its metadata slots. Returns `true` if any slot existed.
    pub fn remove(&self, druid: &str) -> StoreResult<bool> {
        let mut removed = self.store.delete(druid)?;
        for suffix in [ITEM_TYPE_SUFFIX, DIGEST_VERSION_SUFFIX, EXTERNAL_STRING_SUFFIX] {
            removed |= self.store.delete(&slot(druid, suffix))?;
        }
        Ok(removed)
    }

    /// Digests that have an item type slot in this store
    pub fn druids(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_suffix(ITEM_TYPE_SUFFIX).map(str::to_string))
            .collect())
    }
}

fn slot(druid: &str, suffix: &str) -> String {
    format!("{druid}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record {
            payload: r#"{"name":"Pat"}"#.to_string(),
            item_type: "person".to_string(),
            digest_version: "sha256".to_string(),
            external_string: NULL_MARKER.to_string(),
        }
    }

    #[test]
    fn test_memory_store_crud() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_record_layout() {
        let store = MemoryStore::new();
        let adapter = StoreAdapter::new(&store);
        adapter.put("abc", &record()).unwrap();

        assert_eq!(
            store.keys().unwrap(),
            vec![
                "abc",
                "abc_digest_version",
                "abc_external_string",
                "abc_item_type"
            ]
        );
        assert_eq!(adapter.item_type("abc").unwrap().as_deref(), Some("person"));
        assert_eq!(adapter.external_string("abc").unwrap(), None);
        assert_eq!(adapter.druids().unwrap(), vec!["abc"]);
    }

    #[test]
    fn test_metadata_only_and_remove() {
        let store = MemoryStore::new();
        let adapter = StoreAdapter::new(&store);
        adapter.put_metadata("abc", &record()).unwrap();
        assert_eq!(adapter.payload("abc").unwrap(), None);
        assert_eq!(store.len(), 2);

        assert!(adapter.remove("abc").unwrap());
        assert!(store.is_empty());
        assert!(!adapter.remove("abc").unwrap());
    }
}
