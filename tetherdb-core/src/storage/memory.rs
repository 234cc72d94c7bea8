// src/storage/memory.rs
//! In-memory storage backends for tests.
//!
//! Both stores accept injected failures: the next call pops the front of the
//! failure queue and returns it instead of running. Coordination and retry
//! tests use this to simulate a flaky remote substrate.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use crate::error::{Result, TetherDbError};
use crate::storage::traits::{BlobMetadata, BlobStorage, PropertiesStore};

#[derive(Debug, Clone)]
struct StoredBlob {
    name: String,
    container_id: String,
    data: Value,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: Mutex<HashMap<String, StoredBlob>>,
    failures: Mutex<VecDeque<TetherDbError>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error to be returned by the next storage call.
    pub fn inject_failure(&self, err: TetherDbError) {
        self.failures.lock().push_back(err);
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().len()
    }

    /// Number of blobs created under a container.
    pub fn container_count(&self, container_id: &str) -> usize {
        self.blobs
            .lock()
            .values()
            .filter(|blob| blob.container_id == container_id)
            .count()
    }

    fn take_failure(&self) -> Result<()> {
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl BlobStorage for MemoryBlobStorage {
    fn read(&self, id: &str) -> Result<Value> {
        self.take_failure()?;
        self.blobs
            .lock()
            .get(id)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| TetherDbError::BlobNotFound(id.to_string()))
    }

    fn write(&self, id: &str, data: &Value) -> Result<()> {
        self.take_failure()?;
        let mut blobs = self.blobs.lock();
        let blob = blobs
            .get_mut(id)
            .ok_or_else(|| TetherDbError::BlobNotFound(id.to_string()))?;
        blob.data = data.clone();
        blob.modified = Utc::now();
        Ok(())
    }

    fn create(&self, name: &str, data: &Value, container_id: &str) -> Result<String> {
        self.take_failure()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.blobs.lock().insert(
            id.clone(),
            StoredBlob {
                name: name.to_string(),
                container_id: container_id.to_string(),
                data: data.clone(),
                created: now,
                modified: now,
            },
        );
        Ok(id)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.take_failure()?;
        Ok(self.blobs.lock().remove(id).is_some())
    }

    fn exists(&self, id: &str) -> Result<bool> {
        self.take_failure()?;
        Ok(self.blobs.lock().contains_key(id))
    }

    fn get_metadata(&self, id: &str) -> Result<BlobMetadata> {
        self.take_failure()?;
        let blobs = self.blobs.lock();
        let blob = blobs
            .get(id)
            .ok_or_else(|| TetherDbError::BlobNotFound(id.to_string()))?;
        let size = serde_json::to_vec(&blob.data).map(|bytes| bytes.len() as u64)?;
        Ok(BlobMetadata {
            id: id.to_string(),
            name: blob.name.clone(),
            size,
            modified_time: blob.modified,
            created_time: blob.created,
            content_type: "application/json".to_string(),
        })
    }
}

/// In-memory properties store.
#[derive(Default)]
pub struct MemoryPropertiesStore {
    properties: Mutex<HashMap<String, String>>,
    failures: Mutex<VecDeque<TetherDbError>>,
}

impl MemoryPropertiesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error to be returned by the next store call.
    pub fn inject_failure(&self, err: TetherDbError) {
        self.failures.lock().push_back(err);
    }

    fn take_failure(&self) -> Result<()> {
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl PropertiesStore for MemoryPropertiesStore {
    fn get_property(&self, key: &str) -> Result<Option<String>> {
        self.take_failure()?;
        Ok(self.properties.lock().get(key).cloned())
    }

    fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.take_failure()?;
        self.properties
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_property(&self, key: &str) -> Result<()> {
        self.take_failure()?;
        self.properties.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blob_lifecycle() {
        let storage = MemoryBlobStorage::new();
        let id = storage
            .create("orders.json", &json!({"documents": {}}), "root")
            .unwrap();

        assert!(storage.exists(&id).unwrap());
        assert_eq!(storage.read(&id).unwrap(), json!({"documents": {}}));

        storage.write(&id, &json!({"documents": {"a": 1}})).unwrap();
        assert_eq!(storage.read(&id).unwrap(), json!({"documents": {"a": 1}}));

        let meta = storage.get_metadata(&id).unwrap();
        assert_eq!(meta.name, "orders.json");
        assert_eq!(meta.content_type, "application/json");
        assert!(meta.size > 0);

        assert!(storage.delete(&id).unwrap());
        assert!(!storage.delete(&id).unwrap());
        assert!(!storage.exists(&id).unwrap());
    }

    #[test]
    fn test_read_unknown_blob_is_not_found() {
        let storage = MemoryBlobStorage::new();
        assert!(matches!(
            storage.read("missing"),
            Err(TetherDbError::BlobNotFound(_))
        ));
        assert!(matches!(
            storage.write("missing", &json!({})),
            Err(TetherDbError::BlobNotFound(_))
        ));
    }

    #[test]
    fn test_failure_injection_pops_in_order() {
        let storage = MemoryBlobStorage::new();
        let id = storage.create("a.json", &json!({}), "root").unwrap();

        storage.inject_failure(TetherDbError::QuotaExceeded("first".into()));
        assert!(matches!(
            storage.read(&id),
            Err(TetherDbError::QuotaExceeded(_))
        ));
        // Queue drained, next call succeeds
        assert!(storage.read(&id).is_ok());
    }

    #[test]
    fn test_properties_round_trip() {
        let store = MemoryPropertiesStore::new();
        assert_eq!(store.get_property("k").unwrap(), None);

        store.set_property("k", "v1").unwrap();
        assert_eq!(store.get_property("k").unwrap(), Some("v1".to_string()));

        store.set_property("k", "v2").unwrap();
        assert_eq!(store.get_property("k").unwrap(), Some("v2".to_string()));

        store.delete_property("k").unwrap();
        assert_eq!(store.get_property("k").unwrap(), None);
    }
}
