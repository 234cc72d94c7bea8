// src/database.rs
//! Database facade: opens the master index and hands out collection handles.
//!
//! All dependencies are constructor-injected; there is no ambient global
//! state. Facade-level registry mutations (create/drop) are serialized within
//! the process by a [`ProcessLock`]; cross-instance safety still comes from
//! the master index's read-modify-write discipline and the per-collection
//! locks.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::collection::{Collection, DOCUMENTS_FIELD, METADATA_FIELD};
use crate::config::DatabaseConfig;
use crate::error::{Result, TetherDbError};
use crate::lock::ProcessLock;
use crate::log_warn;
use crate::master_index::MasterIndex;
use crate::metadata::CollectionMetadata;
use crate::storage::{with_retries, BlobStorage, PropertiesStore, RetryPolicy};

/// Handle to one logical database over a shared storage substrate.
pub struct Database {
    config: DatabaseConfig,
    blob_storage: Arc<dyn BlobStorage>,
    master_index: Arc<RwLock<MasterIndex>>,
    script_lock: ProcessLock,
    retry: RetryPolicy,
}

impl Database {
    /// Open the database: loads (or initializes) the master index from the
    /// properties store.
    pub fn open(
        config: DatabaseConfig,
        blob_storage: Arc<dyn BlobStorage>,
        properties: Arc<dyn PropertiesStore>,
    ) -> Result<Self> {
        let master_index = MasterIndex::load(properties, &config.master_index_key)?;
        Ok(Database {
            config,
            blob_storage,
            master_index: Arc::new(RwLock::new(master_index)),
            script_lock: ProcessLock::new(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Get a collection handle, creating the collection on first access when
    /// `auto_create_collections` is set.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        validate_collection_name(name)?;
        let _guard = self.script_lock.acquire(self.config.script_lock_timeout)?;

        let mut index = self.master_index.write();
        index.refresh()?;
        if let Some(entry) = index.get_collection(name) {
            let metadata = entry.clone();
            drop(index);
            return Ok(self.attach(metadata));
        }

        if !self.config.auto_create_collections {
            return Err(TetherDbError::CollectionNotFound(name.to_string()));
        }

        let metadata = self.create_backing_blob(name)?;
        index.add_collection(metadata.clone())?;
        drop(index);
        Ok(self.attach(metadata))
    }

    /// Create a collection; fails when it already exists.
    pub fn create_collection(&self, name: &str) -> Result<Collection> {
        validate_collection_name(name)?;
        let _guard = self.script_lock.acquire(self.config.script_lock_timeout)?;

        let mut index = self.master_index.write();
        index.refresh()?;
        if index.get_collection(name).is_some() {
            return Err(TetherDbError::CollectionExists(name.to_string()));
        }

        let metadata = self.create_backing_blob(name)?;
        index.add_collection(metadata.clone())?;
        drop(index);
        Ok(self.attach(metadata))
    }

    /// Drop a collection: delete its backing blob and registry entry.
    /// `false` when the collection was not registered.
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        validate_collection_name(name)?;
        let _guard = self.script_lock.acquire(self.config.script_lock_timeout)?;

        let mut index = self.master_index.write();
        index.refresh()?;
        let file_id = match index.get_collection(name) {
            Some(entry) => entry.file_id.clone(),
            None => return Ok(false),
        };

        match self.blob_storage.delete(&file_id) {
            Ok(_) => {}
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                // Best effort: a transient delete failure must not leave the
                // registry pointing at a dropped collection.
                log_warn!("failed to delete blob '{}' for '{}': {}", file_id, name, err);
            }
        }

        index.remove_collection(name)
    }

    /// Names of all registered collections, freshly read from the store.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut index = self.master_index.write();
        index.refresh()?;
        Ok(index.get_collections().keys().cloned().collect())
    }

    pub fn collection_exists(&self, name: &str) -> Result<bool> {
        let mut index = self.master_index.write();
        index.refresh()?;
        Ok(index.get_collection(name).is_some())
    }

    fn attach(&self, metadata: CollectionMetadata) -> Collection {
        Collection::new(
            metadata,
            self.blob_storage.clone(),
            self.master_index.clone(),
            self.config.coordinator.clone(),
        )
    }

    /// Create the collection's backing blob and its registry metadata.
    fn create_backing_blob(&self, name: &str) -> Result<CollectionMetadata> {
        let file_name = format!("{}.json", name);
        let skeleton = collection_payload(Value::Null);

        let file_id = with_retries(&self.retry, "collection create", || {
            self.blob_storage
                .create(&file_name, &skeleton, &self.config.root_container_id)
        })?;

        let metadata = CollectionMetadata::new(name, &file_id)?;

        // Second pass: embed the metadata snapshot now that the id is known.
        let payload = collection_payload(serde_json::to_value(&metadata)?);
        with_retries(&self.retry, "collection initialize", || {
            self.blob_storage.write(&file_id, &payload)
        })?;

        Ok(metadata)
    }
}

fn collection_payload(metadata: Value) -> Value {
    let mut payload = Map::new();
    payload.insert(DOCUMENTS_FIELD.to_string(), Value::Object(Map::new()));
    payload.insert(METADATA_FIELD.to_string(), metadata);
    Value::Object(payload)
}

fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TetherDbError::InvalidArgument(
            "Collection name must not be empty".to_string(),
        ));
    }
    if name.contains('/') || name.contains('.') {
        return Err(TetherDbError::InvalidArgument(format!(
            "Collection name '{}' contains reserved characters",
            name
        )));
    }
    Ok(())
}
