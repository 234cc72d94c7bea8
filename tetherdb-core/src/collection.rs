// src/collection.rs
//! Collection facade: CRUD orchestration over the coordinator.
//!
//! A collection's backing blob holds `{"documents": {...}, "metadata": {...}}`.
//! Documents are cached in memory in insertion order and loaded lazily; every
//! mutating operation runs inside [`CollectionCoordinator::coordinate`] so it
//! is serialized against other instances and commits fresh registry metadata.
//! Read operations skip the lock but re-validate the cached view against the
//! registry's modification token first.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::config::CoordinatorConfig;
use crate::coordinator::{CollectionCoordinator, CoordinatedState};
use crate::document::Document;
use crate::error::{Result, TetherDbError};
use crate::log_debug;
use crate::master_index::MasterIndex;
use crate::metadata::CollectionMetadata;
use crate::query::{filter_documents, matches_document};
use crate::storage::{with_retries, BlobStorage, RetryPolicy};
use crate::update::apply_operators;

pub(crate) const DOCUMENTS_FIELD: &str = "documents";
pub(crate) const METADATA_FIELD: &str = "metadata";

/// Outcome of an update operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Outcome of a delete operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Outcome of an insert_many operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<String>,
}

/// The collection's loaded state; what the coordinator drives.
pub struct CollectionData {
    metadata: CollectionMetadata,
    documents: Vec<Document>,
    storage: Arc<dyn BlobStorage>,
    retry: RetryPolicy,
    loaded: bool,
}

impl CollectionData {
    fn new(metadata: CollectionMetadata, storage: Arc<dyn BlobStorage>) -> Self {
        CollectionData {
            metadata,
            documents: Vec::new(),
            storage,
            retry: RetryPolicy::default(),
            loaded: false,
        }
    }

    fn ensure_loaded(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        self.load()
    }

    /// Read documents and metadata from the backing blob.
    fn load(&mut self) -> Result<()> {
        let file_id = self.metadata.file_id.clone();
        let payload = with_retries(&self.retry, "collection read", || {
            self.storage.read(&file_id)
        })?;

        let root = payload.as_object().ok_or_else(|| {
            TetherDbError::InvalidFormat(format!(
                "collection file '{}' is not a JSON object",
                file_id
            ))
        })?;

        let raw_documents = root
            .get(DOCUMENTS_FIELD)
            .and_then(Value::as_object)
            .ok_or_else(|| {
                TetherDbError::InvalidFormat(format!(
                    "collection file '{}' has no '{}' mapping",
                    file_id, DOCUMENTS_FIELD
                ))
            })?;

        let mut documents = Vec::with_capacity(raw_documents.len());
        for (id, value) in raw_documents {
            let document = Document::from_value(value.clone()).map_err(|e| {
                TetherDbError::InvalidFormat(format!(
                    "document '{}' in collection file '{}': {}",
                    id, file_id, e
                ))
            })?;
            documents.push(document);
        }

        // A freshly created blob may carry a null metadata snapshot; keep the
        // registry-provided metadata in that case.
        let mut metadata: CollectionMetadata = match root.get(METADATA_FIELD) {
            None | Some(Value::Null) => self.metadata.clone(),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                TetherDbError::InvalidFormat(format!(
                    "metadata in collection file '{}': {}",
                    file_id, e
                ))
            })?,
        };

        metadata.document_count = documents.len() as u64;
        self.documents = documents;
        self.metadata = metadata;
        self.loaded = true;
        Ok(())
    }

    /// Write documents and metadata back to the backing blob.
    fn save(&mut self) -> Result<()> {
        let mut by_id = Map::new();
        for document in &self.documents {
            let id = document.id().ok_or_else(|| {
                TetherDbError::InvalidArgument(
                    "cannot persist a document without an _id".to_string(),
                )
            })?;
            by_id.insert(id.to_string(), document.to_value());
        }

        let mut payload = Map::new();
        payload.insert(DOCUMENTS_FIELD.to_string(), Value::Object(by_id));
        payload.insert(
            METADATA_FIELD.to_string(),
            serde_json::to_value(&self.metadata)?,
        );
        let payload = Value::Object(payload);

        let file_id = self.metadata.file_id.clone();
        with_retries(&self.retry, "collection write", || {
            self.storage.write(&file_id, &payload)
        })
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.documents
            .iter()
            .position(|doc| doc.id() == Some(id))
    }

    fn documents(&self) -> &[Document] {
        &self.documents
    }
}

impl CoordinatedState for CollectionData {
    fn metadata(&self) -> &CollectionMetadata {
        &self.metadata
    }

    fn modification_token(&self) -> Option<&str> {
        self.metadata.modification_token.as_deref()
    }

    fn document_count(&self) -> u64 {
        self.documents.len() as u64
    }

    fn reload(&mut self) -> Result<()> {
        log_debug!("reloading collection '{}' from storage", self.metadata.name);
        self.load()
    }

    fn apply_committed(&mut self, metadata: CollectionMetadata) {
        self.metadata = metadata;
    }
}

/// A named collection handle.
pub struct Collection {
    data: CollectionData,
    coordinator: CollectionCoordinator,
    master_index: Arc<RwLock<MasterIndex>>,
}

impl Collection {
    pub(crate) fn new(
        metadata: CollectionMetadata,
        storage: Arc<dyn BlobStorage>,
        master_index: Arc<RwLock<MasterIndex>>,
        config: CoordinatorConfig,
    ) -> Self {
        let coordinator = CollectionCoordinator::new(&metadata.name, master_index.clone(), config);
        Collection {
            data: CollectionData::new(metadata, storage),
            coordinator,
            master_index,
        }
    }

    pub fn name(&self) -> &str {
        &self.data.metadata.name
    }

    pub fn metadata(&self) -> &CollectionMetadata {
        &self.data.metadata
    }

    pub fn modification_token(&self) -> Option<&str> {
        self.data.modification_token()
    }

    /// Load-on-demand plus staleness re-validation for the read path. Reads
    /// never take the cross-instance lock.
    fn refresh_for_read(&mut self) -> Result<()> {
        self.data.ensure_loaded()?;
        let stale = self
            .master_index
            .write()
            .has_conflict(self.coordinator.collection_name(), self.data.modification_token())?;
        if stale {
            self.data.reload()?;
        }
        Ok(())
    }

    // ========================================================================
    // READ OPERATIONS
    // ========================================================================

    /// All documents matching the query, in storage order.
    pub fn find(&mut self, query: &Value) -> Result<Vec<Document>> {
        self.refresh_for_read()?;
        filter_documents(self.data.documents(), query)
    }

    /// First document matching the query.
    pub fn find_one(&mut self, query: &Value) -> Result<Option<Document>> {
        self.refresh_for_read()?;
        for document in self.data.documents() {
            if matches_document(document, query)? {
                return Ok(Some(document.clone()));
            }
        }
        Ok(None)
    }

    /// Number of documents matching the query.
    pub fn count_documents(&mut self, query: &Value) -> Result<u64> {
        self.refresh_for_read()?;
        if query.as_object().map(Map::is_empty).unwrap_or(false) {
            return Ok(self.data.documents().len() as u64);
        }
        let mut count = 0;
        for document in self.data.documents() {
            if matches_document(document, query)? {
                count += 1;
            }
        }
        Ok(count)
    }

    // ========================================================================
    // WRITE OPERATIONS (coordinated)
    // ========================================================================

    /// Insert one document; assigns a UUID `_id` when absent. Returns the
    /// stored document.
    pub fn insert_one(&mut self, document: Value) -> Result<Document> {
        self.coordinator
            .coordinate("insertOne", &mut self.data, move |data| {
                data.ensure_loaded()?;
                let mut document = Document::from_value(document)?;
                let id = document.ensure_id()?;
                if data.position_of(&id).is_some() {
                    return Err(TetherDbError::DocumentExists(id));
                }
                data.documents.push(document.clone());
                data.metadata.set_document_count(data.documents.len() as u64);
                data.save()?;
                Ok(document)
            })
    }

    /// Insert a batch; all-or-nothing within this instance (validation runs
    /// before anything is stored).
    pub fn insert_many(&mut self, documents: Vec<Value>) -> Result<InsertManyResult> {
        if documents.is_empty() {
            return Err(TetherDbError::InvalidArgument(
                "insert_many requires at least one document".to_string(),
            ));
        }
        self.coordinator
            .coordinate("insertMany", &mut self.data, move |data| {
                data.ensure_loaded()?;

                let mut prepared = Vec::with_capacity(documents.len());
                let mut inserted_ids = Vec::with_capacity(documents.len());
                for value in documents {
                    let mut document = Document::from_value(value)?;
                    let id = document.ensure_id()?;
                    if data.position_of(&id).is_some() || inserted_ids.contains(&id) {
                        return Err(TetherDbError::DocumentExists(id));
                    }
                    inserted_ids.push(id);
                    prepared.push(document);
                }

                data.documents.extend(prepared);
                data.metadata.set_document_count(data.documents.len() as u64);
                data.save()?;
                Ok(InsertManyResult { inserted_ids })
            })
    }

    /// Apply update operators to the first matching document.
    pub fn update_one(&mut self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.coordinator
            .coordinate("updateOne", &mut self.data, |data| {
                data.ensure_loaded()?;

                let position = {
                    let mut found = None;
                    for (index, document) in data.documents.iter().enumerate() {
                        if matches_document(document, filter)? {
                            found = Some(index);
                            break;
                        }
                    }
                    found
                };

                let index = match position {
                    Some(index) => index,
                    None => return Ok(UpdateResult::default()),
                };

                let updated = apply_operators(&data.documents[index], update)?;
                let modified = updated != data.documents[index];
                if modified {
                    data.documents[index] = updated;
                    data.metadata.touch();
                    data.save()?;
                }
                Ok(UpdateResult {
                    matched_count: 1,
                    modified_count: modified as u64,
                })
            })
    }

    /// Apply update operators to every matching document.
    pub fn update_many(&mut self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.coordinator
            .coordinate("updateMany", &mut self.data, |data| {
                data.ensure_loaded()?;

                let mut matched = 0;
                let mut modified = 0;
                let mut replacements: Vec<(usize, Document)> = Vec::new();

                for (index, document) in data.documents.iter().enumerate() {
                    if !matches_document(document, filter)? {
                        continue;
                    }
                    matched += 1;
                    let updated = apply_operators(document, update)?;
                    if updated != *document {
                        modified += 1;
                        replacements.push((index, updated));
                    }
                }

                if !replacements.is_empty() {
                    for (index, updated) in replacements {
                        data.documents[index] = updated;
                    }
                    data.metadata.touch();
                    data.save()?;
                }

                Ok(UpdateResult {
                    matched_count: matched,
                    modified_count: modified,
                })
            })
    }

    /// Replace the first matching document wholesale, keeping its `_id`.
    pub fn replace_one(&mut self, filter: &Value, replacement: Value) -> Result<UpdateResult> {
        let replacement_map = match replacement {
            Value::Object(map) => map,
            other => {
                return Err(TetherDbError::InvalidArgument(format!(
                    "Replacement must be a JSON object, got {}",
                    other
                )))
            }
        };
        if let Some(key) = replacement_map.keys().find(|key| key.starts_with('$')) {
            return Err(TetherDbError::InvalidArgument(format!(
                "Replacement documents may not contain operators ({})",
                key
            )));
        }

        self.coordinator
            .coordinate("replaceOne", &mut self.data, move |data| {
                data.ensure_loaded()?;

                let position = {
                    let mut found = None;
                    for (index, document) in data.documents.iter().enumerate() {
                        if matches_document(document, filter)? {
                            found = Some(index);
                            break;
                        }
                    }
                    found
                };

                let index = match position {
                    Some(index) => index,
                    None => return Ok(UpdateResult::default()),
                };

                let existing_id = data.documents[index]
                    .id()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        TetherDbError::InvalidArgument(
                            "stored document has no _id".to_string(),
                        )
                    })?;

                if let Some(Value::String(new_id)) = replacement_map.get(crate::config::ID_FIELD) {
                    if *new_id != existing_id {
                        return Err(TetherDbError::InvalidArgument(
                            "Replacement _id must match the existing document".to_string(),
                        ));
                    }
                }

                let mut replacement = Document::from_value(Value::Object(replacement_map))?;
                replacement.set(crate::config::ID_FIELD, Value::String(existing_id));

                let modified = replacement != data.documents[index];
                if modified {
                    data.documents[index] = replacement;
                    data.metadata.touch();
                    data.save()?;
                }
                Ok(UpdateResult {
                    matched_count: 1,
                    modified_count: modified as u64,
                })
            })
    }

    /// Delete the first matching document.
    pub fn delete_one(&mut self, filter: &Value) -> Result<DeleteResult> {
        self.coordinator
            .coordinate("deleteOne", &mut self.data, |data| {
                data.ensure_loaded()?;

                let position = {
                    let mut found = None;
                    for (index, document) in data.documents.iter().enumerate() {
                        if matches_document(document, filter)? {
                            found = Some(index);
                            break;
                        }
                    }
                    found
                };

                match position {
                    None => Ok(DeleteResult::default()),
                    Some(index) => {
                        data.documents.remove(index);
                        data.metadata.set_document_count(data.documents.len() as u64);
                        data.save()?;
                        Ok(DeleteResult { deleted_count: 1 })
                    }
                }
            })
    }

    /// Delete every matching document.
    pub fn delete_many(&mut self, filter: &Value) -> Result<DeleteResult> {
        self.coordinator
            .coordinate("deleteMany", &mut self.data, |data| {
                data.ensure_loaded()?;

                let mut keep = Vec::with_capacity(data.documents.len());
                for document in &data.documents {
                    keep.push(!matches_document(document, filter)?);
                }

                let deleted = keep.iter().filter(|retain| !**retain).count() as u64;
                if deleted > 0 {
                    let mut keep_flags = keep.into_iter();
                    data.documents.retain(|_| keep_flags.next().unwrap_or(true));
                    data.metadata.set_document_count(data.documents.len() as u64);
                    data.save()?;
                }
                Ok(DeleteResult {
                    deleted_count: deleted,
                })
            })
    }
}
