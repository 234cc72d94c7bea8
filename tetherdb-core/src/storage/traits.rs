// src/storage/traits.rs
//! Interface boundary to the storage substrate.
//!
//! Implementations model remote services: handles are shared (`&self`
//! methods, interior mutability where needed) and every call can fail with a
//! distinguishable kind — `BlobNotFound`, `PermissionDenied`,
//! `QuotaExceeded`, `InvalidFormat` or a generic `Io` error. Only the
//! transient kinds are retried, by [`super::retry::with_retries`].

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;

/// Descriptive metadata for a stored blob.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobMetadata {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub modified_time: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
    pub content_type: String,
}

/// Opaque key/blob store holding collection backing files.
pub trait BlobStorage: Send + Sync {
    /// Read and parse the blob's JSON content.
    fn read(&self, id: &str) -> Result<Value>;

    /// Overwrite an existing blob. Fails with `BlobNotFound` when the id is
    /// unknown.
    fn write(&self, id: &str, data: &Value) -> Result<()>;

    /// Create a new blob inside a container; returns the new opaque id.
    fn create(&self, name: &str, data: &Value, container_id: &str) -> Result<String>;

    /// Delete a blob; `false` when the id was already gone.
    fn delete(&self, id: &str) -> Result<bool>;

    fn exists(&self, id: &str) -> Result<bool>;

    fn get_metadata(&self, id: &str) -> Result<BlobMetadata>;
}

/// Small key/value store persisting the master index blob under a fixed key.
pub trait PropertiesStore: Send + Sync {
    fn get_property(&self, key: &str) -> Result<Option<String>>;

    fn set_property(&self, key: &str, value: &str) -> Result<()>;

    fn delete_property(&self, key: &str) -> Result<()>;
}
