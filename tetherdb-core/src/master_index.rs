// src/master_index.rs
//! The shared registry of collections: existence, file location, metadata and
//! per-collection locks.
//!
//! One `MasterIndex` instance exists per process, but all instances share the
//! same persisted blob (a JSON mapping of collection name to metadata stored
//! under one properties key). Every mutating call is a read-modify-write of
//! the whole blob, so each mutator refreshes from the store first and
//! persists afterwards; the in-memory view is only ever a cache.
//!
//! Locking here is advisory, best-effort mutual exclusion: the properties
//! store offers no compare-and-swap, so acquisition writes the claim and then
//! re-reads to verify the claim survived. A lock held past its lease is
//! considered stale and may be reclaimed.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Result, TetherDbError};
use crate::metadata::CollectionMetadata;
use crate::storage::{with_retries, PropertiesStore, RetryPolicy};
use crate::{log_debug, log_warn};

/// How token divergence is repaired. Only last-write-wins is supported;
/// anything else fails hard at the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolutionStrategy {
    LastWriteWins,
}

impl FromStr for ConflictResolutionStrategy {
    type Err = TetherDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LAST_WRITE_WINS" => Ok(ConflictResolutionStrategy::LastWriteWins),
            other => Err(TetherDbError::ModificationConflict(format!(
                "Unsupported conflict resolution strategy: {}",
                other
            ))),
        }
    }
}

/// Partial update applied to a collection's registry entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    pub document_count: Option<u64>,
    pub modification_token: Option<String>,
    pub file_id: Option<String>,
}

/// Process-local handle over the shared collection registry.
pub struct MasterIndex {
    store: Arc<dyn PropertiesStore>,
    key: String,
    retry: RetryPolicy,
    collections: BTreeMap<String, CollectionMetadata>,
}

impl MasterIndex {
    /// Load the registry from the properties store. A missing property is an
    /// empty registry; corrupted JSON is a hard `MasterIndexError`.
    pub fn load(store: Arc<dyn PropertiesStore>, key: &str) -> Result<Self> {
        let mut index = MasterIndex {
            store,
            key: key.to_string(),
            retry: RetryPolicy::default(),
            collections: BTreeMap::new(),
        };
        index.refresh()?;
        Ok(index)
    }

    /// Re-read the persisted registry, replacing the in-memory view.
    pub fn refresh(&mut self) -> Result<()> {
        let raw = with_retries(&self.retry, "master index read", || {
            self.store.get_property(&self.key)
        })
        .map_err(|e| {
            TetherDbError::MasterIndexError(format!("failed to read master index: {}", e))
        })?;

        self.collections = match raw {
            None => BTreeMap::new(),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                TetherDbError::MasterIndexError(format!("corrupted master index blob: {}", e))
            })?,
        };
        Ok(())
    }

    /// Persist the whole registry blob back to the store.
    fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.collections).map_err(|e| {
            TetherDbError::MasterIndexError(format!("failed to serialize master index: {}", e))
        })?;
        with_retries(&self.retry, "master index write", || {
            self.store.set_property(&self.key, &raw)
        })
        .map_err(|e| {
            TetherDbError::MasterIndexError(format!("failed to persist master index: {}", e))
        })
    }

    /// Register (or overwrite) a collection entry.
    pub fn add_collection(&mut self, metadata: CollectionMetadata) -> Result<()> {
        self.refresh()?;
        if self.collections.contains_key(&metadata.name) {
            log_debug!("overwriting master index entry for '{}'", metadata.name);
        }
        self.collections.insert(metadata.name.clone(), metadata);
        self.persist()
    }

    /// Current in-memory view of one collection. Call [`refresh`] first when
    /// staleness matters.
    ///
    /// [`refresh`]: MasterIndex::refresh
    pub fn get_collection(&self, name: &str) -> Option<&CollectionMetadata> {
        self.collections.get(name)
    }

    /// Current in-memory view of all collections.
    pub fn get_collections(&self) -> &BTreeMap<String, CollectionMetadata> {
        &self.collections
    }

    /// Remove a collection entry; `false` when it was not registered.
    pub fn remove_collection(&mut self, name: &str) -> Result<bool> {
        self.refresh()?;
        let removed = self.collections.remove(name).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Apply a partial update to a collection entry and persist.
    pub fn update_collection_metadata(
        &mut self,
        name: &str,
        patch: &MetadataPatch,
    ) -> Result<CollectionMetadata> {
        self.refresh()?;
        let entry = self
            .collections
            .get_mut(name)
            .ok_or_else(|| TetherDbError::CollectionNotFound(name.to_string()))?;

        if let Some(count) = patch.document_count {
            entry.document_count = count;
        }
        if let Some(token) = &patch.modification_token {
            entry.modification_token = Some(token.clone());
        }
        if let Some(file_id) = &patch.file_id {
            entry.file_id = file_id.clone();
        }
        entry.touch();

        let updated = entry.clone();
        self.persist()?;
        Ok(updated)
    }

    /// Fresh opaque token; unique across rapid successive calls.
    pub fn generate_modification_token(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Whether the persisted token for `name` differs from `expected`.
    pub fn has_conflict(&mut self, name: &str, expected: Option<&str>) -> Result<bool> {
        self.refresh()?;
        let persisted = self
            .collections
            .get(name)
            .and_then(|meta| meta.modification_token.as_deref());
        Ok(persisted != expected)
    }

    /// Repair divergent metadata. Last-write-wins overwrites the entry with
    /// the caller's fields and regenerates the modification token.
    pub fn resolve_conflict(
        &mut self,
        name: &str,
        patch: &MetadataPatch,
        strategy: ConflictResolutionStrategy,
    ) -> Result<CollectionMetadata> {
        match strategy {
            ConflictResolutionStrategy::LastWriteWins => {
                let token = self.generate_modification_token();
                let mut winning = patch.clone();
                winning.modification_token = Some(token);
                self.update_collection_metadata(name, &winning)
            }
        }
    }

    // ========================================================================
    // CROSS-INSTANCE LOCKING
    // ========================================================================

    /// Try to take the collection lock for one operation.
    ///
    /// Decides against the *persisted* state, not the cached view, and
    /// re-reads after writing the claim to verify it survived a concurrent
    /// writer. Stale locks (lease expired) are reclaimed with a warning.
    pub fn acquire_collection_lock(
        &mut self,
        name: &str,
        operation_id: &str,
        timeout: Duration,
    ) -> Result<bool> {
        self.refresh()?;
        let now = Utc::now();

        let entry = self
            .collections
            .get_mut(name)
            .ok_or_else(|| TetherDbError::CollectionNotFound(name.to_string()))?;

        match entry.lock_holder(now) {
            Some(holder) if holder == operation_id => return Ok(true),
            Some(_) => return Ok(false),
            None => {
                if let Some(status) = &entry.lock_status {
                    if status.is_locked && status.is_expired(now) {
                        log_warn!(
                            "reclaiming stale lock on '{}' held by {:?}",
                            name,
                            status.locked_by
                        );
                    }
                }
            }
        }

        entry.lock(operation_id, timeout);
        self.persist()?;

        // No compare-and-swap below us: verify our claim survived.
        self.refresh()?;
        let holds = self
            .collections
            .get(name)
            .map(|meta| meta.lock_holder(Utc::now()) == Some(operation_id))
            .unwrap_or(false);
        Ok(holds)
    }

    /// Release the collection lock if `operation_id` still holds it.
    pub fn release_collection_lock(&mut self, name: &str, operation_id: &str) -> Result<bool> {
        self.refresh()?;
        let now = Utc::now();

        let entry = match self.collections.get_mut(name) {
            Some(entry) => entry,
            None => {
                log_warn!("release of lock on unknown collection '{}'", name);
                return Ok(false);
            }
        };

        let holder = entry.lock_holder(now).map(str::to_string);
        match holder {
            Some(holder) if holder == operation_id => {
                entry.unlock();
                self.persist()?;
                Ok(true)
            }
            Some(holder) => {
                log_warn!(
                    "lock on '{}' is held by {}, not by releasing operation {}",
                    name,
                    holder,
                    operation_id
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Whether an unexpired lock is currently held, per the persisted state.
    pub fn is_collection_locked(&mut self, name: &str) -> Result<bool> {
        self.refresh()?;
        Ok(self
            .collections
            .get(name)
            .map(|meta| meta.is_locked(Utc::now()))
            .unwrap_or(false))
    }
}
