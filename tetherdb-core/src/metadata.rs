// src/metadata.rs
//! Per-collection bookkeeping persisted inside the master index.
//!
//! Field names serialize in camelCase because the master index blob is shared
//! with every instance that opens the database; the wire names are part of
//! the format.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TetherDbError};

/// Cross-instance lock state embedded in a collection's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub is_locked: bool,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    /// Lease length in milliseconds; a lock held longer than this is stale
    /// and may be reclaimed.
    pub lock_timeout: Option<u64>,
}

impl LockStatus {
    pub fn unlocked() -> Self {
        LockStatus {
            is_locked: false,
            locked_by: None,
            locked_at: None,
            lock_timeout: None,
        }
    }

    pub fn held_by(holder: &str, timeout: Duration) -> Self {
        LockStatus {
            is_locked: true,
            locked_by: Some(holder.to_string()),
            locked_at: Some(Utc::now()),
            lock_timeout: Some(timeout.as_millis() as u64),
        }
    }

    /// Whether the lock lease has run out as of `now`. An unlocked status or
    /// one without a lease never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if !self.is_locked {
            return false;
        }
        match (self.locked_at, self.lock_timeout) {
            (Some(locked_at), Some(timeout_ms)) => {
                now - locked_at > ChronoDuration::milliseconds(timeout_ms as i64)
            }
            _ => false,
        }
    }
}

/// Value object for one collection's registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMetadata {
    pub name: String,
    pub file_id: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub document_count: u64,
    pub modification_token: Option<String>,
    pub lock_status: Option<LockStatus>,
}

impl CollectionMetadata {
    /// Construct a fresh entry. `name` and `file_id` must be non-empty.
    pub fn new(name: &str, file_id: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(TetherDbError::InvalidArgument(
                "Collection name must not be empty".to_string(),
            ));
        }
        if file_id.is_empty() {
            return Err(TetherDbError::InvalidArgument(
                "Collection file id must not be empty".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(CollectionMetadata {
            name: name.to_string(),
            file_id: file_id.to_string(),
            created: now,
            last_updated: now,
            document_count: 0,
            modification_token: None,
            lock_status: None,
        })
    }

    /// Bump the last-updated timestamp.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn set_document_count(&mut self, count: u64) {
        self.document_count = count;
        self.touch();
    }

    pub fn set_modification_token(&mut self, token: Option<String>) {
        self.modification_token = token;
        self.touch();
    }

    /// Whether an unexpired lock is held as of `now`.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_status
            .as_ref()
            .map(|status| status.is_locked && !status.is_expired(now))
            .unwrap_or(false)
    }

    /// Current unexpired lock holder, if any.
    pub fn lock_holder(&self, now: DateTime<Utc>) -> Option<&str> {
        self.lock_status.as_ref().and_then(|status| {
            if status.is_locked && !status.is_expired(now) {
                status.locked_by.as_deref()
            } else {
                None
            }
        })
    }

    pub fn lock(&mut self, holder: &str, timeout: Duration) {
        self.lock_status = Some(LockStatus::held_by(holder, timeout));
    }

    pub fn unlock(&mut self) {
        self.lock_status = Some(LockStatus::unlocked());
    }
}
