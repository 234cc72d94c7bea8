// src/coordinator.rs
//! Wraps one collection operation with cross-instance locking, conflict
//! detection and metadata persistence.
//!
//! Phase sequence per operation:
//! `Idle -> LockAcquiring -> ConflictChecking -> Executing ->
//! MetadataPersisting -> Idle`, with failure possible in any phase. The
//! collection lock is released in a final step no matter how the operation
//! ended; release failures are logged and swallowed so they never mask the
//! real outcome.
//!
//! Timeouts are advisory and post-hoc: a callback that finishes after the
//! budget still ran (its writes may have landed), but the caller gets a
//! `CoordinationTimeout` signalling that the result may not be trustworthy.
//! Semantics are at-least-once with possible apparent failure on success.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::error::{Result, TetherDbError};
use crate::master_index::{MasterIndex, MetadataPatch};
use crate::metadata::CollectionMetadata;
use crate::{log_debug, log_error, log_warn};

/// Where a coordinated operation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationPhase {
    Idle,
    LockAcquiring,
    ConflictChecking,
    Executing,
    MetadataPersisting,
    Failed,
}

impl std::fmt::Display for CoordinationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CoordinationPhase::Idle => "idle",
            CoordinationPhase::LockAcquiring => "lock acquisition",
            CoordinationPhase::ConflictChecking => "conflict check",
            CoordinationPhase::Executing => "execution",
            CoordinationPhase::MetadataPersisting => "metadata persistence",
            CoordinationPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Collection-side view the coordinator drives.
///
/// The collection exposes its cached metadata and a reload path; the
/// coordinator decides *when* to reload and what to commit.
pub trait CoordinatedState {
    /// Cached registry entry for this collection.
    fn metadata(&self) -> &CollectionMetadata;

    /// Cached modification token, if any.
    fn modification_token(&self) -> Option<&str>;

    /// Current number of documents.
    fn document_count(&self) -> u64;

    /// Re-read data and metadata from storage, discarding the cached view.
    fn reload(&mut self) -> Result<()>;

    /// Adopt the registry entry the coordinator just committed.
    fn apply_committed(&mut self, metadata: CollectionMetadata);
}

/// Per-collection operation coordinator.
pub struct CollectionCoordinator {
    collection_name: String,
    master_index: Arc<RwLock<MasterIndex>>,
    config: CoordinatorConfig,
}

impl CollectionCoordinator {
    pub fn new(
        collection_name: &str,
        master_index: Arc<RwLock<MasterIndex>>,
        config: CoordinatorConfig,
    ) -> Self {
        CollectionCoordinator {
            collection_name: collection_name.to_string(),
            master_index,
            config,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run `callback` as a coordinated mutation.
    ///
    /// Acquires the cross-instance lock with bounded backoff retries, reloads
    /// the collection when its cached token is stale, executes the callback,
    /// persists fresh metadata (registering the collection when the registry
    /// does not know it yet) and always releases the lock.
    pub fn coordinate<S, T, F>(&self, operation_name: &str, state: &mut S, callback: F) -> Result<T>
    where
        S: CoordinatedState,
        F: FnOnce(&mut S) -> Result<T>,
    {
        let operation_id = format!("op-{}", Uuid::new_v4());
        let started = Instant::now();
        let mut phase = CoordinationPhase::LockAcquiring;

        log_debug!(
            "{} on '{}' starting as {}",
            operation_name,
            self.collection_name,
            operation_id
        );

        if let Err(err) = self.acquire_lock_with_retries(&operation_id, started, state.metadata()) {
            log_error!(
                "{} ({}) on '{}' failed during {}: {}",
                operation_name,
                operation_id,
                self.collection_name,
                phase,
                err
            );
            return Err(err);
        }

        let outcome = self.run_locked(&operation_id, started, state, callback, &mut phase);

        // Final step, regardless of outcome: give the lock back. Failures
        // here must not mask the operation result.
        {
            let mut index = self.master_index.write();
            match index.release_collection_lock(&self.collection_name, &operation_id) {
                Ok(true) => {}
                Ok(false) => log_warn!(
                    "lock for '{}' was no longer held at release ({})",
                    self.collection_name,
                    operation_id
                ),
                Err(err) => log_warn!(
                    "failed to release lock for '{}' ({}): {}",
                    self.collection_name,
                    operation_id,
                    err
                ),
            }
        }

        match &outcome {
            Ok(_) => log_debug!(
                "{} ({}) on '{}' committed in {:?}",
                operation_name,
                operation_id,
                self.collection_name,
                started.elapsed()
            ),
            Err(err) => log_error!(
                "{} ({}) on '{}' failed during {}: {}",
                operation_name,
                operation_id,
                self.collection_name,
                phase,
                err
            ),
        }
        outcome
    }

    fn run_locked<S, T, F>(
        &self,
        operation_id: &str,
        started: Instant,
        state: &mut S,
        callback: F,
        phase: &mut CoordinationPhase,
    ) -> Result<T>
    where
        S: CoordinatedState,
        F: FnOnce(&mut S) -> Result<T>,
    {
        *phase = CoordinationPhase::ConflictChecking;
        let stale = {
            let mut index = self.master_index.write();
            index.has_conflict(&self.collection_name, state.modification_token())?
        };
        if stale {
            log_debug!(
                "stale metadata for '{}' ({}), reloading from storage",
                self.collection_name,
                operation_id
            );
            state.reload()?;
        }

        *phase = CoordinationPhase::Executing;
        let value = callback(state)?;

        if started.elapsed() > self.config.lock_timeout {
            return Err(TetherDbError::CoordinationTimeout(format!(
                "operation {} on '{}' exceeded its {:?} budget after execution; \
                 side effects may have been committed",
                operation_id, self.collection_name, self.config.lock_timeout
            )));
        }

        *phase = CoordinationPhase::MetadataPersisting;
        let mut index = self.master_index.write();
        index.refresh()?;
        if index.get_collection(&self.collection_name).is_none() {
            index.add_collection(state.metadata().clone())?;
        }
        let token = index.generate_modification_token();
        let committed = index.update_collection_metadata(
            &self.collection_name,
            &MetadataPatch {
                document_count: Some(state.document_count()),
                modification_token: Some(token),
                ..Default::default()
            },
        )?;
        state.apply_committed(committed);

        Ok(value)
    }

    /// Lock acquisition with bounded exponential backoff.
    ///
    /// Exceeding the overall deadline is a `CoordinationTimeout`; burning all
    /// attempts inside the deadline is a `LockAcquisitionFailure`. An
    /// unexpected (non-contention) error is not retried.
    fn acquire_lock_with_retries(
        &self,
        operation_id: &str,
        started: Instant,
        cached_metadata: &CollectionMetadata,
    ) -> Result<()> {
        // The lock lives inside the registry entry, so an unregistered
        // collection is registered from the cached metadata first.
        {
            let mut index = self.master_index.write();
            index.refresh()?;
            if index.get_collection(&self.collection_name).is_none() {
                index.add_collection(cached_metadata.clone())?;
            }
        }

        let attempts = self.config.retry_attempts.max(1);
        for attempt in 1..=attempts {
            if started.elapsed() >= self.config.lock_timeout {
                return Err(TetherDbError::CoordinationTimeout(format!(
                    "lock acquisition for '{}' exceeded {:?}",
                    self.collection_name, self.config.lock_timeout
                )));
            }

            let acquired = self.master_index.write().acquire_collection_lock(
                &self.collection_name,
                operation_id,
                self.config.lock_timeout,
            )?;
            if acquired {
                return Ok(());
            }

            if attempt < attempts {
                let delay = self.config.backoff_delay(attempt);
                let remaining = self.config.lock_timeout.saturating_sub(started.elapsed());
                log_debug!(
                    "lock on '{}' contended, attempt {}/{}, backing off {:?}",
                    self.collection_name,
                    attempt,
                    attempts,
                    delay
                );
                std::thread::sleep(delay.min(remaining));
            }
        }

        Err(TetherDbError::LockAcquisitionFailure {
            collection: self.collection_name.clone(),
            reason: format!("{} acquisition attempts exhausted", attempts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MASTER_INDEX_KEY;
    use crate::storage::MemoryPropertiesStore;
    use std::time::Duration;

    struct TestState {
        metadata: CollectionMetadata,
        documents: u64,
        reload_count: u32,
    }

    impl TestState {
        fn new(name: &str) -> Self {
            TestState {
                metadata: CollectionMetadata::new(name, "file-1").unwrap(),
                documents: 0,
                reload_count: 0,
            }
        }
    }

    impl CoordinatedState for TestState {
        fn metadata(&self) -> &CollectionMetadata {
            &self.metadata
        }

        fn modification_token(&self) -> Option<&str> {
            self.metadata.modification_token.as_deref()
        }

        fn document_count(&self) -> u64 {
            self.documents
        }

        fn reload(&mut self) -> Result<()> {
            self.reload_count += 1;
            Ok(())
        }

        fn apply_committed(&mut self, metadata: CollectionMetadata) {
            self.metadata = metadata;
        }
    }

    fn setup(config: CoordinatorConfig) -> (Arc<RwLock<MasterIndex>>, CollectionCoordinator) {
        let store = Arc::new(MemoryPropertiesStore::new());
        let index = Arc::new(RwLock::new(
            MasterIndex::load(store, MASTER_INDEX_KEY).unwrap(),
        ));
        let coordinator = CollectionCoordinator::new("orders", index.clone(), config);
        (index, coordinator)
    }

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            lock_timeout: Duration::from_millis(500),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(5),
            backoff_base: 2.0,
        }
    }

    #[test]
    fn test_successful_operation_commits_metadata() {
        let (index, coordinator) = setup(fast_config());
        let mut state = TestState::new("orders");

        let result = coordinator
            .coordinate("insertOne", &mut state, |s| {
                s.documents += 1;
                Ok("inserted")
            })
            .unwrap();

        assert_eq!(result, "inserted");
        assert_eq!(state.documents, 1);
        // Committed entry adopted, token assigned
        assert!(state.metadata.modification_token.is_some());
        assert_eq!(state.metadata.document_count, 1);

        // Registry agrees and the lock is gone
        let mut guard = index.write();
        guard.refresh().unwrap();
        let entry = guard.get_collection("orders").unwrap();
        assert_eq!(entry.document_count, 1);
        assert_eq!(
            entry.modification_token,
            state.metadata.modification_token
        );
        drop(guard);
        assert!(!index.write().is_collection_locked("orders").unwrap());
    }

    #[test]
    fn test_token_rotates_on_every_commit() {
        let (_index, coordinator) = setup(fast_config());
        let mut state = TestState::new("orders");

        coordinator
            .coordinate("insertOne", &mut state, |_| Ok(()))
            .unwrap();
        let first = state.metadata.modification_token.clone();

        coordinator
            .coordinate("updateOne", &mut state, |_| Ok(()))
            .unwrap();
        let second = state.metadata.modification_token.clone();

        assert!(first.is_some());
        assert!(second.is_some());
        assert_ne!(first, second);
    }

    #[test]
    fn test_matching_token_skips_reload() {
        let (_index, coordinator) = setup(fast_config());
        let mut state = TestState::new("orders");

        coordinator
            .coordinate("insertOne", &mut state, |_| Ok(()))
            .unwrap();
        coordinator
            .coordinate("updateOne", &mut state, |_| Ok(()))
            .unwrap();

        // Token matched the registry both times; no reload happened
        assert_eq!(state.reload_count, 0);
    }

    #[test]
    fn test_conflict_triggers_reload_before_callback() {
        let (index, coordinator) = setup(fast_config());
        let mut state = TestState::new("orders");
        coordinator
            .coordinate("insertOne", &mut state, |_| Ok(()))
            .unwrap();
        let reloads_before = state.reload_count;
        let token_before = state.metadata.modification_token.clone();

        // Another instance commits behind our back
        index
            .write()
            .update_collection_metadata(
                "orders",
                &MetadataPatch {
                    modification_token: Some("tok-foreign".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        coordinator
            .coordinate("updateOne", &mut state, |_| Ok(()))
            .unwrap();

        assert_eq!(state.reload_count, reloads_before + 1);
        // And after commit the token moved past both the foreign one and ours
        let after = state.metadata.modification_token.clone().unwrap();
        assert_ne!(Some(after.as_str()), token_before.as_deref());
        assert_ne!(after, "tok-foreign");
    }

    #[test]
    fn test_contended_lock_exhausts_retries() {
        let (index, coordinator) = setup(fast_config());
        let mut state = TestState::new("orders");
        // Seed the registry entry, then hold the lock as a foreign operation
        coordinator
            .coordinate("insertOne", &mut state, |_| Ok(()))
            .unwrap();
        assert!(index
            .write()
            .acquire_collection_lock("orders", "op-foreign", Duration::from_secs(30))
            .unwrap());

        let result = coordinator.coordinate("updateOne", &mut state, |_| Ok(()));
        match result {
            Err(TetherDbError::LockAcquisitionFailure { collection, .. }) => {
                assert_eq!(collection, "orders");
            }
            other => panic!("expected LockAcquisitionFailure, got {:?}", other),
        }

        // The foreign holder keeps the lock; the failed attempt must not
        // have stolen or released it
        assert!(index.write().is_collection_locked("orders").unwrap());
    }

    #[test]
    fn test_acquisition_deadline_is_coordination_timeout() {
        let config = CoordinatorConfig {
            lock_timeout: Duration::from_millis(30),
            retry_attempts: 100,
            retry_delay: Duration::from_millis(20),
            backoff_base: 1.0,
        };
        let (index, coordinator) = setup(config);
        let mut state = TestState::new("orders");
        coordinator
            .coordinate("insertOne", &mut state, |_| Ok(()))
            .unwrap();
        assert!(index
            .write()
            .acquire_collection_lock("orders", "op-foreign", Duration::from_secs(30))
            .unwrap());

        let result = coordinator.coordinate("updateOne", &mut state, |_| Ok(()));
        assert!(matches!(
            result,
            Err(TetherDbError::CoordinationTimeout(_))
        ));
    }

    #[test]
    fn test_post_hoc_timeout_after_callback_ran() {
        let config = CoordinatorConfig {
            lock_timeout: Duration::from_millis(20),
            retry_attempts: 2,
            retry_delay: Duration::from_millis(1),
            backoff_base: 2.0,
        };
        let (index, coordinator) = setup(config);
        let mut state = TestState::new("orders");

        let result = coordinator.coordinate("updateMany", &mut state, |s| {
            s.documents = 9;
            std::thread::sleep(Duration::from_millis(60));
            Ok(())
        });

        // The callback ran (side effects stand) but the caller sees a timeout
        assert!(matches!(
            result,
            Err(TetherDbError::CoordinationTimeout(_))
        ));
        assert_eq!(state.documents, 9);
        // Lock still released
        assert!(!index.write().is_collection_locked("orders").unwrap());
    }

    #[test]
    fn test_callback_error_propagates_and_releases_lock() {
        let (index, coordinator) = setup(fast_config());
        let mut state = TestState::new("orders");

        let result: Result<()> = coordinator.coordinate("updateOne", &mut state, |_| {
            Err(TetherDbError::InvalidQuery("$bogus".to_string()))
        });

        assert!(matches!(result, Err(TetherDbError::InvalidQuery(_))));
        assert!(!index.write().is_collection_locked("orders").unwrap());
        // Failed operation must not rotate the committed token
        let mut guard = index.write();
        guard.refresh().unwrap();
        assert_eq!(
            guard.get_collection("orders").unwrap().modification_token,
            None
        );
    }

    #[test]
    fn test_unknown_collection_is_registered() {
        let (index, coordinator) = setup(fast_config());
        let mut state = TestState::new("orders");

        assert!(index.write().get_collection("orders").is_none());
        coordinator
            .coordinate("insertOne", &mut state, |_| Ok(()))
            .unwrap();

        let mut guard = index.write();
        guard.refresh().unwrap();
        assert!(guard.get_collection("orders").is_some());
    }
}
