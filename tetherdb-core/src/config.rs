// src/config.rs
//! Configuration for the database facade and the coordination layer.
//!
//! All configuration is an immutable snapshot taken at construction time.
//! Changing a knob means building a new config value and constructing a new
//! `Database`/`CollectionCoordinator` with it; nothing reads mutable global
//! state after construction.

use std::time::Duration;

/// Fixed properties-store key under which the master index blob is persisted.
pub const MASTER_INDEX_KEY: &str = "tetherdb.master_index";

/// The immutable document identity field.
pub const ID_FIELD: &str = "_id";

/// Retry and timeout policy for one coordinated operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Maximum time to wait for the cross-instance collection lock. The same
    /// duration doubles as the soft ceiling for total operation execution.
    pub lock_timeout: Duration,
    /// Maximum number of lock-acquisition attempts.
    pub retry_attempts: u32,
    /// Delay before the second acquisition attempt; subsequent attempts wait
    /// `retry_delay * backoff_base^(attempt-1)`.
    pub retry_delay: Duration,
    /// Exponential backoff base.
    pub backoff_base: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            lock_timeout: Duration::from_secs(10),
            retry_attempts: 5,
            retry_delay: Duration::from_millis(100),
            backoff_base: 2.0,
        }
    }
}

impl CoordinatorConfig {
    /// Backoff delay before the attempt *after* `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_base.powi(attempt.saturating_sub(1) as i32);
        self.retry_delay.mul_f64(factor)
    }
}

/// Database-level configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// Container (folder) id under which collection blobs are created.
    pub root_container_id: String,
    /// Properties-store key holding the master index blob.
    pub master_index_key: String,
    /// Create collections on first access instead of failing.
    pub auto_create_collections: bool,
    /// Timeout for the process-local advisory lock guarding facade-level
    /// master index mutations within one process.
    pub script_lock_timeout: Duration,
    /// Coordination policy applied to every collection of this database.
    pub coordinator: CoordinatorConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            root_container_id: "tetherdb".to_string(),
            master_index_key: MASTER_INDEX_KEY.to_string(),
            auto_create_collections: true,
            script_lock_timeout: Duration::from_secs(5),
            coordinator: CoordinatorConfig::default(),
        }
    }
}
