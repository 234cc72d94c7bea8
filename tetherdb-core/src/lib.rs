// tetherdb-core/src/lib.rs
// Document store over a shared remote blob substrate.
//
// Multiple process instances open the same database concurrently; they share
// no memory, only the blob store (collection files) and a properties store
// (the master index). Mutual exclusion is advisory, enforced through
// per-collection locks persisted in the master index, with optimistic
// conflict detection via modification tokens.

pub mod collection;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod document;
pub mod error;
pub mod lock;
pub mod logging;
pub mod master_index;
pub mod metadata;
pub mod query;
pub mod storage;
pub mod update;
pub mod value_utils;

// Public exports
pub use collection::{Collection, DeleteResult, InsertManyResult, UpdateResult};
pub use config::{CoordinatorConfig, DatabaseConfig, ID_FIELD, MASTER_INDEX_KEY};
pub use coordinator::{CollectionCoordinator, CoordinatedState, CoordinationPhase};
pub use database::Database;
pub use document::Document;
pub use error::{Result, TetherDbError};
pub use lock::ProcessLock;
pub use logging::{log_level, set_log_level, LogLevel};
pub use master_index::{ConflictResolutionStrategy, MasterIndex, MetadataPatch};
pub use metadata::{CollectionMetadata, LockStatus};
pub use query::{filter_documents, matches_document, Query};
pub use storage::{
    BlobMetadata, BlobStorage, FileBlobStorage, FilePropertiesStore, MemoryBlobStorage,
    MemoryPropertiesStore, PropertiesStore, RetryPolicy,
};
pub use update::apply_operators;
