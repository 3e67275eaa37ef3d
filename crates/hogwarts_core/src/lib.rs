//! Core engine for the Hogwarts student registry.
//!
//! One authoritative store, four house partition stores and one backup store
//! hold the same student records. This crate owns the invariants that keep
//! them aligned: write replication with compensation, partition-scoped id
//! allocation and one-way resynchronisation.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use config::{ConfigError, RegistryConfig, StoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::student::{House, StudentId, StudentRecord, StudentValidationError};
pub use repo::student_repo::{RecordStore, RepoError, RepoResult, SqlRecordStore};
pub use service::error::{ReplicationError, ReplicationResult};
pub use service::id_allocator::IdentifierAllocator;
pub use service::replication::{
    ReplicationCoordinator, ReplicationOutcome, ReplicationState, StoreWrite, WriteOperation,
    WriteStatus,
};
pub use service::resync::{missing_records, Resynchronizer, SyncReport, TargetSyncReport};
pub use store::connector::{ConnectError, SqliteConnector, StoreConnector, StoreHandle};
pub use store::registry::{
    EngineDialect, PartitionRegistry, RegistryError, StoreDescriptor, StoreRole, StoreSelector,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
