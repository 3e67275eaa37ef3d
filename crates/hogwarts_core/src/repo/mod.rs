//! Repository layer: single-store persistence.
//!
//! # Responsibility
//! - Define the `RecordStore` contract used by replication and resync.
//! - Isolate SQL details from cross-store orchestration.
//!
//! # Invariants
//! - Repository writes enforce `StudentRecord::validate()` before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `DuplicateId`) in
//!   addition to transport errors.

pub mod student_repo;
