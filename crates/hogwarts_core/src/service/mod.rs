//! Cross-store use-case services.
//!
//! # Responsibility
//! - Replicate logical writes across authoritative, partition and backup stores.
//! - Reconcile drifted slaves from the authoritative store.
//! - Mint partition-scoped student ids.
//!
//! # Invariants
//! - Store calls run on tokio's blocking pool; callers are never blocked.
//! - The only shared mutable state is the allocator's per-house counters.

pub mod error;
pub mod id_allocator;
pub mod replication;
pub mod resync;
mod tasks;
