//! Partition-scoped student id allocation.
//!
//! # Responsibility
//! - Mint `<PREFIX><5-digit counter>` ids, one counter per house.
//! - Seed each counter lazily from the house's partition store.
//!
//! # Invariants
//! - Each counter is seeded at most once per allocator instance.
//! - Ids handed out by one allocator never repeat.
//! - Nothing coordinates two processes sharing the same stores; their ids can
//!   collide and surface as `DuplicateIdentifier` on insert.

use crate::model::student::{House, StudentId};
use crate::repo::student_repo::RecordStore;
use crate::store::registry::PartitionRegistry;
use log::{debug, warn};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct IdentifierAllocator<S: RecordStore> {
    store: Arc<S>,
    registry: Arc<PartitionRegistry>,
    counters: [OnceCell<AtomicU64>; House::ALL.len()],
}

impl<S: RecordStore> IdentifierAllocator<S> {
    pub fn new(store: Arc<S>, registry: Arc<PartitionRegistry>) -> Self {
        Self {
            store,
            registry,
            counters: Default::default(),
        }
    }

    /// Issues the next id for `house`.
    ///
    /// Blocks on the first call per house while the partition store is scanned.
    pub fn next_id(&self, house: House) -> StudentId {
        let value = self.counter(house).fetch_add(1, Ordering::SeqCst) + 1;
        StudentId::sequential(house, value)
    }

    /// Last value handed out (or seeded) for `house`.
    pub fn current(&self, house: House) -> u64 {
        self.counter(house).load(Ordering::SeqCst)
    }

    /// Seeds `house` without scanning. Returns `false` if it was already seeded.
    pub fn preseed(&self, house: House, value: u64) -> bool {
        self.counters[house.index()]
            .set(AtomicU64::new(value))
            .is_ok()
    }

    fn counter(&self, house: House) -> &AtomicU64 {
        self.counters[house.index()].get_or_init(|| AtomicU64::new(self.scan_seed(house)))
    }

    fn scan_seed(&self, house: House) -> u64 {
        let partition = self.registry.partition_store(house);
        match self.store.max_sequence(partition, house) {
            Ok(highest) => {
                let seed = highest.unwrap_or(0);
                debug!(
                    "event=id_seed module=allocator status=ok house={house} seed={seed}"
                );
                seed
            }
            Err(err) => {
                warn!(
                    "event=id_seed module=allocator status=error house={house} seed=0 error={err}"
                );
                0
            }
        }
    }
}
