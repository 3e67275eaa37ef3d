#![allow(dead_code)]

use hogwarts_core::db::DbError;
use hogwarts_core::{
    House, PartitionRegistry, RecordStore, RegistryConfig, RepoError, RepoResult, SqlRecordStore,
    StoreDescriptor, StoreRole, StudentId, StudentRecord,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Six SQLite stores under a temp directory, removed on drop.
pub struct Layout {
    _dir: TempDir,
    pub registry: Arc<PartitionRegistry>,
}

pub fn layout() -> Layout {
    let dir = tempfile::tempdir().unwrap();
    let registry =
        PartitionRegistry::from_config(&RegistryConfig::local_layout(dir.path())).unwrap();
    Layout {
        _dir: dir,
        registry: Arc::new(registry),
    }
}

impl Layout {
    pub fn store(&self, role: StoreRole) -> &StoreDescriptor {
        self.registry.select(role)
    }

    pub fn ids(&self, store: &impl RecordStore, role: StoreRole) -> Vec<String> {
        store
            .list(self.store(role))
            .unwrap()
            .iter()
            .filter_map(StudentRecord::id)
            .map(|id| id.as_str().to_string())
            .collect()
    }

    pub fn seed(&self, store: &impl RecordStore, role: StoreRole, record: &StudentRecord) {
        store.insert(self.store(role), record).unwrap();
    }
}

pub fn student(first: &str, last: &str, year: i64, house: &str) -> StudentRecord {
    StudentRecord::new(first, last, year, house, None).unwrap()
}

pub fn student_with_id(house: House, n: u64, first: &str) -> StudentRecord {
    StudentRecord::with_id(
        StudentId::sequential(house, n),
        first,
        "Student",
        4,
        house,
        None,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Insert,
    Update,
    Delete,
}

/// Real SQLite store that fails or stalls chosen `(role, op)` pairs on demand.
pub struct FaultyStore {
    inner: SqlRecordStore,
    faults: Mutex<HashSet<(StoreRole, Op)>>,
    delays: Mutex<HashMap<(StoreRole, Op), Duration>>,
    calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: SqlRecordStore::sqlite(),
            faults: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(self, role: StoreRole, op: Op) -> Self {
        self.fail(role, op);
        self
    }

    pub fn fail(&self, role: StoreRole, op: Op) {
        self.faults.lock().unwrap().insert((role, op));
    }

    /// Sleeps `delay` before running `op` on `role`.
    pub fn stalling(self, role: StoreRole, op: Op, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert((role, op), delay);
        self
    }

    pub fn heal(&self) {
        self.faults.lock().unwrap().clear();
    }

    pub fn inner(&self) -> &SqlRecordStore {
        &self.inner
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, store: &StoreDescriptor, op: Op) -> RepoResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(&(store.role, op)).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.faults.lock().unwrap().contains(&(store.role, op)) {
            return Err(RepoError::Db(DbError::Sqlite(
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
                    Some(format!("injected {op:?} failure on {}", store.role)),
                ),
            )));
        }
        Ok(())
    }
}

impl RecordStore for FaultyStore {
    fn list(&self, store: &StoreDescriptor) -> RepoResult<Vec<StudentRecord>> {
        self.check(store, Op::List)?;
        self.inner.list(store)
    }

    fn insert(&self, store: &StoreDescriptor, record: &StudentRecord) -> RepoResult<()> {
        self.check(store, Op::Insert)?;
        self.inner.insert(store, record)
    }

    fn update(
        &self,
        store: &StoreDescriptor,
        id: &StudentId,
        record: &StudentRecord,
    ) -> RepoResult<()> {
        self.check(store, Op::Update)?;
        self.inner.update(store, id, record)
    }

    fn delete(&self, store: &StoreDescriptor, id: &StudentId) -> RepoResult<StudentRecord> {
        self.check(store, Op::Delete)?;
        self.inner.delete(store, id)
    }
}
