//! Async adapters that move blocking store calls onto tokio's worker pool.

use crate::model::student::{StudentId, StudentRecord};
use crate::repo::student_repo::{RecordStore, RepoResult};
use crate::service::error::{ReplicationError, ReplicationResult};
use crate::store::registry::StoreDescriptor;
use std::future::Future;
use std::sync::Arc;

/// Runs `task` on the shared blocking pool.
pub(crate) async fn run_blocking<T, F>(task: F) -> ReplicationResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| ReplicationError::Worker(err.to_string()))
}

/// Runs `write` as its own tokio task and waits for it.
///
/// The task keeps going if the caller's future is dropped, so a write that
/// already reached the authoritative store still fans out or compensates.
pub(crate) async fn detach<T, F>(write: F) -> ReplicationResult<T>
where
    F: Future<Output = ReplicationResult<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(write)
        .await
        .map_err(|err| ReplicationError::Worker(err.to_string()))?
}

/// Shared handle that exposes each `RecordStore` call as a future.
pub(crate) struct StoreTasks<S> {
    store: Arc<S>,
}

impl<S> Clone for StoreTasks<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RecordStore + 'static> StoreTasks<S> {
    pub(crate) fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn call<T, F>(&self, descriptor: &StoreDescriptor, op: F) -> ReplicationResult<T>
    where
        F: FnOnce(&S, &StoreDescriptor) -> RepoResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let descriptor = descriptor.clone();
        run_blocking(move || op(store.as_ref(), &descriptor))
            .await?
            .map_err(ReplicationError::from)
    }

    pub(crate) async fn list(
        &self,
        descriptor: &StoreDescriptor,
    ) -> ReplicationResult<Vec<StudentRecord>> {
        self.call(descriptor, |store, descriptor| store.list(descriptor))
            .await
    }

    pub(crate) async fn insert(
        &self,
        descriptor: &StoreDescriptor,
        record: &StudentRecord,
    ) -> ReplicationResult<()> {
        let record = record.clone();
        self.call(descriptor, move |store, descriptor| {
            store.insert(descriptor, &record)
        })
        .await
    }

    pub(crate) async fn update(
        &self,
        descriptor: &StoreDescriptor,
        id: &StudentId,
        record: &StudentRecord,
    ) -> ReplicationResult<()> {
        let id = id.clone();
        let record = record.clone();
        self.call(descriptor, move |store, descriptor| {
            store.update(descriptor, &id, &record)
        })
        .await
    }

    pub(crate) async fn delete(
        &self,
        descriptor: &StoreDescriptor,
        id: &StudentId,
    ) -> ReplicationResult<StudentRecord> {
        let id = id.clone();
        self.call(descriptor, move |store, descriptor| store.delete(descriptor, &id))
            .await
    }
}
