//! Three-store write replication with compensation.
//!
//! # Responsibility
//! - Apply one logical create/update/delete to the authoritative store, the
//!   record's partition store and the backup store.
//! - Undo partially applied creates/deletes when a slave write fails.
//!
//! # Invariants
//! - Create/delete touch slaves only after the authoritative write committed.
//! - Partition and backup writes run concurrently and are joined before any
//!   consistency decision.
//! - A failed compensation always ends in `Inconsistent` and surfaces as
//!   `ReplicationError::CompensationFailure`.
//! - Update writes all three stores at once and never compensates.
//!
//! This is best-effort propagation, not a distributed transaction: between
//! the authoritative commit and the end of compensation, readers of the
//! individual stores can observe divergence.

use crate::model::student::{House, StudentId, StudentRecord, StudentValidationError};
use crate::repo::student_repo::RecordStore;
use crate::service::error::{ReplicationError, ReplicationResult};
use crate::service::id_allocator::IdentifierAllocator;
use crate::service::tasks::{detach, run_blocking, StoreTasks};
use crate::store::registry::{PartitionRegistry, StoreRole, StoreSelector};
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Coordinator state machine.
///
/// `INIT -> AUTHORITATIVE_WRITTEN -> SLAVES_SYNCING -> CONSISTENT`, or
/// `... -> COMPENSATING -> COMPENSATED | INCONSISTENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationState {
    Init,
    AuthoritativeWritten,
    SlavesSyncing,
    Consistent,
    Compensating,
    Compensated,
    Inconsistent,
}

impl ReplicationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Consistent | Self::Compensated | Self::Inconsistent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    Create,
    Update,
    Delete,
}

impl Display for WriteOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// What happened to one store during a logical write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    NotAttempted,
    Applied,
    Failed(String),
    /// Applied, then undone by compensation.
    Compensated,
    /// Applied, and the undo failed; the store still carries the write.
    CompensationFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreWrite {
    pub role: StoreRole,
    pub status: WriteStatus,
}

impl StoreWrite {
    fn new(role: StoreRole) -> Self {
        Self {
            role,
            status: WriteStatus::NotAttempted,
        }
    }

    fn record<T>(&mut self, result: &ReplicationResult<T>) {
        self.status = match result {
            Ok(_) => WriteStatus::Applied,
            Err(err) => WriteStatus::Failed(err.to_string()),
        };
    }

    pub fn is_applied(&self) -> bool {
        self.status == WriteStatus::Applied
    }
}

/// Per-operation record of which stores were written and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationOutcome {
    pub operation: WriteOperation,
    pub id: StudentId,
    pub state: ReplicationState,
    pub authoritative: StoreWrite,
    pub partition: StoreWrite,
    pub backup: StoreWrite,
}

impl ReplicationOutcome {
    fn new(operation: WriteOperation, id: StudentId, house: House) -> Self {
        Self {
            operation,
            id,
            state: ReplicationState::Init,
            authoritative: StoreWrite::new(StoreRole::Authoritative),
            partition: StoreWrite::new(StoreRole::Partition(house)),
            backup: StoreWrite::new(StoreRole::Backup),
        }
    }

    pub fn stores(&self) -> [&StoreWrite; 3] {
        [&self.authoritative, &self.partition, &self.backup]
    }

    /// Stores whose write failed outright.
    pub fn failed_roles(&self) -> Vec<StoreRole> {
        self.roles_where(|status| matches!(status, WriteStatus::Failed(_)))
    }

    /// Stores that differ from the pre-operation state and were not undone.
    pub fn diverged_roles(&self) -> Vec<StoreRole> {
        self.roles_where(|status| {
            matches!(
                status,
                WriteStatus::Applied | WriteStatus::CompensationFailed(_)
            )
        })
    }

    fn roles_where(&self, predicate: impl Fn(&WriteStatus) -> bool) -> Vec<StoreRole> {
        self.stores()
            .into_iter()
            .filter(|write| predicate(&write.status))
            .map(|write| write.role)
            .collect()
    }

    fn applied_roles(&self) -> Vec<StoreRole> {
        self.roles_where(|status| *status == WriteStatus::Applied)
    }

    fn write_mut(&mut self, role: StoreRole) -> &mut StoreWrite {
        match role {
            StoreRole::Authoritative => &mut self.authoritative,
            StoreRole::Backup => &mut self.backup,
            StoreRole::Partition(_) => &mut self.partition,
        }
    }

    fn transition(&mut self, next: ReplicationState) {
        debug!(
            "event=replication_state module=replication op={} id={} from={:?} to={:?}",
            self.operation, self.id, self.state, next
        );
        self.state = next;
    }
}

/// Undo action applied to every store that already took the write.
enum Compensation {
    Delete(StudentId),
    Reinsert(StudentRecord),
}

/// Orchestrates logical writes across authoritative, partition and backup stores.
///
/// Every write runs in its own tokio task once validation and id allocation
/// are done. Dropping the returned future does not stop it: the fan-out and
/// any compensation still run, and only the result is lost to the caller.
pub struct ReplicationCoordinator<S: RecordStore + 'static> {
    pipeline: WritePipeline<S>,
    allocator: Arc<IdentifierAllocator<S>>,
}

impl<S: RecordStore + 'static> ReplicationCoordinator<S> {
    pub fn new(store: Arc<S>, registry: Arc<PartitionRegistry>) -> Self {
        let allocator = Arc::new(IdentifierAllocator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
        ));
        Self::with_allocator(store, registry, allocator)
    }

    pub fn with_allocator(
        store: Arc<S>,
        registry: Arc<PartitionRegistry>,
        allocator: Arc<IdentifierAllocator<S>>,
    ) -> Self {
        Self {
            pipeline: WritePipeline {
                tasks: StoreTasks::new(store),
                registry,
            },
            allocator,
        }
    }

    pub fn allocator(&self) -> &IdentifierAllocator<S> {
        &self.allocator
    }

    pub fn registry(&self) -> &PartitionRegistry {
        &self.pipeline.registry
    }

    /// Reads every record of one store.
    pub async fn list_records(
        &self,
        selector: StoreSelector,
    ) -> ReplicationResult<Vec<StudentRecord>> {
        let pipeline = &self.pipeline;
        pipeline.tasks.list(pipeline.registry.select(selector)).await
    }

    /// Creates `record` in all three stores, minting an id if it has none.
    ///
    /// # Errors
    /// - `ConstraintViolation` before anything is written.
    /// - Authoritative failure (`Connectivity`, `DuplicateIdentifier`, `Store`):
    ///   nothing was written.
    /// - `PartialReplication`: a slave failed and the record was removed again
    ///   everywhere.
    /// - `CompensationFailure`: the record is left in a subset of stores.
    pub async fn create_record(&self, mut record: StudentRecord) -> ReplicationResult<StudentId> {
        record.validate()?;
        if record.id().is_none() {
            let allocator = Arc::clone(&self.allocator);
            let house = record.house;
            let id = run_blocking(move || allocator.next_id(house)).await?;
            record.assign_id(id)?;
        }

        let pipeline = self.pipeline.clone();
        detach(async move { pipeline.create(record).await }).await
    }

    /// Deletes the record with `record`'s id from all three stores.
    ///
    /// Only the id and house of `record` are used. On a partial slave failure,
    /// the row as it was stored in the authoritative store is re-inserted
    /// wherever it was already removed.
    pub async fn delete_record(&self, record: &StudentRecord) -> ReplicationResult<()> {
        record.validate()?;
        let id = record.require_id()?.clone();
        let house = record.house;

        let pipeline = self.pipeline.clone();
        detach(async move { pipeline.delete(id, house).await }).await
    }

    /// Updates record `id` in all three stores concurrently.
    ///
    /// There is no authoritative-first gate and no compensation: a partial
    /// failure is reported with the stores that did change, and left for a
    /// retry or an operator. The house cannot change, since it is encoded in
    /// the id prefix.
    pub async fn update_record(
        &self,
        id: &StudentId,
        record: &StudentRecord,
    ) -> ReplicationResult<()> {
        let mut record = record.clone();
        match record.id() {
            Some(found) if found != id => {
                return Err(StudentValidationError::IdMismatch {
                    expected: id.clone(),
                    found: found.clone(),
                }
                .into());
            }
            Some(_) => {}
            None => record.assign_id(id.clone())?,
        }
        record.validate()?;

        let pipeline = self.pipeline.clone();
        let id = id.clone();
        detach(async move { pipeline.update(id, record).await }).await
    }
}

/// Owned handles for one logical write; moved into the task that runs it.
struct WritePipeline<S: RecordStore + 'static> {
    tasks: StoreTasks<S>,
    registry: Arc<PartitionRegistry>,
}

impl<S: RecordStore + 'static> Clone for WritePipeline<S> {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S: RecordStore + 'static> WritePipeline<S> {
    async fn create(&self, record: StudentRecord) -> ReplicationResult<StudentId> {
        let id = record.require_id()?.clone();
        let mut outcome = ReplicationOutcome::new(WriteOperation::Create, id.clone(), record.house);
        info!(
            "event=replicate_create module=replication status=start id={id} house={}",
            record.house
        );

        let authoritative = self.registry.authoritative_store();
        let result = self.tasks.insert(authoritative, &record).await;
        outcome.authoritative.record(&result);
        if let Err(err) = result {
            error!(
                "event=replicate_create module=replication status=aborted id={id} store=authoritative error={err}"
            );
            return Err(err);
        }
        outcome.transition(ReplicationState::AuthoritativeWritten);

        let partition = self.registry.partition_store(record.house);
        let backup = self.registry.backup_store();
        outcome.transition(ReplicationState::SlavesSyncing);
        let (partition_result, backup_result) = tokio::join!(
            self.tasks.insert(partition, &record),
            self.tasks.insert(backup, &record)
        );
        outcome.partition.record(&partition_result);
        outcome.backup.record(&backup_result);

        if outcome.partition.is_applied() && outcome.backup.is_applied() {
            outcome.transition(ReplicationState::Consistent);
            info!("event=replicate_create module=replication status=ok id={id}");
            return Ok(id);
        }

        self.compensate(&mut outcome, Compensation::Delete(id)).await
    }

    async fn delete(&self, id: StudentId, house: House) -> ReplicationResult<()> {
        let mut outcome = ReplicationOutcome::new(WriteOperation::Delete, id.clone(), house);
        info!("event=replicate_delete module=replication status=start id={id} house={house}");

        let authoritative = self.registry.authoritative_store();
        let result = self.tasks.delete(authoritative, &id).await;
        outcome.authoritative.record(&result);
        let stored = match result {
            Ok(stored) => stored,
            Err(err) => {
                error!(
                    "event=replicate_delete module=replication status=aborted id={id} store=authoritative error={err}"
                );
                return Err(err);
            }
        };
        outcome.transition(ReplicationState::AuthoritativeWritten);

        let partition = self.registry.partition_store(house);
        let backup = self.registry.backup_store();
        outcome.transition(ReplicationState::SlavesSyncing);
        let (partition_result, backup_result) = tokio::join!(
            self.tasks.delete(partition, &id),
            self.tasks.delete(backup, &id)
        );
        outcome.partition.record(&partition_result);
        outcome.backup.record(&backup_result);

        if outcome.partition.is_applied() && outcome.backup.is_applied() {
            outcome.transition(ReplicationState::Consistent);
            info!("event=replicate_delete module=replication status=ok id={id}");
            return Ok(());
        }

        self.compensate(&mut outcome, Compensation::Reinsert(stored))
            .await
    }

    async fn update(&self, id: StudentId, record: StudentRecord) -> ReplicationResult<()> {
        let mut outcome = ReplicationOutcome::new(WriteOperation::Update, id.clone(), record.house);
        info!(
            "event=replicate_update module=replication status=start id={id} house={}",
            record.house
        );

        outcome.transition(ReplicationState::SlavesSyncing);
        let (authoritative_result, partition_result, backup_result) = tokio::join!(
            self.tasks
                .update(self.registry.authoritative_store(), &id, &record),
            self.tasks
                .update(self.registry.partition_store(record.house), &id, &record),
            self.tasks.update(self.registry.backup_store(), &id, &record)
        );
        outcome.authoritative.record(&authoritative_result);
        outcome.partition.record(&partition_result);
        outcome.backup.record(&backup_result);

        if outcome.stores().iter().all(|write| write.is_applied()) {
            outcome.transition(ReplicationState::Consistent);
            info!("event=replicate_update module=replication status=ok id={id}");
            return Ok(());
        }

        if outcome.applied_roles().is_empty() {
            outcome.transition(ReplicationState::Init);
            warn!(
                "event=replicate_update module=replication status=aborted id={id} reason=no_store_updated"
            );
            // Nothing changed anywhere; report the authoritative cause.
            return Err(authoritative_result
                .err()
                .unwrap_or_else(|| ReplicationError::PartialReplication(Box::new(outcome))));
        }

        outcome.transition(ReplicationState::Inconsistent);
        error!(
            "event=replicate_update module=replication status=inconsistent id={id} updated={:?} failed={:?} action=manual_check_required",
            outcome.applied_roles(),
            outcome.failed_roles()
        );
        Err(ReplicationError::PartialReplication(Box::new(outcome)))
    }

    /// Undoes the write on every store that took it. Always returns an error.
    async fn compensate<T>(
        &self,
        outcome: &mut ReplicationOutcome,
        action: Compensation,
    ) -> ReplicationResult<T> {
        outcome.transition(ReplicationState::Compensating);
        let targets = outcome.applied_roles();
        warn!(
            "event=replicate_{op} module=replication status=compensating id={id} failed={failed:?} undo={targets:?}",
            op = outcome.operation,
            id = outcome.id,
            failed = outcome.failed_roles(),
        );

        let action = &action;
        let attempts = targets.iter().map(|role| {
            let descriptor = self.registry.select(*role);
            async move {
                let result = match action {
                    Compensation::Delete(id) => {
                        self.tasks.delete(descriptor, id).await.map(|_| ())
                    }
                    Compensation::Reinsert(record) => self.tasks.insert(descriptor, record).await,
                };
                (*role, result)
            }
        });

        for (role, result) in join_all(attempts).await {
            outcome.write_mut(role).status = match result {
                Ok(()) => WriteStatus::Compensated,
                Err(err) => WriteStatus::CompensationFailed(err.to_string()),
            };
        }

        let unresolved = outcome.diverged_roles();
        if unresolved.is_empty() {
            outcome.transition(ReplicationState::Compensated);
            warn!(
                "event=replicate_{} module=replication status=compensated id={}",
                outcome.operation, outcome.id
            );
            return Err(ReplicationError::PartialReplication(Box::new(outcome.clone())));
        }

        outcome.transition(ReplicationState::Inconsistent);
        error!(
            "event=replicate_{} module=replication status=inconsistent id={} diverged={:?} action=manual_reconciliation_required",
            outcome.operation, outcome.id, unresolved
        );
        Err(ReplicationError::CompensationFailure(Box::new(
            outcome.clone(),
        )))
    }
}
