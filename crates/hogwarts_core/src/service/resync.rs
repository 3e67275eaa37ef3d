//! One-directional reconciliation from the authoritative store.
//!
//! # Responsibility
//! - Insert authoritative records missing from a slave store.
//! - Report per-target progress without letting one target block another.
//!
//! # Invariants
//! - Partition stores only receive records of their own house; the backup
//!   store receives everything.
//! - Slave-only rows (orphans) are never deleted.
//! - Existing slave rows are never overwritten; divergent field values are
//!   left as they are.
//! - Targets are swept in parallel; inserts into one target are bounded by
//!   `MAX_INSERTS_IN_FLIGHT`.

use crate::model::student::{StudentId, StudentRecord};
use crate::repo::student_repo::RecordStore;
use crate::service::error::{ReplicationError, ReplicationResult};
use crate::service::tasks::StoreTasks;
use crate::store::registry::{PartitionRegistry, StoreDescriptor, StoreRole, StoreSelector};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// Upper bound on concurrent inserts into one target store.
const MAX_INSERTS_IN_FLIGHT: usize = 4;

/// Result of reconciling one slave store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSyncReport {
    pub target: StoreRole,
    /// Records present in the authoritative store but absent from the target.
    pub missing: usize,
    pub inserted: usize,
    pub errors: Vec<String>,
}

impl TargetSyncReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.inserted == self.missing
    }
}

/// Aggregate result of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records read from the authoritative store.
    pub source_records: usize,
    pub targets: Vec<TargetSyncReport>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.targets.iter().all(TargetSyncReport::is_complete)
    }

    pub fn total_missing(&self) -> usize {
        self.targets.iter().map(|target| target.missing).sum()
    }

    pub fn total_inserted(&self) -> usize {
        self.targets.iter().map(|target| target.inserted).sum()
    }

    pub fn failed_targets(&self) -> Vec<StoreRole> {
        self.targets
            .iter()
            .filter(|target| !target.is_complete())
            .map(|target| target.target)
            .collect()
    }

    pub fn target(&self, role: StoreRole) -> Option<&TargetSyncReport> {
        self.targets.iter().find(|target| target.target == role)
    }
}

/// Records of `expected` whose id does not appear in `existing`.
pub fn missing_records(expected: &[StudentRecord], existing: &[StudentRecord]) -> Vec<StudentRecord> {
    let present: HashSet<&StudentId> = existing.iter().filter_map(StudentRecord::id).collect();
    expected
        .iter()
        .filter(|record| record.id().is_some_and(|id| !present.contains(id)))
        .cloned()
        .collect()
}

/// Subset of the authoritative set a target is expected to mirror.
fn expected_for(role: StoreRole, source: &[StudentRecord]) -> Vec<StudentRecord> {
    match role {
        StoreRole::Partition(house) => source
            .iter()
            .filter(|record| record.house == house)
            .cloned()
            .collect(),
        StoreRole::Backup | StoreRole::Authoritative => source.to_vec(),
    }
}

pub struct Resynchronizer<S: RecordStore + 'static> {
    tasks: StoreTasks<S>,
    registry: Arc<PartitionRegistry>,
}

impl<S: RecordStore + 'static> Resynchronizer<S> {
    pub fn new(store: Arc<S>, registry: Arc<PartitionRegistry>) -> Self {
        Self {
            tasks: StoreTasks::new(store),
            registry,
        }
    }

    /// Reconciles all four partition stores and the backup store in parallel.
    ///
    /// # Errors
    /// - Reading the authoritative store fails: nothing is attempted.
    /// - `SyncIncomplete` when any target could not take its full missing set;
    ///   the report still covers every target.
    pub async fn resynchronize_all(&self) -> ReplicationResult<SyncReport> {
        let source = self.load_source().await?;
        info!(
            "event=resync module=resync status=start scope=all source_records={}",
            source.len()
        );

        let sweeps = self
            .registry
            .slaves()
            .map(|descriptor| self.sync_target(descriptor, expected_for(descriptor.role, &source)));
        let report = SyncReport {
            source_records: source.len(),
            targets: join_all(sweeps).await,
        };

        finish(report)
    }

    /// Reconciles one store against the authoritative set.
    pub async fn resynchronize_store(
        &self,
        selector: StoreSelector,
    ) -> ReplicationResult<TargetSyncReport> {
        let source = self.load_source().await?;
        info!(
            "event=resync module=resync status=start scope={selector} source_records={}",
            source.len()
        );

        let descriptor = self.registry.select(selector);
        let target = self
            .sync_target(descriptor, expected_for(selector, &source))
            .await;
        if target.is_complete() {
            return Ok(target);
        }
        Err(ReplicationError::SyncIncomplete(Box::new(SyncReport {
            source_records: source.len(),
            targets: vec![target],
        })))
    }

    async fn load_source(&self) -> ReplicationResult<Vec<StudentRecord>> {
        self.tasks
            .list(self.registry.authoritative_store())
            .await
            .inspect_err(|err| {
                warn!("event=resync module=resync status=error stage=load_source error={err}");
            })
    }

    async fn sync_target(
        &self,
        descriptor: &StoreDescriptor,
        expected: Vec<StudentRecord>,
    ) -> TargetSyncReport {
        let target = descriptor.role;
        let existing = match self.tasks.list(descriptor).await {
            Ok(existing) => existing,
            Err(err) => {
                warn!(
                    "event=resync_target module=resync status=error target={target} stage=list error={err}"
                );
                return TargetSyncReport {
                    target,
                    missing: 0,
                    inserted: 0,
                    errors: vec![err.to_string()],
                };
            }
        };

        let missing = missing_records(&expected, &existing);
        if missing.is_empty() {
            debug!("event=resync_target module=resync status=ok target={target} missing=0");
            return TargetSyncReport {
                target,
                missing: 0,
                inserted: 0,
                errors: Vec::new(),
            };
        }

        let errors: Vec<String> = stream::iter(&missing)
            .map(|record| self.tasks.insert(descriptor, record))
            .buffer_unordered(MAX_INSERTS_IN_FLIGHT)
            .filter_map(|result| async move { result.err().map(|err| err.to_string()) })
            .collect()
            .await;

        let report = TargetSyncReport {
            target,
            missing: missing.len(),
            inserted: missing.len() - errors.len(),
            errors,
        };
        if report.is_complete() {
            info!(
                "event=resync_target module=resync status=ok target={target} inserted={}/{}",
                report.inserted, report.missing
            );
        } else {
            warn!(
                "event=resync_target module=resync status=partial target={target} inserted={}/{}",
                report.inserted, report.missing
            );
        }
        report
    }
}

fn finish(report: SyncReport) -> ReplicationResult<SyncReport> {
    if report.is_complete() {
        info!(
            "event=resync module=resync status=ok inserted={}",
            report.total_inserted()
        );
        return Ok(report);
    }
    warn!(
        "event=resync module=resync status=incomplete inserted={}/{} failed={:?}",
        report.total_inserted(),
        report.total_missing(),
        report.failed_targets()
    );
    Err(ReplicationError::SyncIncomplete(Box::new(report)))
}

#[cfg(test)]
mod tests {
    use super::{expected_for, missing_records, SyncReport, TargetSyncReport};
    use crate::model::student::{House, StudentId, StudentRecord};
    use crate::store::registry::StoreRole;

    fn student(house: House, n: u64) -> StudentRecord {
        StudentRecord::with_id(
            StudentId::sequential(house, n),
            "Test",
            "Student",
            3,
            house,
            None,
        )
    }

    #[test]
    fn missing_records_diffs_by_id_only() {
        let expected = vec![student(House::Gryffindor, 1), student(House::Gryffindor, 2)];
        let mut changed = student(House::Gryffindor, 1);
        changed.first_name = "Renamed".to_string();
        let orphan = student(House::Gryffindor, 9);

        let missing = missing_records(&expected, &[changed, orphan]);
        assert_eq!(missing, vec![student(House::Gryffindor, 2)]);
    }

    #[test]
    fn expected_set_is_filtered_for_partitions_only() {
        let source = vec![
            student(House::Gryffindor, 1),
            student(House::Slytherin, 1),
            student(House::Gryffindor, 2),
        ];
        assert_eq!(
            expected_for(StoreRole::Partition(House::Gryffindor), &source).len(),
            2
        );
        assert_eq!(
            expected_for(StoreRole::Partition(House::Hufflepuff), &source).len(),
            0
        );
        assert_eq!(expected_for(StoreRole::Backup, &source).len(), 3);
    }

    #[test]
    fn report_aggregates_targets() {
        let report = SyncReport {
            source_records: 4,
            targets: vec![
                TargetSyncReport {
                    target: StoreRole::Backup,
                    missing: 3,
                    inserted: 3,
                    errors: Vec::new(),
                },
                TargetSyncReport {
                    target: StoreRole::Partition(House::Ravenclaw),
                    missing: 2,
                    inserted: 1,
                    errors: vec!["locked".to_string()],
                },
            ],
        };
        assert!(!report.is_complete());
        assert_eq!(report.total_missing(), 5);
        assert_eq!(report.total_inserted(), 4);
        assert_eq!(
            report.failed_targets(),
            vec![StoreRole::Partition(House::Ravenclaw)]
        );
    }
}
