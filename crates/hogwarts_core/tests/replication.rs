mod common;

use common::{layout, student, FaultyStore, Layout, Op};
use futures::future::join_all;
use hogwarts_core::{
    House, RecordStore, ReplicationCoordinator, ReplicationError, ReplicationState,
    Resynchronizer, StoreRole, StudentId, StudentRecord, StudentValidationError, WriteStatus,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const GRYFFINDOR: StoreRole = StoreRole::Partition(House::Gryffindor);

fn coordinator(layout: &Layout, store: &Arc<FaultyStore>) -> ReplicationCoordinator<FaultyStore> {
    ReplicationCoordinator::new(Arc::clone(store), Arc::clone(&layout.registry))
}

fn ids(layout: &Layout, store: &FaultyStore, role: StoreRole) -> Vec<String> {
    layout.ids(store.inner(), role)
}

#[tokio::test]
async fn create_assigns_next_house_id_and_reaches_all_three_stores() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);
    assert!(coordinator.allocator().preseed(House::Gryffindor, 5));

    let mut harry = student("Harry", "Potter", 5, "Gryffindor");
    harry.patronus = Some("Stag".to_string());
    let id = coordinator.create_record(harry).await.unwrap();

    assert_eq!(id.as_str(), "GRY00006");
    for role in [StoreRole::Authoritative, GRYFFINDOR, StoreRole::Backup] {
        assert_eq!(ids(&layout, &store, role), vec!["GRY00006"], "{role}");
    }
    for house in [House::Slytherin, House::Ravenclaw, House::Hufflepuff] {
        assert!(ids(&layout, &store, StoreRole::Partition(house)).is_empty());
    }

    let stored = coordinator
        .list_records(StoreRole::Backup)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(stored.patronus.as_deref(), Some("Stag"));
    assert_eq!(stored.year, 5);
}

#[tokio::test]
async fn allocator_seeds_from_partition_store_contents() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);

    let first = coordinator
        .create_record(student("Draco", "Malfoy", 5, "slytherin"))
        .await
        .unwrap();
    assert_eq!(first.as_str(), "SLY00001");

    // A fresh coordinator has no counters and must scan the partition.
    let restarted = ReplicationCoordinator::new(Arc::clone(&store), Arc::clone(&layout.registry));
    let second = restarted
        .create_record(student("Vincent", "Crabbe", 5, "Slytherin"))
        .await
        .unwrap();
    assert_eq!(second.as_str(), "SLY00002");
}

#[tokio::test]
async fn invalid_record_is_rejected_before_any_store_is_touched() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);

    let mut record = student("Ginny", "Weasley", 4, "Gryffindor");
    record.year = 8;
    let err = coordinator.create_record(record).await.unwrap_err();

    assert!(matches!(
        err,
        ReplicationError::ConstraintViolation(StudentValidationError::YearOutOfRange(8))
    ));
    assert_eq!(store.calls(), 0);
    assert!(ids(&layout, &store, StoreRole::Authoritative).is_empty());
}

#[tokio::test]
async fn id_from_another_house_is_rejected_before_any_write() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);

    let stray = StudentRecord::with_id(
        StudentId::sequential(House::Slytherin, 1),
        "Harry",
        "Potter",
        5,
        House::Gryffindor,
        None,
    );
    let err = coordinator.create_record(stray).await.unwrap_err();

    assert!(matches!(
        err,
        ReplicationError::ConstraintViolation(StudentValidationError::IdHouseMismatch {
            house: House::Gryffindor,
            ..
        })
    ));
    assert_eq!(store.calls(), 0);

    let draco = coordinator
        .create_record(student("Draco", "Malfoy", 5, "Slytherin"))
        .await
        .unwrap();
    assert_eq!(draco.as_str(), "SLY00001");
}

#[tokio::test]
async fn update_cannot_move_record_to_another_house() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);
    let id = coordinator
        .create_record(student("Neville", "Longbottom", 5, "Gryffindor"))
        .await
        .unwrap();
    let calls_after_create = store.calls();

    let mut moved = stored(&coordinator, &id).await;
    moved.house = House::Hufflepuff;
    let err = coordinator.update_record(&id, &moved).await.unwrap_err();

    assert!(matches!(
        err,
        ReplicationError::ConstraintViolation(StudentValidationError::IdHouseMismatch { .. })
    ));
    assert_eq!(store.calls(), calls_after_create + 1);
    assert_eq!(stored(&coordinator, &id).await.house, House::Gryffindor);
    assert!(ids(&layout, &store, StoreRole::Partition(House::Hufflepuff)).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_create_still_reaches_every_store() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new().stalling(
        StoreRole::Authoritative,
        Op::Insert,
        Duration::from_millis(300),
    ));
    let coordinator = coordinator(&layout, &store);

    let harry = student("Harry", "Potter", 5, "Gryffindor");
    let waited =
        tokio::time::timeout(Duration::from_millis(50), coordinator.create_record(harry)).await;
    assert!(waited.is_err());

    for _ in 0..40 {
        if ids(&layout, &store, StoreRole::Backup).len() == 1
            && ids(&layout, &store, GRYFFINDOR).len() == 1
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    for role in [StoreRole::Authoritative, GRYFFINDOR, StoreRole::Backup] {
        assert_eq!(ids(&layout, &store, role), vec!["GRY00001"], "{role}");
    }
}

#[tokio::test]
async fn authoritative_failure_aborts_without_touching_slaves() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new().failing(StoreRole::Authoritative, Op::Insert));
    let coordinator = coordinator(&layout, &store);

    let err = coordinator
        .create_record(student("Seamus", "Finnigan", 3, "Gryffindor"))
        .await
        .unwrap_err();

    assert!(matches!(err, ReplicationError::Store(_)));
    assert!(!err.is_severe());
    assert!(ids(&layout, &store, GRYFFINDOR).is_empty());
    assert!(ids(&layout, &store, StoreRole::Backup).is_empty());
}

#[tokio::test]
async fn duplicate_id_in_authoritative_store_is_reported() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);
    let existing = common::student_with_id(House::Ravenclaw, 3, "Padma");
    layout.seed(store.inner(), StoreRole::Authoritative, &existing);

    let clash = common::student_with_id(House::Ravenclaw, 3, "Terry");
    let err = coordinator.create_record(clash).await.unwrap_err();

    match err {
        ReplicationError::DuplicateIdentifier(id) => assert_eq!(id.as_str(), "RAV00003"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(ids(&layout, &store, StoreRole::Backup).is_empty());
}

#[tokio::test]
async fn failed_slave_insert_is_compensated_everywhere() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new().failing(GRYFFINDOR, Op::Insert));
    let coordinator = coordinator(&layout, &store);

    let err = coordinator
        .create_record(student("Ron", "Weasley", 5, "Gryffindor"))
        .await
        .unwrap_err();

    let outcome = match &err {
        ReplicationError::PartialReplication(outcome) => outcome,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(outcome.state, ReplicationState::Compensated);
    assert_eq!(outcome.authoritative.status, WriteStatus::Compensated);
    assert!(matches!(outcome.partition.status, WriteStatus::Failed(_)));
    assert_eq!(outcome.backup.status, WriteStatus::Compensated);
    assert_eq!(outcome.failed_roles(), vec![GRYFFINDOR]);
    assert!(!err.is_severe());

    for role in [StoreRole::Authoritative, GRYFFINDOR, StoreRole::Backup] {
        assert!(ids(&layout, &store, role).is_empty(), "{role}");
    }
}

#[tokio::test]
async fn failed_compensation_is_surfaced_as_severe() {
    let layout = layout();
    let store = Arc::new(
        FaultyStore::new()
            .failing(GRYFFINDOR, Op::Insert)
            .failing(StoreRole::Backup, Op::Delete),
    );
    let coordinator = coordinator(&layout, &store);

    let err = coordinator
        .create_record(student("Dean", "Thomas", 5, "Gryffindor"))
        .await
        .unwrap_err();

    assert!(err.is_severe());
    let outcome = match &err {
        ReplicationError::CompensationFailure(outcome) => outcome,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(outcome.state, ReplicationState::Inconsistent);
    assert_eq!(outcome.diverged_roles(), vec![StoreRole::Backup]);
    assert!(matches!(
        outcome.backup.status,
        WriteStatus::CompensationFailed(_)
    ));

    let id = outcome.id.as_str().to_string();
    assert!(ids(&layout, &store, StoreRole::Authoritative).is_empty());
    assert_eq!(ids(&layout, &store, StoreRole::Backup), vec![id]);
}

#[tokio::test]
async fn delete_removes_record_from_all_three_stores() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);
    let id = coordinator
        .create_record(student("Cedric", "Diggory", 6, "Hufflepuff"))
        .await
        .unwrap();
    let record = stored(&coordinator, &id).await;

    coordinator.delete_record(&record).await.unwrap();

    for role in [
        StoreRole::Authoritative,
        StoreRole::Partition(House::Hufflepuff),
        StoreRole::Backup,
    ] {
        assert!(ids(&layout, &store, role).is_empty(), "{role}");
    }
}

#[tokio::test]
async fn failed_slave_delete_reinserts_record() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);
    let id = coordinator
        .create_record(student("Luna", "Lovegood", 4, "Ravenclaw"))
        .await
        .unwrap();
    let record = stored(&coordinator, &id).await;

    store.fail(StoreRole::Backup, Op::Delete);
    let err = coordinator.delete_record(&record).await.unwrap_err();

    let outcome = err.outcome().unwrap();
    assert_eq!(outcome.state, ReplicationState::Compensated);
    for role in [
        StoreRole::Authoritative,
        StoreRole::Partition(House::Ravenclaw),
        StoreRole::Backup,
    ] {
        assert_eq!(ids(&layout, &store, role), vec![id.as_str()], "{role}");
    }
    assert_eq!(stored(&coordinator, &id).await, record);
}

#[tokio::test]
async fn failed_delete_compensation_is_surfaced_as_severe() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);
    let id = coordinator
        .create_record(student("Oliver", "Wood", 7, "Gryffindor"))
        .await
        .unwrap();
    let record = stored(&coordinator, &id).await;

    store.fail(GRYFFINDOR, Op::Delete);
    store.fail(StoreRole::Authoritative, Op::Insert);
    let err = coordinator.delete_record(&record).await.unwrap_err();

    assert!(err.is_severe());
    let outcome = match &err {
        ReplicationError::CompensationFailure(outcome) => outcome,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(outcome.state, ReplicationState::Inconsistent);
    assert!(matches!(outcome.partition.status, WriteStatus::Failed(_)));
    assert_eq!(outcome.backup.status, WriteStatus::Compensated);
    assert_eq!(outcome.diverged_roles(), vec![StoreRole::Authoritative]);

    store.heal();
    assert!(ids(&layout, &store, StoreRole::Authoritative).is_empty());
    assert_eq!(ids(&layout, &store, GRYFFINDOR), vec![id.as_str()]);
    assert_eq!(ids(&layout, &store, StoreRole::Backup), vec![id.as_str()]);
}

#[tokio::test]
async fn delete_compensation_restores_stored_row_not_callers_copy() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);
    let id = coordinator
        .create_record(student("Katie", "Bell", 5, "Gryffindor"))
        .await
        .unwrap();
    let stale = stored(&coordinator, &id).await;

    let mut promoted = stale.clone();
    promoted.year = 6;
    coordinator.update_record(&id, &promoted).await.unwrap();

    store.fail(StoreRole::Backup, Op::Delete);
    let err = coordinator.delete_record(&stale).await.unwrap_err();
    assert_eq!(err.outcome().unwrap().state, ReplicationState::Compensated);

    store.heal();
    for role in [StoreRole::Authoritative, GRYFFINDOR, StoreRole::Backup] {
        let rows = store.inner().list(layout.store(role)).unwrap();
        assert_eq!(rows, vec![promoted.clone()], "{role}");
    }
}

#[tokio::test]
async fn partial_update_is_reported_without_compensation() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);
    let id = coordinator
        .create_record(student("Hermione", "Granger", 5, "Gryffindor"))
        .await
        .unwrap();

    store.fail(StoreRole::Backup, Op::Update);
    let mut changed = stored(&coordinator, &id).await;
    changed.year = 6;
    changed.patronus = Some("Otter".to_string());
    let err = coordinator.update_record(&id, &changed).await.unwrap_err();

    assert!(!err.is_severe());
    let outcome = err.outcome().unwrap();
    assert_eq!(outcome.state, ReplicationState::Inconsistent);
    assert_eq!(outcome.failed_roles(), vec![StoreRole::Backup]);
    assert_eq!(
        outcome.diverged_roles(),
        vec![StoreRole::Authoritative, GRYFFINDOR]
    );

    store.heal();
    let year_in = |role| {
        store
            .inner()
            .list(layout.store(role))
            .unwrap()
            .remove(0)
            .year
    };
    assert_eq!(year_in(StoreRole::Authoritative), 6);
    assert_eq!(year_in(GRYFFINDOR), 6);
    assert_eq!(year_in(StoreRole::Backup), 5);
}

#[tokio::test]
async fn update_of_unknown_id_changes_nothing() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);
    let ghost = StudentId::sequential(House::Hufflepuff, 42);
    let record = student("Zacharias", "Smith", 5, "Hufflepuff");

    let err = coordinator.update_record(&ghost, &record).await.unwrap_err();
    assert!(matches!(err, ReplicationError::Store(_)));
    assert!(err.outcome().is_none());
}

#[tokio::test]
async fn update_rejects_mismatched_record_id() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);
    let record = common::student_with_id(House::Slytherin, 1, "Blaise");

    let err = coordinator
        .update_record(&StudentId::sequential(House::Slytherin, 2), &record)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReplicationError::ConstraintViolation(StudentValidationError::IdMismatch { .. })
    ));
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn deleted_record_is_not_reintroduced_by_resync() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);
    let kept = coordinator
        .create_record(student("Fred", "Weasley", 7, "Gryffindor"))
        .await
        .unwrap();
    let gone = coordinator
        .create_record(student("George", "Weasley", 7, "Gryffindor"))
        .await
        .unwrap();
    let record = stored(&coordinator, &gone).await;
    coordinator.delete_record(&record).await.unwrap();

    let report = Resynchronizer::new(Arc::clone(&store), Arc::clone(&layout.registry))
        .resynchronize_all()
        .await
        .unwrap();

    assert_eq!(report.total_missing(), 0);
    assert_eq!(ids(&layout, &store, GRYFFINDOR), vec![kept.as_str()]);
    assert_eq!(ids(&layout, &store, StoreRole::Backup), vec![kept.as_str()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_get_distinct_ids() {
    let layout = layout();
    let store = Arc::new(FaultyStore::new());
    let coordinator = coordinator(&layout, &store);

    let creates = (0..20).map(|n| {
        coordinator.create_record(student(&format!("Student{n}"), "Weasley", 2, "Gryffindor"))
    });
    let ids_created: HashSet<StudentId> = join_all(creates)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(ids_created.len(), 20);
    assert_eq!(ids(&layout, &store, StoreRole::Authoritative).len(), 20);
    assert_eq!(ids(&layout, &store, GRYFFINDOR).len(), 20);
    assert_eq!(ids(&layout, &store, StoreRole::Backup).len(), 20);
}

async fn stored(coordinator: &ReplicationCoordinator<FaultyStore>, id: &StudentId) -> StudentRecord {
    coordinator
        .list_records(StoreRole::Authoritative)
        .await
        .unwrap()
        .into_iter()
        .find(|record| record.id() == Some(id))
        .unwrap()
}
