//! Per-store student persistence.
//!
//! # Responsibility
//! - Run one CRUD operation against one store inside a local transaction.
//! - Report ordinary failures (constraints, IO, missing rows) as values.
//!
//! # Invariants
//! - Write paths call `StudentRecord::validate()` before any SQL mutation.
//! - A write either commits fully on its store or is rolled back.
//! - Nothing here knows about the other stores; cross-store atomicity lives
//!   in the replication service.

use crate::db::DbError;
use crate::model::student::{House, StudentId, StudentRecord, StudentValidationError};
use crate::store::connector::{ConnectError, SqliteConnector, StoreConnector};
use crate::store::registry::{StoreDescriptor, StoreRole};
use log::{debug, warn};
use rusqlite::{params, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

const STUDENT_SELECT_SQL: &str = "SELECT
    id,
    first_name,
    last_name,
    year,
    house,
    patronus
FROM alumnos";

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Connectivity(ConnectError),
    Validation(StudentValidationError),
    Db(DbError),
    NotFound(StudentId),
    DuplicateId(StudentId),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connectivity(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "student not found: {id}"),
            Self::DuplicateId(id) => write!(f, "student id already exists: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted student data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Connectivity(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::DuplicateId(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<ConnectError> for RepoError {
    fn from(value: ConnectError) -> Self {
        Self::Connectivity(value)
    }
}

impl From<StudentValidationError> for RepoError {
    fn from(value: StudentValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Single-store CRUD contract. Implementations must be shareable across worker threads.
pub trait RecordStore: Send + Sync {
    /// Reads every row of the store.
    fn list(&self, store: &StoreDescriptor) -> RepoResult<Vec<StudentRecord>>;

    /// Inserts `record`, which must already carry its id.
    fn insert(&self, store: &StoreDescriptor, record: &StudentRecord) -> RepoResult<()>;

    /// Overwrites the mutable fields of row `id`.
    fn update(
        &self,
        store: &StoreDescriptor,
        id: &StudentId,
        record: &StudentRecord,
    ) -> RepoResult<()>;

    /// Removes row `id` and returns it as it was stored.
    fn delete(&self, store: &StoreDescriptor, id: &StudentId) -> RepoResult<StudentRecord>;

    /// Highest sequential suffix among ids carrying `house`'s prefix, if any.
    fn max_sequence(&self, store: &StoreDescriptor, house: House) -> RepoResult<Option<u64>> {
        Ok(self
            .list(store)?
            .iter()
            .filter_map(StudentRecord::id)
            .filter(|id| id.house() == Some(house))
            .filter_map(StudentId::sequence)
            .max())
    }
}

/// `RecordStore` over SQL stores reached through a `StoreConnector`.
pub struct SqlRecordStore<C: StoreConnector = SqliteConnector> {
    connector: C,
}

impl SqlRecordStore<SqliteConnector> {
    pub fn sqlite() -> Self {
        Self::new(SqliteConnector::new())
    }
}

impl<C: StoreConnector> SqlRecordStore<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    /// Runs `op` inside an immediate transaction; commits on `Ok`, rolls back on `Err`.
    fn in_transaction<T>(
        &self,
        store: &StoreDescriptor,
        action: &str,
        op: impl FnOnce(&Transaction<'_>) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let mut handle = self.connector.acquire(store)?;
        let tx = handle
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        match op(&tx) {
            Ok(value) => {
                tx.commit()?;
                debug!(
                    "event=store_write module=repo status=ok action={action} store={}",
                    store.role
                );
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        "event=store_write module=repo status=error action={action} store={} error_code=rollback_failed error={rollback_err}",
                        store.role
                    );
                }
                warn!(
                    "event=store_write module=repo status=rolled_back action={action} store={} error={err}",
                    store.role
                );
                Err(err)
            }
        }
    }
}

impl<C: StoreConnector> RecordStore for SqlRecordStore<C> {
    fn list(&self, store: &StoreDescriptor) -> RepoResult<Vec<StudentRecord>> {
        let handle = self.connector.acquire(store)?;
        let mut stmt = handle
            .connection()
            .prepare(&format!("{STUDENT_SELECT_SQL} ORDER BY id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut students = Vec::new();

        while let Some(row) = rows.next()? {
            students.push(parse_student_row(row, store.role)?);
        }

        Ok(students)
    }

    fn insert(&self, store: &StoreDescriptor, record: &StudentRecord) -> RepoResult<()> {
        record.validate()?;
        let id = record.require_id()?.clone();

        self.in_transaction(store, "insert", |tx| {
            let result = tx.execute(
                "INSERT INTO alumnos (
                    id,
                    first_name,
                    last_name,
                    year,
                    house,
                    patronus
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    id.as_str(),
                    record.first_name.as_str(),
                    record.last_name.as_str(),
                    record.year,
                    record.house.name(),
                    record.patronus.as_deref(),
                ],
            );

            match result {
                Ok(_) => Ok(()),
                Err(err) if is_unique_violation(&err) => Err(RepoError::DuplicateId(id.clone())),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn update(
        &self,
        store: &StoreDescriptor,
        id: &StudentId,
        record: &StudentRecord,
    ) -> RepoResult<()> {
        record.validate()?;

        self.in_transaction(store, "update", |tx| {
            let changed = tx.execute(
                "UPDATE alumnos
                 SET
                    first_name = ?1,
                    last_name = ?2,
                    year = ?3,
                    house = ?4,
                    patronus = ?5
                 WHERE id = ?6;",
                params![
                    record.first_name.as_str(),
                    record.last_name.as_str(),
                    record.year,
                    record.house.name(),
                    record.patronus.as_deref(),
                    id.as_str(),
                ],
            )?;

            if changed == 0 {
                return Err(RepoError::NotFound(id.clone()));
            }
            Ok(())
        })
    }

    fn delete(&self, store: &StoreDescriptor, id: &StudentId) -> RepoResult<StudentRecord> {
        self.in_transaction(store, "delete", |tx| {
            let stored = tx
                .query_row(
                    &format!("{STUDENT_SELECT_SQL} WHERE id = ?1;"),
                    [id.as_str()],
                    |row| Ok(parse_student_row(row, store.role)),
                )
                .optional()?;
            let Some(stored) = stored else {
                return Err(RepoError::NotFound(id.clone()));
            };
            let stored = stored?;
            tx.execute("DELETE FROM alumnos WHERE id = ?1;", [id.as_str()])?;
            Ok(stored)
        })
    }

    fn max_sequence(&self, store: &StoreDescriptor, house: House) -> RepoResult<Option<u64>> {
        let handle = self.connector.acquire(store)?;
        let mut stmt = handle
            .connection()
            .prepare("SELECT id FROM alumnos WHERE id LIKE ?1;")?;
        let mut rows = stmt.query([format!("{}%", house.id_prefix())])?;
        let mut highest = None;

        while let Some(row) = rows.next()? {
            let raw: String = row.get("id")?;
            // Ids in foreign formats cannot collide with sequential ones.
            let sequence = StudentId::parse(&raw).ok().and_then(|id| id.sequence());
            highest = highest.max(sequence);
        }

        Ok(highest)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && (failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
    )
}

fn parse_student_row(row: &Row<'_>, role: StoreRole) -> RepoResult<StudentRecord> {
    let id_text: String = row.get("id")?;
    let id = StudentId::parse(&id_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid id `{id_text}` in {role} alumnos.id"))
    })?;

    let house_text: String = row.get("house")?;
    let house = House::parse(&house_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid house `{house_text}` in {role} alumnos.house"
        ))
    })?;

    let year: i64 = row.get("year")?;
    let year = u8::try_from(year).map_err(|_| {
        RepoError::InvalidData(format!("invalid year `{year}` in {role} alumnos.year"))
    })?;

    let student = StudentRecord::with_id(
        id,
        row.get::<_, String>("first_name")?,
        row.get::<_, String>("last_name")?,
        year,
        house,
        row.get("patronus")?,
    );
    student.validate().map_err(|err| {
        RepoError::InvalidData(format!("row `{id_text}` in {role} store: {err}"))
    })?;
    Ok(student)
}
