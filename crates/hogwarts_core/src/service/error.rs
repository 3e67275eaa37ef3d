//! Error taxonomy surfaced by replication and resync entry points.
//!
//! # Invariants
//! - `CompensationFailure` is never folded into another variant; callers
//!   must be able to tell "failed but consistent" from "failed and diverged".
//! - Repository-level failures arrive here as values, never as panics.

use crate::model::student::{StudentId, StudentValidationError};
use crate::repo::student_repo::RepoError;
use crate::service::replication::ReplicationOutcome;
use crate::service::resync::SyncReport;
use crate::store::connector::ConnectError;
use crate::store::registry::RegistryError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ReplicationResult<T> = Result<T, ReplicationError>;

#[derive(Debug)]
pub enum ReplicationError {
    /// Store unreachable; nothing was written by this step, safe to retry.
    Connectivity(ConnectError),
    /// Invalid field rejected before any write.
    ConstraintViolation(StudentValidationError),
    /// House key has no registered partition store.
    UnknownPartition(RegistryError),
    /// A slave write failed; compensation restored consistency, or the
    /// operation (update) does not compensate. The outcome says which.
    PartialReplication(Box<ReplicationOutcome>),
    /// Compensation could not undo a partial write. Needs an operator.
    CompensationFailure(Box<ReplicationOutcome>),
    /// The id is already taken in the target store.
    DuplicateIdentifier(StudentId),
    /// Other store-level failure (missing row, corrupt data, SQL error).
    Store(RepoError),
    /// A resync pass left at least one target short of its missing set.
    SyncIncomplete(Box<SyncReport>),
    /// A blocking worker task panicked or was cancelled.
    Worker(String),
}

impl ReplicationError {
    /// True only for failures that left stores diverged with no automatic fix.
    pub fn is_severe(&self) -> bool {
        matches!(self, Self::CompensationFailure(_))
    }

    /// Outcome of the write that failed, when one was recorded.
    pub fn outcome(&self) -> Option<&ReplicationOutcome> {
        match self {
            Self::PartialReplication(outcome) | Self::CompensationFailure(outcome) => {
                Some(outcome)
            }
            _ => None,
        }
    }
}

impl Display for ReplicationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connectivity(err) => write!(f, "{err}"),
            Self::ConstraintViolation(err) => write!(f, "constraint violation: {err}"),
            Self::UnknownPartition(err) => write!(f, "{err}"),
            Self::PartialReplication(outcome) => write!(
                f,
                "{} of {} only partially replicated ({:?}); failed on: {}",
                outcome.operation,
                outcome.id,
                outcome.state,
                join_roles(&outcome.failed_roles())
            ),
            Self::CompensationFailure(outcome) => write!(
                f,
                "{} of {} left stores inconsistent; manual reconciliation needed on: {}",
                outcome.operation,
                outcome.id,
                join_roles(&outcome.diverged_roles())
            ),
            Self::DuplicateIdentifier(id) => write!(f, "duplicate student id: {id}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::SyncIncomplete(report) => write!(
                f,
                "resync incomplete: {}/{} missing records inserted; failing targets: {}",
                report.total_inserted(),
                report.total_missing(),
                join_roles(&report.failed_targets())
            ),
            Self::Worker(message) => write!(f, "store worker failed: {message}"),
        }
    }
}

impl Error for ReplicationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Connectivity(err) => Some(err),
            Self::ConstraintViolation(err) => Some(err),
            Self::UnknownPartition(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ReplicationError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Connectivity(err) => Self::Connectivity(err),
            RepoError::Validation(err) => Self::ConstraintViolation(err),
            RepoError::DuplicateId(id) => Self::DuplicateIdentifier(id),
            other => Self::Store(other),
        }
    }
}

impl From<StudentValidationError> for ReplicationError {
    fn from(value: StudentValidationError) -> Self {
        Self::ConstraintViolation(value)
    }
}

impl From<RegistryError> for ReplicationError {
    fn from(value: RegistryError) -> Self {
        Self::UnknownPartition(value)
    }
}

fn join_roles<T: Display>(roles: &[T]) -> String {
    if roles.is_empty() {
        return "none".to_string();
    }
    roles
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
