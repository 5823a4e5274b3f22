//! Caller-facing storage error taxonomy.

use super::classify::{ConflictClassification, DriverError};
use super::constraint::{ConstraintRules, ConstraintViolation};
use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StorageResult<T> = Result<T, StorageError>;

/// Failure surfaced by the transaction engine and everything built on it.
#[derive(Debug)]
pub enum StorageError {
    /// Every attempt hit a transient conflict.
    TransientConflictExhausted {
        attempts: u32,
        last: ConflictClassification,
        source: DriverError,
    },
    /// A constraint failure a registered rule attributed to the domain.
    DomainConstraintViolation(ConstraintViolation),
    /// A driver failure with no domain meaning.
    Unclassified(DriverError),
    /// Persisted state breaks a cross-table invariant.
    IntegrityFault(String),
    /// Caller input rejected before any transaction opened.
    InvalidArgument(String),
}

impl StorageError {
    /// Maps one classified, non-retried failure into the taxonomy.
    pub(crate) fn from_failure(
        classification: ConflictClassification,
        source: DriverError,
        attempts: u32,
        rules: &ConstraintRules,
    ) -> Self {
        match classification {
            last @ (ConflictClassification::SerializationConflict
            | ConflictClassification::DeadlockDetected) => Self::TransientConflictExhausted {
                attempts,
                last,
                source,
            },
            ConflictClassification::ConstraintViolation(failure) => match rules.resolve(&failure) {
                Some(violation) => Self::DomainConstraintViolation(violation),
                None => Self::Unclassified(source),
            },
            ConflictClassification::Fatal => Self::Unclassified(source),
        }
    }

    /// Returns whether the caller may reasonably retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientConflictExhausted { .. } | Self::Unclassified(_)
        )
    }

    /// Domain violation carried by this error, if any.
    pub fn violation(&self) -> Option<&ConstraintViolation> {
        match self {
            Self::DomainConstraintViolation(violation) => Some(violation),
            _ => None,
        }
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientConflictExhausted {
                attempts,
                last,
                source,
            } => write!(
                f,
                "transaction gave up after {attempts} attempts ({last}): {source}"
            ),
            Self::DomainConstraintViolation(violation) => write!(f, "{violation}"),
            Self::Unclassified(source) => write!(f, "storage failure: {source}"),
            Self::IntegrityFault(message) => write!(f, "integrity fault: {message}"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::TransientConflictExhausted { source, .. } | Self::Unclassified(source) => {
                Some(source)
            }
            _ => None,
        }
    }
}

pub type WorkResult<T> = Result<T, WorkError>;

/// Failure returned from inside a unit of work.
///
/// `Driver` is classified by the coordinator. `Storage` is already in the
/// taxonomy and passes through untouched.
#[derive(Debug)]
pub enum WorkError {
    Driver(DriverError),
    Storage(StorageError),
}

impl Display for WorkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Driver(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for WorkError {}

impl From<DriverError> for WorkError {
    fn from(value: DriverError) -> Self {
        Self::Driver(value)
    }
}

impl From<rusqlite::Error> for WorkError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Driver(value.into())
    }
}

impl From<DbError> for WorkError {
    fn from(value: DbError) -> Self {
        Self::Driver(value.into())
    }
}

impl From<StorageError> for WorkError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}
