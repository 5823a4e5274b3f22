//! Raw driver failures and their conflict classification.
//!
//! # Responsibility
//! - Normalize driver failures into one structured shape (`DriverError`).
//! - Map a failure to exactly one `ConflictClassification`.
//!
//! # Invariants
//! - The structured path (code family + constraint identifier) runs first.
//! - The message path is kept for deployments whose errors lack usable
//!   metadata (custom constraint names, wrapped drivers). For the same
//!   condition both paths yield the same classification.
//! - SQLite failures always carry result codes, so the message path only
//!   sees `DriverError`s built by wrapped or foreign drivers.
//! - Anything neither path recognizes is `Fatal`.

use crate::db::DbError;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::ffi;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Code family for "transaction rollback" conditions.
pub const TRANSACTION_ROLLBACK_CLASS: &str = "40";
pub const SERIALIZATION_FAILURE: &str = "40001";
pub const DEADLOCK_DETECTED: &str = "40P01";
pub const UNIQUE_VIOLATION: &str = "23505";
pub const FOREIGN_KEY_VIOLATION: &str = "23503";

static CONSTRAINT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"constraint "([^"]+)""#).expect("valid constraint name regex"));
static KEY_DETAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Key \(([^)]+)\)").expect("valid key detail regex"));
static SQLITE_FAILED_COLUMNS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"constraint failed: (.+)$").expect("valid sqlite columns regex"));

/// Structured failure reported by the storage driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    sql_state: Option<String>,
    constraint: Option<String>,
    message: String,
}

impl DriverError {
    /// Creates a failure carrying only a message (no structured metadata).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            sql_state: None,
            constraint: None,
            message: message.into(),
        }
    }

    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.sql_state {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Error for DriverError {}

impl From<rusqlite::Error> for DriverError {
    fn from(value: rusqlite::Error) -> Self {
        let rusqlite::Error::SqliteFailure(failure, message) = &value else {
            return Self::new(value.to_string());
        };

        let message = message.clone().unwrap_or_else(|| failure.to_string());
        match failure.code {
            ErrorCode::DatabaseBusy if failure.extended_code == ffi::SQLITE_BUSY_SNAPSHOT => {
                Self::new(message).with_sql_state(SERIALIZATION_FAILURE)
            }
            // SQLite reports a lock cycle between two upgrading writers as BUSY.
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                Self::new(message).with_sql_state(DEADLOCK_DETECTED)
            }
            ErrorCode::ConstraintViolation => sqlite_constraint_error(failure.extended_code, message),
            _ => Self::new(message),
        }
    }
}

impl From<DbError> for DriverError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => err.into(),
            other => Self::new(other.to_string()),
        }
    }
}

/// SQLite names no constraint in its errors; derive the conventional
/// identifier from the reported `table.column` list instead.
fn sqlite_constraint_error(extended_code: i32, message: String) -> DriverError {
    let columns = sqlite_failed_columns(&message);
    let table = columns.first().map(|(table, _)| table.clone());

    match (extended_code, table) {
        (ffi::SQLITE_CONSTRAINT_PRIMARYKEY, Some(table)) => DriverError::new(message)
            .with_sql_state(UNIQUE_VIOLATION)
            .with_constraint(format!("{table}_pkey")),
        (ffi::SQLITE_CONSTRAINT_UNIQUE, Some(table)) => {
            let joined = columns
                .iter()
                .map(|(_, column)| column.as_str())
                .collect::<Vec<_>>()
                .join("_");
            DriverError::new(message)
                .with_sql_state(UNIQUE_VIOLATION)
                .with_constraint(format!("{table}_{joined}_key"))
        }
        (ffi::SQLITE_CONSTRAINT_FOREIGNKEY, _) => {
            DriverError::new(message).with_sql_state(FOREIGN_KEY_VIOLATION)
        }
        _ => DriverError::new(message),
    }
}

fn sqlite_failed_columns(message: &str) -> Vec<(String, String)> {
    let Some(captures) = SQLITE_FAILED_COLUMNS_RE.captures(message) else {
        return Vec::new();
    };
    captures[1]
        .split(',')
        .filter_map(|entry| {
            let (table, column) = entry.trim().split_once('.')?;
            Some((table.to_string(), column.to_string()))
        })
        .collect()
}

/// Which kind of integrity constraint failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintFamily {
    /// Primary-key or unique-column duplicate.
    Unique,
    ForeignKey,
}

/// Constraint failure details extracted from a driver error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintFailure {
    pub family: ConstraintFamily,
    /// Engine-reported (or derived) constraint identifier, when available.
    pub constraint: Option<String>,
    /// Columns named by the failure detail, in reported order.
    pub key_columns: Vec<String>,
}

/// Result of classifying one driver failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictClassification {
    SerializationConflict,
    DeadlockDetected,
    ConstraintViolation(ConstraintFailure),
    Fatal,
}

impl ConflictClassification {
    /// Returns whether replaying the unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SerializationConflict | Self::DeadlockDetected)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SerializationConflict => "serialization_conflict",
            Self::DeadlockDetected => "deadlock_detected",
            Self::ConstraintViolation(_) => "constraint_violation",
            Self::Fatal => "fatal",
        }
    }
}

impl Display for ConflictClassification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifies one driver failure.
pub fn classify(error: &DriverError) -> ConflictClassification {
    classify_structured(error)
        .or_else(|| classify_message(error.message()))
        .unwrap_or(ConflictClassification::Fatal)
}

/// Structured path: code family and constraint identifier.
///
/// Returns `None` when the metadata is missing or inconclusive.
pub fn classify_structured(error: &DriverError) -> Option<ConflictClassification> {
    let code = error.sql_state()?;

    if code.starts_with(TRANSACTION_ROLLBACK_CLASS) {
        return Some(if code == DEADLOCK_DETECTED {
            ConflictClassification::DeadlockDetected
        } else {
            ConflictClassification::SerializationConflict
        });
    }

    let family = match code {
        UNIQUE_VIOLATION => ConstraintFamily::Unique,
        FOREIGN_KEY_VIOLATION => ConstraintFamily::ForeignKey,
        _ => return None,
    };

    Some(ConflictClassification::ConstraintViolation(
        ConstraintFailure {
            family,
            constraint: error
                .constraint()
                .map(str::to_string)
                .or_else(|| quoted_constraint_name(error.message())),
            key_columns: key_columns(error.message()),
        },
    ))
}

/// Legacy path: substring match on the failure text.
pub fn classify_message(message: &str) -> Option<ConflictClassification> {
    let lowered = message.to_ascii_lowercase();

    if lowered.contains("concurrent update")
        || lowered.contains("the transaction might succeed if retried")
    {
        return Some(ConflictClassification::SerializationConflict);
    }
    if lowered.contains("deadlock") {
        return Some(ConflictClassification::DeadlockDetected);
    }

    let family = if lowered.contains("duplicate key") {
        ConstraintFamily::Unique
    } else if lowered.contains("foreign key") {
        ConstraintFamily::ForeignKey
    } else {
        return None;
    };

    // Without a named-column hint the failure cannot be attributed.
    let key_columns = key_columns(message);
    if key_columns.is_empty() {
        return None;
    }

    Some(ConflictClassification::ConstraintViolation(
        ConstraintFailure {
            family,
            constraint: quoted_constraint_name(message),
            key_columns,
        },
    ))
}

fn quoted_constraint_name(message: &str) -> Option<String> {
    CONSTRAINT_NAME_RE
        .captures(message)
        .map(|captures| captures[1].to_string())
}

/// Columns from a `Key (a, b)=...` detail or a SQLite
/// `constraint failed: t.a, t.b` suffix.
fn key_columns(message: &str) -> Vec<String> {
    if let Some(captures) = KEY_DETAIL_RE.captures(message) {
        return captures[1]
            .split(',')
            .map(|column| column.trim().to_string())
            .filter(|column| !column.is_empty())
            .collect();
    }
    sqlite_failed_columns(message)
        .into_iter()
        .map(|(_, column)| column)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        classify, classify_message, classify_structured, key_columns, ConflictClassification,
        ConstraintFailure, ConstraintFamily, DriverError,
    };

    #[test]
    fn rollback_family_codes_are_transient() {
        let serialization = DriverError::new("boom").with_sql_state("40001");
        let deadlock = DriverError::new("boom").with_sql_state("40P01");
        let other_rollback = DriverError::new("boom").with_sql_state("40002");

        assert_eq!(
            classify(&serialization),
            ConflictClassification::SerializationConflict
        );
        assert_eq!(classify(&deadlock), ConflictClassification::DeadlockDetected);
        assert_eq!(
            classify(&other_rollback),
            ConflictClassification::SerializationConflict
        );
    }

    #[test]
    fn unknown_failures_are_fatal() {
        let error = DriverError::new("relation \"users\" does not exist").with_sql_state("42P01");
        assert_eq!(classify(&error), ConflictClassification::Fatal);
        assert_eq!(
            classify(&DriverError::new("connection reset by peer")),
            ConflictClassification::Fatal
        );
    }

    #[test]
    fn message_path_recognizes_legacy_phrases() {
        assert_eq!(
            classify_message("ERROR: could not serialize access due to concurrent update"),
            Some(ConflictClassification::SerializationConflict)
        );
        assert_eq!(
            classify_message("HINT: The transaction might succeed if retried."),
            Some(ConflictClassification::SerializationConflict)
        );
        assert_eq!(
            classify_message("ERROR: Deadlock detected"),
            Some(ConflictClassification::DeadlockDetected)
        );
    }

    #[test]
    fn duplicate_key_without_column_hint_is_not_attributed() {
        assert_eq!(
            classify_message("ERROR: duplicate key value violates unique constraint"),
            None
        );
    }

    #[test]
    fn both_paths_agree_on_unique_violation() {
        let message = "ERROR: duplicate key value violates unique constraint \"t_email_key\"\n  Detail: Key (email)=(a@b.c) already exists.";
        let structured = DriverError::new(message)
            .with_sql_state("23505")
            .with_constraint("t_email_key");

        let expected = ConflictClassification::ConstraintViolation(ConstraintFailure {
            family: ConstraintFamily::Unique,
            constraint: Some("t_email_key".to_string()),
            key_columns: vec!["email".to_string()],
        });
        assert_eq!(classify_structured(&structured), Some(expected.clone()));
        assert_eq!(classify_message(message), Some(expected.clone()));
        assert_eq!(classify(&DriverError::new(message)), expected);
    }

    #[test]
    fn both_paths_agree_on_foreign_key_violation() {
        let message = "ERROR: insert or update on table \"tokens\" violates foreign key constraint \"tokens_user_id_fkey\"\n  Detail: Key (user_id)=(u1) is not present in table \"users\".";
        let structured = DriverError::new(message).with_sql_state("23503");

        let from_structured = classify_structured(&structured).unwrap();
        let from_message = classify_message(message).unwrap();
        assert_eq!(from_structured, from_message);
        match from_message {
            ConflictClassification::ConstraintViolation(failure) => {
                assert_eq!(failure.family, ConstraintFamily::ForeignKey);
                assert_eq!(failure.constraint.as_deref(), Some("tokens_user_id_fkey"));
                assert_eq!(failure.key_columns, vec!["user_id".to_string()]);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn both_paths_agree_on_transient_conditions() {
        let serialization = "ERROR: could not serialize access due to concurrent update";
        assert_eq!(
            classify_structured(&DriverError::new(serialization).with_sql_state("40001")),
            classify_message(serialization)
        );

        let deadlock = "ERROR: deadlock detected";
        assert_eq!(
            classify_structured(&DriverError::new(deadlock).with_sql_state("40P01")),
            classify_message(deadlock)
        );
    }

    #[test]
    fn key_columns_parse_composite_keys_and_sqlite_suffix() {
        assert_eq!(
            key_columns("Detail: Key (user_id, token)=(a, b) already exists."),
            vec!["user_id".to_string(), "token".to_string()]
        );
        assert_eq!(
            key_columns("UNIQUE constraint failed: thirdparty_users.third_party_id, thirdparty_users.third_party_user_id"),
            vec!["third_party_id".to_string(), "third_party_user_id".to_string()]
        );
        assert!(key_columns("FOREIGN KEY constraint failed").is_empty());
    }

    #[test]
    fn sqlite_busy_maps_to_deadlock_family() {
        let error: DriverError = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        )
        .into();
        assert_eq!(error.sql_state(), Some("40P01"));
        assert_eq!(classify(&error), ConflictClassification::DeadlockDetected);
    }

    #[test]
    fn sqlite_unique_failure_derives_conventional_name() {
        let error: DriverError = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: emailpassword_users.email".to_string()),
        )
        .into();
        assert_eq!(error.sql_state(), Some("23505"));
        assert_eq!(error.constraint(), Some("emailpassword_users_email_key"));
    }
}
