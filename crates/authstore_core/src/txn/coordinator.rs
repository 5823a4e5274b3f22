//! Transaction coordinator with bounded retry on transient conflicts.
//!
//! # Responsibility
//! - Run a unit of work in one connection-bound transaction.
//! - Classify failures once and retry only transient conflicts.
//! - Report retries and exhaustion to an explicitly passed observer.
//!
//! # Invariants
//! - Every attempt gets a fresh connection checkout and a fresh transaction.
//! - A failed attempt is rolled back before the next one starts.
//! - The backoff window is fixed; it does not grow between attempts.
//! - Units of work may run more than once and must be safe to replay.

use super::classify::{classify, ConflictClassification};
use super::constraint::ConstraintRules;
use super::error::{StorageError, StorageResult, WorkError, WorkResult};
use crate::config::{RetryPolicy, StorageConfig};
use crate::db::{ConnectionPool, DbResult};
use crate::model::key_value::KeyValueInfo;
use log::{debug, error, warn};
use rand::Rng;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Requested transaction isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    Serializable,
    RepeatableRead,
    ReadCommitted,
}

impl IsolationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Serializable => "serializable",
            Self::RepeatableRead => "repeatable_read",
            Self::ReadCommitted => "read_committed",
        }
    }

    /// SQLite has one writer: `Serializable` takes the write lock at
    /// `BEGIN`, the weaker levels start as snapshot readers.
    fn behavior(self) -> TransactionBehavior {
        match self {
            Self::Serializable => TransactionBehavior::Immediate,
            Self::RepeatableRead | Self::ReadCommitted => TransactionBehavior::Deferred,
        }
    }
}

/// Receives retry notifications from a [`TransactionCoordinator`].
pub trait TransactionObserver: Send + Sync {
    /// Called after `attempt` failed transiently and before it is replayed.
    fn on_retry(&self, _attempt: u32, _classification: &ConflictClassification) {}

    /// Called once when the last allowed attempt failed transiently.
    fn on_exhausted(&self, _attempts: u32, _classification: &ConflictClassification) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransactionObserver for NoopObserver {}

/// Per-call overrides for [`TransactionCoordinator::execute_with`].
#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions<'r> {
    pub isolation: IsolationLevel,
    /// Falls back to the coordinator's retry policy when `None`.
    pub max_attempts: Option<u32>,
    pub constraints: &'r ConstraintRules,
}

impl TransactionOptions<'static> {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            max_attempts: None,
            constraints: ConstraintRules::none(),
        }
    }
}

impl<'r> TransactionOptions<'r> {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_constraints<'n>(self, constraints: &'n ConstraintRules) -> TransactionOptions<'n> {
        TransactionOptions {
            isolation: self.isolation,
            max_attempts: self.max_attempts,
            constraints,
        }
    }
}

/// Open transaction handed to a unit of work.
pub struct Txn<'conn> {
    inner: Transaction<'conn>,
    isolation: IsolationLevel,
    attempt: u32,
    held: HashMap<String, Option<KeyValueInfo>>,
}

impl<'conn> Txn<'conn> {
    pub fn connection(&self) -> &Connection {
        &self.inner
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// 1-based attempt number of the enclosing `execute` call.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Row state recorded by a prior `get_for_update` in this transaction.
    pub(crate) fn held_row(&self, key: &str) -> Option<&Option<KeyValueInfo>> {
        self.held.get(key)
    }

    pub(crate) fn hold_row(&mut self, key: &str, row: Option<KeyValueInfo>) {
        self.held.insert(key.to_string(), row);
    }

    fn commit(self) -> rusqlite::Result<()> {
        self.inner.commit()
    }

    fn rollback(self) -> rusqlite::Result<()> {
        self.inner.rollback()
    }
}

/// Runs units of work against a [`ConnectionPool`] with bounded retry.
#[derive(Clone)]
pub struct TransactionCoordinator {
    pool: Arc<ConnectionPool>,
    retry: RetryPolicy,
    observer: Arc<dyn TransactionObserver>,
}

impl TransactionCoordinator {
    pub fn new(pool: Arc<ConnectionPool>, retry: RetryPolicy) -> Self {
        Self {
            pool,
            retry,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Opens the pool at `path` and builds a coordinator from `config`.
    pub fn open(path: impl AsRef<Path>, config: &StorageConfig) -> DbResult<Self> {
        let pool = ConnectionPool::open(path, config)?;
        Ok(Self::new(Arc::new(pool), config.retry))
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransactionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Runs `work` at `isolation` with the configured retry policy and no
    /// constraint rules.
    pub fn execute<T, F>(&self, isolation: IsolationLevel, work: F) -> StorageResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> WorkResult<T>,
    {
        self.execute_with(&TransactionOptions::new(isolation), work)
    }

    /// Runs `work` in a transaction, replaying it on transient conflicts.
    ///
    /// # Errors
    /// - `TransientConflictExhausted` when every attempt conflicted.
    /// - `DomainConstraintViolation` when a constraint failure matches
    ///   `options.constraints`.
    /// - `Unclassified` for any other driver failure.
    /// - Any `StorageError` returned by `work` itself, unchanged.
    pub fn execute_with<T, F>(&self, options: &TransactionOptions<'_>, mut work: F) -> StorageResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> WorkResult<T>,
    {
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.retry.max_attempts)
            .max(1);
        let isolation = options.isolation;
        let started_at = Instant::now();
        let mut attempt = 1;

        loop {
            let source = match self.run_attempt(isolation, attempt, &mut work) {
                Ok(value) => {
                    debug!(
                        "event=txn_commit module=txn status=ok isolation={} attempt={} duration_ms={}",
                        isolation.as_str(),
                        attempt,
                        started_at.elapsed().as_millis()
                    );
                    return Ok(value);
                }
                Err(WorkError::Storage(err)) => {
                    log_storage_failure(isolation, attempt, &err);
                    return Err(err);
                }
                Err(WorkError::Driver(source)) => source,
            };

            let classification = classify(&source);
            if classification.is_transient() && attempt < max_attempts {
                warn!(
                    "event=txn_retry module=txn status=retry isolation={} attempt={} max_attempts={} class={} error={}",
                    isolation.as_str(),
                    attempt,
                    max_attempts,
                    classification,
                    source
                );
                self.observer.on_retry(attempt, &classification);
                std::thread::sleep(self.backoff());
                attempt += 1;
                continue;
            }

            if classification.is_transient() {
                warn!(
                    "event=txn_exhausted module=txn status=error isolation={} attempts={} class={} error={}",
                    isolation.as_str(),
                    attempt,
                    classification,
                    source
                );
                self.observer.on_exhausted(attempt, &classification);
            }

            let err = StorageError::from_failure(classification, source, attempt, options.constraints);
            log_storage_failure(isolation, attempt, &err);
            return Err(err);
        }
    }

    /// Runs one read on a pooled connection without opening a transaction.
    ///
    /// Failures are classified like transactional ones but never retried.
    pub fn read<T, F>(&self, work: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> WorkResult<T>,
    {
        let outcome = self
            .pool
            .acquire()
            .map_err(WorkError::from)
            .and_then(|conn| work(&conn));

        match outcome {
            Ok(value) => Ok(value),
            Err(WorkError::Storage(err)) => Err(err),
            Err(WorkError::Driver(source)) => {
                let classification = classify(&source);
                Err(StorageError::from_failure(
                    classification,
                    source,
                    1,
                    ConstraintRules::none(),
                ))
            }
        }
    }

    fn run_attempt<T, F>(&self, isolation: IsolationLevel, attempt: u32, work: &mut F) -> WorkResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> WorkResult<T>,
    {
        let mut conn = self.pool.acquire()?;
        let inner = conn.transaction_with_behavior(isolation.behavior())?;
        let mut txn = Txn {
            inner,
            isolation,
            attempt,
            held: HashMap::new(),
        };

        match work(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback() {
                    warn!(
                        "event=txn_rollback module=txn status=error attempt={} error={}",
                        attempt, rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    fn backoff(&self) -> Duration {
        let RetryPolicy {
            backoff_min_ms: min,
            backoff_max_ms: max,
            ..
        } = self.retry;
        let millis = if min < max {
            rand::thread_rng().gen_range(min..max)
        } else {
            min
        };
        Duration::from_millis(millis)
    }
}

fn log_storage_failure(isolation: IsolationLevel, attempt: u32, err: &StorageError) {
    match err {
        StorageError::IntegrityFault(message) => error!(
            "event=integrity_fault module=txn status=error isolation={} attempt={} error={}",
            isolation.as_str(),
            attempt,
            message
        ),
        other => debug!(
            "event=txn_failed module=txn status=error isolation={} attempt={} error={}",
            isolation.as_str(),
            attempt,
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{IsolationLevel, TransactionCoordinator, TransactionOptions};
    use crate::config::{RetryPolicy, StorageConfig};
    use crate::db::ConnectionPool;
    use crate::txn::{DriverError, StorageError, WorkError};
    use std::cell::Cell;
    use std::sync::Arc;
    use std::time::Duration;

    fn coordinator(dir: &tempfile::TempDir) -> TransactionCoordinator {
        let config = StorageConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                backoff_min_ms: 0,
                backoff_max_ms: 1,
            },
            ..StorageConfig::default()
        };
        TransactionCoordinator::open(dir.path().join("txn.db"), &config).unwrap()
    }

    #[test]
    fn isolation_levels_map_to_begin_behavior() {
        use rusqlite::TransactionBehavior;

        assert!(matches!(
            IsolationLevel::Serializable.behavior(),
            TransactionBehavior::Immediate
        ));
        assert!(matches!(
            IsolationLevel::RepeatableRead.behavior(),
            TransactionBehavior::Deferred
        ));
        assert!(matches!(
            IsolationLevel::ReadCommitted.behavior(),
            TransactionBehavior::Deferred
        ));
    }

    #[test]
    fn backoff_stays_in_the_default_window() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator =
            TransactionCoordinator::open(dir.path().join("backoff.db"), &StorageConfig::default())
                .unwrap();

        for _ in 0..500 {
            let delay = coordinator.backoff();
            assert!(delay >= Duration::from_millis(10), "{delay:?} below window");
            assert!(delay < Duration::from_millis(30), "{delay:?} above window");
        }
    }

    #[test]
    fn backoff_with_collapsed_window_is_constant() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(dir.path().join("flat.db"), &StorageConfig::default())
            .unwrap();
        let coordinator = TransactionCoordinator::new(
            Arc::new(pool),
            RetryPolicy {
                max_attempts: 3,
                backoff_min_ms: 7,
                backoff_max_ms: 7,
            },
        );

        for _ in 0..20 {
            assert_eq!(coordinator.backoff(), Duration::from_millis(7));
        }
    }

    #[test]
    fn failed_attempt_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(&dir);

        let result: Result<(), StorageError> =
            coordinator.execute(IsolationLevel::Serializable, |txn| {
                txn.connection().execute(
                    "INSERT INTO key_value (name, value, created_at_time) VALUES ('k', 'v', 1);",
                    [],
                )?;
                Err(DriverError::new("boom").into())
            });
        assert!(matches!(result, Err(StorageError::Unclassified(_))));

        let count: i64 = coordinator
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM key_value;", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn attempt_number_is_visible_to_work() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(&dir);
        let seen = Cell::new(0);

        let attempt = coordinator
            .execute_with(
                &TransactionOptions::new(IsolationLevel::RepeatableRead).with_max_attempts(2),
                |txn| {
                    seen.set(seen.get() + 1);
                    if txn.attempt() == 1 {
                        return Err(WorkError::from(
                            DriverError::new("conflict").with_sql_state("40001"),
                        ));
                    }
                    Ok(txn.attempt())
                },
            )
            .unwrap();

        assert_eq!(attempt, 2);
        assert_eq!(seen.get(), 2);
    }
}
