use authstore_core::repo::registry_repo::{self, RegistryRepository, SqliteRegistryRepository};
use authstore_core::{
    ConflictClassification, DomainViolation, DriverError, IsolationLevel, KeyValueInfo,
    KeyValueStore, RecipeId, RetryPolicy, StorageConfig, StorageError, TransactionCoordinator,
    TransactionObserver, TransactionOptions, WorkError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct CountingObserver {
    retries: AtomicU32,
    exhausted: AtomicU32,
}

impl TransactionObserver for CountingObserver {
    fn on_retry(&self, _attempt: u32, classification: &ConflictClassification) {
        assert!(classification.is_transient());
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn on_exhausted(&self, _attempts: u32, _classification: &ConflictClassification) {
        self.exhausted.fetch_add(1, Ordering::SeqCst);
    }
}

fn setup(dir: &tempfile::TempDir) -> (TransactionCoordinator, Arc<CountingObserver>) {
    let config = StorageConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_min_ms: 1,
            backoff_max_ms: 3,
        },
        ..StorageConfig::default()
    };
    let observer = Arc::new(CountingObserver::default());
    let coordinator = TransactionCoordinator::open(dir.path().join("retry.db"), &config)
        .unwrap()
        .with_observer(observer.clone());
    (coordinator, observer)
}

fn serialization_failure() -> WorkError {
    DriverError::new("could not serialize access due to concurrent update")
        .with_sql_state("40001")
        .into()
}

#[test]
fn conflicts_below_the_bound_give_the_conflict_free_result() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, observer) = setup(&dir);
    KeyValueStore::new(coordinator.clone())
        .set("app_id", &KeyValueInfo::new("app-1", 7))
        .unwrap();

    let read_value = |conflicts: u32| {
        let calls = AtomicU32::new(0);
        coordinator
            .execute(IsolationLevel::RepeatableRead, |txn| {
                if calls.fetch_add(1, Ordering::SeqCst) < conflicts {
                    return Err(serialization_failure());
                }
                let value: String = txn.connection().query_row(
                    "SELECT value FROM key_value WHERE name = 'app_id';",
                    [],
                    |row| row.get(0),
                )?;
                Ok(value)
            })
            .unwrap()
    };

    let clean = read_value(0);
    let replayed = read_value(2);
    assert_eq!(clean, "app-1");
    assert_eq!(replayed, clean);
    assert_eq!(observer.retries.load(Ordering::SeqCst), 2);
    assert_eq!(observer.exhausted.load(Ordering::SeqCst), 0);
}

#[test]
fn conflict_on_every_attempt_is_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, observer) = setup(&dir);
    let calls = AtomicU32::new(0);

    let err = coordinator
        .execute(IsolationLevel::Serializable, |_txn| -> Result<(), WorkError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DriverError::new("deadlock detected").with_sql_state("40P01").into())
        })
        .unwrap_err();

    match &err {
        StorageError::TransientConflictExhausted { attempts, last, .. } => {
            assert_eq!(*attempts, 3);
            assert_eq!(*last, ConflictClassification::DeadlockDetected);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(observer.retries.load(Ordering::SeqCst), 2);
    assert_eq!(observer.exhausted.load(Ordering::SeqCst), 1);
}

#[test]
fn message_only_conflicts_are_retried_too() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, observer) = setup(&dir);

    let err = coordinator
        .execute_with(
            &TransactionOptions::new(IsolationLevel::ReadCommitted).with_max_attempts(2),
            |_txn| -> Result<(), WorkError> {
                Err(DriverError::new("HINT: The transaction might succeed if retried.").into())
            },
        )
        .unwrap_err();

    assert!(matches!(
        err,
        StorageError::TransientConflictExhausted { attempts: 2, .. }
    ));
    assert_eq!(observer.retries.load(Ordering::SeqCst), 1);
}

#[test]
fn constraint_violations_are_attempted_once() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, observer) = setup(&dir);
    coordinator
        .execute(IsolationLevel::Serializable, |txn| {
            SqliteRegistryRepository::new(txn.connection()).insert("u1", RecipeId::EmailPassword, 1)?;
            Ok(())
        })
        .unwrap();

    let rules = registry_repo::sign_up_rules();
    let calls = AtomicU32::new(0);
    let err = coordinator
        .execute_with(
            &TransactionOptions::new(IsolationLevel::Serializable).with_constraints(&rules),
            |txn| {
                calls.fetch_add(1, Ordering::SeqCst);
                SqliteRegistryRepository::new(txn.connection()).insert("u1", RecipeId::ThirdParty, 2)?;
                Ok(())
            },
        )
        .unwrap_err();

    let violation = err.violation().unwrap();
    assert_eq!(violation.violation, DomainViolation::DuplicateUserId);
    assert_eq!(violation.table, "all_auth_recipe_users");
    assert!(!err.is_retryable());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(observer.retries.load(Ordering::SeqCst), 0);
}

#[test]
fn unregistered_constraint_failure_is_unclassified() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _observer) = setup(&dir);

    let err = coordinator
        .execute(IsolationLevel::Serializable, |txn| {
            let registry = SqliteRegistryRepository::new(txn.connection());
            registry.insert("u1", RecipeId::EmailPassword, 1)?;
            registry.insert("u1", RecipeId::EmailPassword, 1)?;
            Ok(())
        })
        .unwrap_err();

    match err {
        StorageError::Unclassified(source) => {
            assert_eq!(source.sql_state(), Some("23505"));
            assert_eq!(source.constraint(), Some("all_auth_recipe_users_pkey"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn storage_errors_from_work_pass_through_unretried() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, observer) = setup(&dir);
    let calls = AtomicU32::new(0);

    let err = coordinator
        .execute(IsolationLevel::RepeatableRead, |_txn| -> Result<(), WorkError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::IntegrityFault("registry row without detail".to_string()).into())
        })
        .unwrap_err();

    assert!(matches!(err, StorageError::IntegrityFault(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(observer.retries.load(Ordering::SeqCst), 0);
}

#[test]
fn only_the_committed_attempt_is_visible() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _observer) = setup(&dir);

    coordinator
        .execute(IsolationLevel::Serializable, |txn| {
            SqliteRegistryRepository::new(txn.connection()).insert(
                &format!("attempt-{}", txn.attempt()),
                RecipeId::Passwordless,
                1,
            )?;
            if txn.attempt() < 3 {
                return Err(serialization_failure());
            }
            Ok(())
        })
        .unwrap();

    let ids: Vec<String> = coordinator
        .read(|conn| {
            let mut stmt = conn.prepare("SELECT user_id FROM all_auth_recipe_users;")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
        .unwrap();
    assert_eq!(ids, vec!["attempt-3".to_string()]);
}
