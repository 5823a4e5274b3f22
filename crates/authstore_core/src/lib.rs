//! Transactional storage core for the identity store.
//! Owns retry, failure classification and cross-recipe user listing.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod txn;

pub use config::{RetryPolicy, StorageConfig};
pub use db::{open_db, open_db_in_memory, ConnectionPool, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::key_value::KeyValueInfo;
pub use model::pagination::{PaginationCursor, SortOrder, UserListQuery, UserPage};
pub use model::user::{
    AuthRecipeUser, EmailPasswordUser, NewUser, PasswordResetToken, PasswordlessUser, RecipeId,
    ThirdPartyUser, UserValidationError,
};
pub use repo::key_value_repo::KeyValueStore;
pub use service::signing_keys::SigningKeyService;
pub use service::user_directory::UserDirectory;
pub use txn::{
    ConflictClassification, ConstraintRules, ConstraintViolation, DomainViolation, DriverError,
    IsolationLevel, StorageError, StorageResult, TransactionCoordinator, TransactionObserver,
    TransactionOptions, Txn, ViolationKind, WorkError, WorkResult,
};

/// Liveness probe for embedding applications.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
