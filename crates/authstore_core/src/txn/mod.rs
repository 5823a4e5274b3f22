//! Transaction engine: retry coordination and failure classification.
//!
//! # Responsibility
//! - Run units of work in one connection-bound transaction with bounded
//!   retry on transient conflicts.
//! - Classify raw driver failures exactly once, then hand callers a stable
//!   taxonomy (`StorageError`).
//! - Resolve constraint failures into recipe-registered domain violations.
//!
//! # Invariants
//! - Only `SerializationConflict` and `DeadlockDetected` are retried.
//! - Layers above this module never inspect raw driver errors.

pub mod classify;
pub mod constraint;
pub mod coordinator;
pub mod error;

pub use classify::{
    classify, ConflictClassification, ConstraintFailure, ConstraintFamily, DriverError,
};
pub use constraint::{
    violation_kind, ConstraintRule, ConstraintRules, ConstraintViolation, DomainViolation,
    ViolationKind,
};
pub use coordinator::{
    IsolationLevel, NoopObserver, TransactionCoordinator, TransactionObserver,
    TransactionOptions, Txn,
};
pub use error::{StorageError, StorageResult, WorkError, WorkResult};
