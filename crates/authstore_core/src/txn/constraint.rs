//! Constraint-failure resolution into domain violations.
//!
//! # Responsibility
//! - Decide which violation kind a constraint identifier denotes for a
//!   logical `(table, column)` using the fixed naming convention.
//! - Let each recipe register which `(table, column)` pairs raise which
//!   domain violation.
//!
//! # Invariants
//! - Convention: `{table}_pkey`, `{table}_{column}_key`, `{table}_{column}_fkey`.
//! - The resolver knows table and column names only, never recipe semantics.
//! - Rules are matched in registration order; the first match wins.

use super::classify::{ConstraintFailure, ConstraintFamily};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Which invariant a constraint failure violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    DuplicatePrimaryKey,
    DuplicateUniqueColumn,
    /// Referenced row does not exist.
    UnknownForeignKey,
}

impl ViolationKind {
    pub fn family(self) -> ConstraintFamily {
        match self {
            Self::DuplicatePrimaryKey | Self::DuplicateUniqueColumn => ConstraintFamily::Unique,
            Self::UnknownForeignKey => ConstraintFamily::ForeignKey,
        }
    }

    /// Conventional constraint identifier for this kind on `(table, column)`.
    pub fn constraint_name(self, table: &str, column: &str) -> String {
        match self {
            Self::DuplicatePrimaryKey => format!("{table}_pkey"),
            Self::DuplicateUniqueColumn => format!("{table}_{column}_key"),
            Self::UnknownForeignKey => format!("{table}_{column}_fkey"),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::DuplicatePrimaryKey => "duplicate_primary_key",
            Self::DuplicateUniqueColumn => "duplicate_unique_column",
            Self::UnknownForeignKey => "unknown_foreign_key",
        }
    }
}

impl Display for ViolationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the violation kind `constraint` denotes for `(table, column)`.
pub fn violation_kind(constraint: &str, table: &str, column: &str) -> Option<ViolationKind> {
    [
        ViolationKind::DuplicatePrimaryKey,
        ViolationKind::DuplicateUniqueColumn,
        ViolationKind::UnknownForeignKey,
    ]
    .into_iter()
    .find(|kind| kind.constraint_name(table, column) == constraint)
}

/// Domain error a recipe wants raised for a constraint failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainViolation {
    DuplicateUserId,
    DuplicateEmail,
    DuplicatePhoneNumber,
    DuplicateThirdPartyUser,
    DuplicatePasswordResetToken,
    UnknownUserId,
}

impl Display for DomainViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::DuplicateUserId => "user id already exists",
            Self::DuplicateEmail => "email already in use",
            Self::DuplicatePhoneNumber => "phone number already in use",
            Self::DuplicateThirdPartyUser => "third party account already linked",
            Self::DuplicatePasswordResetToken => "password reset token already exists",
            Self::UnknownUserId => "unknown user id",
        };
        f.write_str(message)
    }
}

/// One registered `(table, column) -> violation` mapping.
///
/// For composite keys `column` lists the key columns joined by `", "`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintRule {
    pub kind: ViolationKind,
    pub table: String,
    pub column: String,
    pub violation: DomainViolation,
}

impl ConstraintRule {
    fn matches_name(&self, constraint: &str) -> bool {
        violation_kind(constraint, &self.table, &self.column) == Some(self.kind)
    }

    fn matches_columns(&self, failure: &ConstraintFailure) -> bool {
        self.kind.family() == failure.family
            && !failure.key_columns.is_empty()
            && failure.key_columns.join(", ") == self.column
    }

    fn to_violation(&self) -> ConstraintViolation {
        ConstraintViolation {
            kind: self.kind,
            table: self.table.clone(),
            column: self.column.clone(),
            violation: self.violation,
        }
    }
}

/// Resolved constraint failure surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub kind: ViolationKind,
    pub table: String,
    pub column: String,
    pub violation: DomainViolation,
}

impl Display for ConstraintViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} on {}.{})",
            self.violation, self.kind, self.table, self.column
        )
    }
}

static NO_RULES: ConstraintRules = ConstraintRules { rules: Vec::new() };

/// Ordered set of constraint rules registered for one write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintRules {
    rules: Vec<ConstraintRule>,
}

impl ConstraintRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared empty rule set.
    pub fn none() -> &'static ConstraintRules {
        &NO_RULES
    }

    pub fn primary_key(
        self,
        table: impl Into<String>,
        key_column: impl Into<String>,
        violation: DomainViolation,
    ) -> Self {
        self.with_rule(ViolationKind::DuplicatePrimaryKey, table, key_column, violation)
    }

    pub fn unique(
        self,
        table: impl Into<String>,
        column: impl Into<String>,
        violation: DomainViolation,
    ) -> Self {
        self.with_rule(ViolationKind::DuplicateUniqueColumn, table, column, violation)
    }

    pub fn foreign_key(
        self,
        table: impl Into<String>,
        column: impl Into<String>,
        violation: DomainViolation,
    ) -> Self {
        self.with_rule(ViolationKind::UnknownForeignKey, table, column, violation)
    }

    fn with_rule(
        mut self,
        kind: ViolationKind,
        table: impl Into<String>,
        column: impl Into<String>,
        violation: DomainViolation,
    ) -> Self {
        self.rules.push(ConstraintRule {
            kind,
            table: table.into(),
            column: column.into(),
            violation,
        });
        self
    }

    pub fn rules(&self) -> &[ConstraintRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolves a classified constraint failure against the registered rules.
    ///
    /// Order: constraint identifier, then reported key columns, then, for
    /// engines that report neither on foreign-key failures, the single
    /// registered foreign-key rule.
    pub fn resolve(&self, failure: &ConstraintFailure) -> Option<ConstraintViolation> {
        if let Some(constraint) = failure.constraint.as_deref() {
            if let Some(rule) = self.rules.iter().find(|rule| rule.matches_name(constraint)) {
                return Some(rule.to_violation());
            }
        }

        if let Some(rule) = self
            .rules
            .iter()
            .find(|rule| rule.matches_columns(failure))
        {
            return Some(rule.to_violation());
        }

        if failure.family == ConstraintFamily::ForeignKey
            && failure.constraint.is_none()
            && failure.key_columns.is_empty()
        {
            let mut foreign_keys = self
                .rules
                .iter()
                .filter(|rule| rule.kind == ViolationKind::UnknownForeignKey);
            if let (Some(only), None) = (foreign_keys.next(), foreign_keys.next()) {
                return Some(only.to_violation());
            }
        }

        None
    }
}
