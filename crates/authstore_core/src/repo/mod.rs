//! Repository layer: SQL for every table the store owns.
//!
//! # Responsibility
//! - Keep SQLite query details inside the persistence boundary.
//! - Expose per-recipe insert and batch lookup collaborators.
//!
//! # Invariants
//! - `Sqlite*Repository` types never open, commit or retry transactions;
//!   they run on whatever connection the caller provides. Only
//!   `KeyValueStore` drives its own units of work, through the coordinator.
//! - Writes return the raw driver error so the coordinator classifies it once.
//! - Caller values are always bound as parameters, never spliced into SQL.

pub mod emailpassword_repo;
pub mod key_value_repo;
pub mod passwordless_repo;
pub mod recipe;
pub mod registry_repo;
pub mod thirdparty_repo;

use crate::model::user::UserId;

/// Detail-row access every recipe provides.
pub trait RecipeUserRepository {
    type User;

    /// Inserts one detail row. Conflicts surface as raw driver errors.
    fn insert(&self, user: &Self::User) -> rusqlite::Result<()>;

    /// Fetches detail rows for `ids`. Result order is unspecified and ids
    /// without a row are skipped.
    fn batch_get_by_ids(&self, ids: &[UserId]) -> rusqlite::Result<Vec<Self::User>>;

    /// Deletes one detail row. Returns whether a row existed.
    fn delete(&self, user_id: &str) -> rusqlite::Result<bool>;
}

/// `?, ?, ...` with `count` positional placeholders.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
