//! Keyset pagination over the user registry.
//!
//! # Invariants
//! - Rows are ordered by `time_joined` in the requested direction, then by
//!   `user_id` descending regardless of direction.
//! - A cursor names the first row of the page it opens (inclusive).

use super::user::{AuthRecipeUser, RecipeId, UserId};
use serde::{Deserialize, Serialize};

/// Direction of the primary `time_joined` sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }

    /// Comparison that moves strictly past a cursor's `time_joined`.
    pub(crate) fn past_operator(self) -> &'static str {
        match self {
            Self::Ascending => ">",
            Self::Descending => "<",
        }
    }
}

/// Position in the registry ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationCursor {
    pub time_joined: i64,
    pub user_id: UserId,
}

impl PaginationCursor {
    pub fn new(time_joined: i64, user_id: impl Into<String>) -> Self {
        Self {
            time_joined,
            user_id: user_id.into(),
        }
    }
}

/// Parameters for one listing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserListQuery {
    pub limit: u32,
    pub order: SortOrder,
    /// `None` lists every recipe.
    pub recipe_filter: Option<Vec<RecipeId>>,
    pub cursor: Option<PaginationCursor>,
}

impl UserListQuery {
    pub fn new(limit: u32, order: SortOrder) -> Self {
        Self {
            limit,
            order,
            recipe_filter: None,
            cursor: None,
        }
    }

    pub fn with_recipes(mut self, recipes: impl IntoIterator<Item = RecipeId>) -> Self {
        self.recipe_filter = Some(recipes.into_iter().collect());
        self
    }

    pub fn with_cursor(mut self, cursor: PaginationCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Validates caller input.
    ///
    /// # Errors
    /// - `limit` is zero.
    /// - `recipe_filter` is present but empty.
    pub fn validate(&self) -> Result<(), String> {
        if self.limit == 0 {
            return Err("limit must be at least 1".to_string());
        }
        if matches!(&self.recipe_filter, Some(recipes) if recipes.is_empty()) {
            return Err("recipe_filter must not be empty when present".to_string());
        }
        Ok(())
    }
}

/// One page of users plus the cursor that opens the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPage {
    pub users: Vec<AuthRecipeUser>,
    pub next_cursor: Option<PaginationCursor>,
}

/// Raw registry row. `recipe_id` stays unparsed so unknown values surface
/// as integrity faults instead of decode errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRow {
    pub user_id: UserId,
    pub recipe_id: String,
    pub time_joined: i64,
}
