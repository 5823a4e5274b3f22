//! Registry table (`all_auth_recipe_users`) queries.
//!
//! # Responsibility
//! - Record which recipe owns each user.
//! - Serve the keyset-ordered id listing used by cross-recipe pagination.
//!
//! # Invariants
//! - Ordering is `time_joined {order}, user_id DESC`.
//! - A cursor `(t, u)` admits rows strictly past `t`, or at `t` with
//!   `user_id <= u`. The tie-break does not flip with the direction.

use super::placeholders;
use crate::model::pagination::{PaginationCursor, RegistryRow, SortOrder};
use crate::model::user::RecipeId;
use crate::txn::{ConstraintRules, DomainViolation};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

pub const REGISTRY_TABLE: &str = "all_auth_recipe_users";

/// Sign-up rules every recipe starts from: one registry row per user id.
pub fn sign_up_rules() -> ConstraintRules {
    ConstraintRules::new().primary_key(REGISTRY_TABLE, "user_id", DomainViolation::DuplicateUserId)
}

/// Registry listing filter and position.
#[derive(Debug, Clone, Copy)]
pub struct RegistryListQuery<'a> {
    pub order: SortOrder,
    pub recipes: Option<&'a [RecipeId]>,
    pub cursor: Option<&'a PaginationCursor>,
    pub limit: u32,
}

/// Repository interface for the user registry.
pub trait RegistryRepository {
    fn insert(&self, user_id: &str, recipe: RecipeId, time_joined: i64) -> rusqlite::Result<()>;
    fn find(&self, user_id: &str) -> rusqlite::Result<Option<RegistryRow>>;
    fn list(&self, query: &RegistryListQuery<'_>) -> rusqlite::Result<Vec<RegistryRow>>;
    fn count(&self, recipes: Option<&[RecipeId]>) -> rusqlite::Result<u64>;
    fn delete(&self, user_id: &str) -> rusqlite::Result<bool>;
}

/// SQLite-backed registry repository.
pub struct SqliteRegistryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRegistryRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl RegistryRepository for SqliteRegistryRepository<'_> {
    fn insert(&self, user_id: &str, recipe: RecipeId, time_joined: i64) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO all_auth_recipe_users (user_id, recipe_id, time_joined)
             VALUES (?1, ?2, ?3);",
            params![user_id, recipe.as_str(), time_joined],
        )?;
        Ok(())
    }

    fn find(&self, user_id: &str) -> rusqlite::Result<Option<RegistryRow>> {
        self.conn
            .query_row(
                "SELECT user_id, recipe_id, time_joined
                 FROM all_auth_recipe_users
                 WHERE user_id = ?1;",
                [user_id],
                parse_registry_row,
            )
            .optional()
    }

    fn list(&self, query: &RegistryListQuery<'_>) -> rusqlite::Result<Vec<RegistryRow>> {
        let mut sql = String::from(
            "SELECT user_id, recipe_id, time_joined
             FROM all_auth_recipe_users
             WHERE 1 = 1",
        );
        let mut bind_values: Vec<Value> = Vec::new();

        push_recipe_filter(&mut sql, &mut bind_values, query.recipes);

        if let Some(cursor) = query.cursor {
            sql.push_str(&format!(
                " AND (time_joined {} ? OR (time_joined = ? AND user_id <= ?))",
                query.order.past_operator()
            ));
            bind_values.push(Value::Integer(cursor.time_joined));
            bind_values.push(Value::Integer(cursor.time_joined));
            bind_values.push(Value::Text(cursor.user_id.clone()));
        }

        sql.push_str(&format!(
            " ORDER BY time_joined {}, user_id DESC LIMIT ?",
            query.order.as_sql()
        ));
        bind_values.push(Value::Integer(i64::from(query.limit)));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind_values), parse_registry_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn count(&self, recipes: Option<&[RecipeId]>) -> rusqlite::Result<u64> {
        let mut sql = String::from("SELECT COUNT(*) FROM all_auth_recipe_users WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();
        push_recipe_filter(&mut sql, &mut bind_values, recipes);

        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(bind_values), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn delete(&self, user_id: &str) -> rusqlite::Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM all_auth_recipe_users WHERE user_id = ?1;",
            [user_id],
        )?;
        Ok(changed > 0)
    }
}

fn push_recipe_filter(sql: &mut String, bind_values: &mut Vec<Value>, recipes: Option<&[RecipeId]>) {
    let Some(recipes) = recipes.filter(|recipes| !recipes.is_empty()) else {
        return;
    };
    sql.push_str(&format!(" AND recipe_id IN ({})", placeholders(recipes.len())));
    bind_values.extend(
        recipes
            .iter()
            .map(|recipe| Value::Text(recipe.as_str().to_string())),
    );
}

fn parse_registry_row(row: &Row<'_>) -> rusqlite::Result<RegistryRow> {
    Ok(RegistryRow {
        user_id: row.get("user_id")?,
        recipe_id: row.get("recipe_id")?,
        time_joined: row.get("time_joined")?,
    })
}
