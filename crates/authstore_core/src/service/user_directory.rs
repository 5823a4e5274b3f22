//! Cross-recipe user directory.
//!
//! # Responsibility
//! - Create, fetch and delete users across the registry and recipe tables.
//! - Serve one globally ordered, keyset-paginated listing of all users.
//!
//! # Invariants
//! - Registry and detail rows are written and removed in one transaction.
//! - A listing reads one snapshot: the registry query and every recipe
//!   batch lookup run in the same `RepeatableRead` transaction.
//! - Each recipe present in a page is queried exactly once.
//! - Output order is the registry order, whatever order recipes return.
//! - Unknown recipe ids and missing detail rows are integrity faults.

use crate::model::pagination::{PaginationCursor, RegistryRow, UserListQuery, UserPage};
use crate::model::user::{
    AuthRecipeUser, EmailPasswordUser, NewUser, PasswordResetToken, PasswordlessUser, RecipeId,
    ThirdPartyUser, UserId,
};
use crate::repo::emailpassword_repo::{SqliteEmailPasswordRepository, RESET_TOKEN_RULES};
use crate::repo::passwordless_repo::SqlitePasswordlessRepository;
use crate::repo::recipe;
use crate::repo::registry_repo::{RegistryListQuery, RegistryRepository, SqliteRegistryRepository};
use crate::repo::thirdparty_repo::SqliteThirdPartyRepository;
use crate::txn::{
    IsolationLevel, StorageError, StorageResult, TransactionCoordinator, TransactionOptions,
    WorkResult,
};
use log::{debug, info};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Cross-recipe user operations on top of a [`TransactionCoordinator`].
#[derive(Clone)]
pub struct UserDirectory {
    coordinator: TransactionCoordinator,
}

impl UserDirectory {
    pub fn new(coordinator: TransactionCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// Inserts the registry row and the recipe detail row together.
    ///
    /// # Errors
    /// - `InvalidArgument` when the record fails validation.
    /// - `DomainConstraintViolation` for duplicate ids, emails, phone
    ///   numbers or provider identities.
    pub fn create_user(&self, user: &NewUser) -> StorageResult<()> {
        user.validate()
            .map_err(|err| StorageError::InvalidArgument(err.to_string()))?;

        let recipe_id = user.recipe_id();
        let options = TransactionOptions::new(IsolationLevel::Serializable)
            .with_constraints(recipe::sign_up_rules(recipe_id));
        self.coordinator.execute_with(&options, |txn| {
            let conn = txn.connection();
            SqliteRegistryRepository::new(conn).insert(user.id(), recipe_id, user.time_joined())?;
            recipe::insert_user(conn, user)?;
            Ok(())
        })?;

        info!(
            "event=user_create module=directory status=ok recipe={} user_id={}",
            recipe_id,
            user.id()
        );
        Ok(())
    }

    /// Fetches one user of any recipe.
    pub fn get_user(&self, user_id: &str) -> StorageResult<Option<AuthRecipeUser>> {
        self.coordinator
            .execute(IsolationLevel::RepeatableRead, |txn| {
                let conn = txn.connection();
                match SqliteRegistryRepository::new(conn).find(user_id)? {
                    Some(row) => Ok(load_users(conn, &[row])?.pop()),
                    None => Ok(None),
                }
            })
    }

    /// Lists users in registry order, fully populated from their recipes.
    ///
    /// # Errors
    /// - `InvalidArgument` for a zero limit or an empty recipe filter.
    /// - `IntegrityFault` when a registry row names an unknown recipe or its
    ///   detail row is missing.
    pub fn list_users(&self, query: &UserListQuery) -> StorageResult<Vec<AuthRecipeUser>> {
        query.validate().map_err(StorageError::InvalidArgument)?;
        let started_at = Instant::now();

        let users = self
            .coordinator
            .execute(IsolationLevel::RepeatableRead, |txn| {
                let conn = txn.connection();
                let rows = SqliteRegistryRepository::new(conn)
                    .list(&registry_query(query, query.limit))?;
                load_users(conn, &rows)
            })?;

        debug!(
            "event=list_users module=directory status=ok order={} limit={} returned={} duration_ms={}",
            query.order.as_sql(),
            query.limit,
            users.len(),
            started_at.elapsed().as_millis()
        );
        Ok(users)
    }

    /// Lists one page and the cursor that opens the next one.
    ///
    /// Fetches one extra registry row; that row becomes `next_cursor` and is
    /// the first row of the next page.
    pub fn list_users_page(&self, query: &UserListQuery) -> StorageResult<UserPage> {
        query.validate().map_err(StorageError::InvalidArgument)?;
        let limit = query.limit as usize;

        self.coordinator
            .execute(IsolationLevel::RepeatableRead, |txn| {
                let conn = txn.connection();
                let mut rows = SqliteRegistryRepository::new(conn)
                    .list(&registry_query(query, query.limit.saturating_add(1)))?;

                let next_cursor = if rows.len() > limit {
                    rows.pop()
                        .map(|row| PaginationCursor::new(row.time_joined, row.user_id))
                } else {
                    None
                };

                Ok(UserPage {
                    users: load_users(conn, &rows)?,
                    next_cursor,
                })
            })
    }

    /// Counts registry rows, optionally restricted to some recipes.
    pub fn count_users(&self, recipe_filter: Option<&[RecipeId]>) -> StorageResult<u64> {
        self.coordinator
            .read(|conn| Ok(SqliteRegistryRepository::new(conn).count(recipe_filter)?))
    }

    /// Removes a user's detail and registry rows. Returns whether the user
    /// existed.
    pub fn delete_user(&self, user_id: &str) -> StorageResult<bool> {
        self.coordinator
            .execute(IsolationLevel::Serializable, |txn| {
                let conn = txn.connection();
                let registry = SqliteRegistryRepository::new(conn);
                let Some(row) = registry.find(user_id)? else {
                    return Ok(false);
                };
                let recipe_id = parse_recipe(&row)?;
                recipe::delete_user(conn, recipe_id, user_id)?;
                registry.delete(user_id)?;
                Ok(true)
            })
    }

    /// Issues a password reset token for an email-password user.
    ///
    /// # Errors
    /// - `DomainConstraintViolation(UnknownUserId)` when the user does not
    ///   exist.
    /// - `DomainConstraintViolation(DuplicatePasswordResetToken)` when the
    ///   token was already issued.
    pub fn add_password_reset_token(&self, token: &PasswordResetToken) -> StorageResult<()> {
        let options = TransactionOptions::new(IsolationLevel::Serializable)
            .with_constraints(&RESET_TOKEN_RULES);
        self.coordinator.execute_with(&options, |txn| {
            SqliteEmailPasswordRepository::new(txn.connection()).add_password_reset_token(token)?;
            Ok(())
        })
    }

    /// Looks up a stored reset token without consuming it.
    pub fn password_reset_token(&self, token: &str) -> StorageResult<Option<PasswordResetToken>> {
        self.coordinator.read(|conn| {
            Ok(SqliteEmailPasswordRepository::new(conn).get_password_reset_token(token)?)
        })
    }

    /// Redeems `token`: returns it and removes every token of its user, so
    /// no token of that user can be redeemed twice.
    pub fn consume_password_reset_token(
        &self,
        token: &str,
    ) -> StorageResult<Option<PasswordResetToken>> {
        self.coordinator
            .execute(IsolationLevel::Serializable, |txn| {
                let repo = SqliteEmailPasswordRepository::new(txn.connection());
                let Some(found) = repo.get_password_reset_token(token)? else {
                    return Ok(None);
                };
                let removed = repo.delete_password_reset_tokens(&found.user_id)?;
                debug!(
                    "event=reset_token_consume module=directory status=ok removed={}",
                    removed
                );
                Ok(Some(found))
            })
    }

    /// Tokens issued to `user_id`, soonest expiry first.
    pub fn password_reset_tokens(&self, user_id: &str) -> StorageResult<Vec<PasswordResetToken>> {
        self.coordinator.read(|conn| {
            Ok(SqliteEmailPasswordRepository::new(conn).get_password_reset_tokens(user_id)?)
        })
    }

    pub fn email_password_user_by_email(
        &self,
        email: &str,
    ) -> StorageResult<Option<EmailPasswordUser>> {
        self.coordinator
            .read(|conn| Ok(SqliteEmailPasswordRepository::new(conn).get_by_email(email)?))
    }

    /// Finds the user linked to a provider account.
    pub fn third_party_user_by_identity(
        &self,
        third_party_id: &str,
        third_party_user_id: &str,
    ) -> StorageResult<Option<ThirdPartyUser>> {
        self.coordinator.read(|conn| {
            Ok(SqliteThirdPartyRepository::new(conn)
                .get_by_identity(third_party_id, third_party_user_id)?)
        })
    }

    /// Records the email a provider now reports for a linked account.
    /// Returns whether the account exists.
    pub fn update_third_party_email(
        &self,
        third_party_id: &str,
        third_party_user_id: &str,
        email: &str,
    ) -> StorageResult<bool> {
        if email.trim().is_empty() {
            return Err(StorageError::InvalidArgument(
                "email must not be empty".to_string(),
            ));
        }
        self.coordinator
            .execute(IsolationLevel::Serializable, |txn| {
                Ok(SqliteThirdPartyRepository::new(txn.connection()).update_email(
                    third_party_id,
                    third_party_user_id,
                    email,
                )?)
            })
    }

    pub fn passwordless_user_by_email(
        &self,
        email: &str,
    ) -> StorageResult<Option<PasswordlessUser>> {
        self.coordinator
            .read(|conn| Ok(SqlitePasswordlessRepository::new(conn).get_by_email(email)?))
    }

    pub fn passwordless_user_by_phone_number(
        &self,
        phone_number: &str,
    ) -> StorageResult<Option<PasswordlessUser>> {
        self.coordinator.read(|conn| {
            Ok(SqlitePasswordlessRepository::new(conn).get_by_phone_number(phone_number)?)
        })
    }

    /// Removes tokens that expired before `now`. Returns the number removed.
    pub fn delete_expired_password_reset_tokens(&self, now: i64) -> StorageResult<usize> {
        self.coordinator
            .execute(IsolationLevel::Serializable, |txn| {
                Ok(SqliteEmailPasswordRepository::new(txn.connection())
                    .delete_expired_password_reset_tokens(now)?)
            })
    }
}

fn registry_query(query: &UserListQuery, limit: u32) -> RegistryListQuery<'_> {
    RegistryListQuery {
        order: query.order,
        recipes: query.recipe_filter.as_deref(),
        cursor: query.cursor.as_ref(),
        limit,
    }
}

fn parse_recipe(row: &RegistryRow) -> Result<RecipeId, StorageError> {
    RecipeId::parse(&row.recipe_id).ok_or_else(|| {
        StorageError::IntegrityFault(format!(
            "registry row for user {} names unknown recipe `{}`",
            row.user_id, row.recipe_id
        ))
    })
}

/// Populates registry rows from their recipes, preserving row order.
fn load_users(conn: &Connection, rows: &[RegistryRow]) -> WorkResult<Vec<AuthRecipeUser>> {
    let mut ids_by_recipe: BTreeMap<RecipeId, Vec<UserId>> = BTreeMap::new();
    for row in rows {
        ids_by_recipe
            .entry(parse_recipe(row)?)
            .or_default()
            .push(row.user_id.clone());
    }

    let mut by_id: HashMap<UserId, AuthRecipeUser> = HashMap::with_capacity(rows.len());
    for (recipe_id, ids) in &ids_by_recipe {
        for user in recipe::batch_get_by_ids(conn, *recipe_id, ids)? {
            by_id.insert(user.id().to_string(), user);
        }
    }

    let mut users = Vec::with_capacity(rows.len());
    for row in rows {
        let user = by_id.remove(&row.user_id).ok_or_else(|| {
            StorageError::IntegrityFault(format!(
                "user {} is registered under `{}` but has no detail row",
                row.user_id, row.recipe_id
            ))
        })?;
        users.push(user);
    }
    Ok(users)
}
