//! Dispatch over the closed set of recipes.
//!
//! # Responsibility
//! - Route insert, batch lookup and delete to the recipe that owns a user.
//! - Hand out each recipe's sign-up constraint rules.

use super::emailpassword_repo::{self, SqliteEmailPasswordRepository};
use super::passwordless_repo::{self, SqlitePasswordlessRepository};
use super::thirdparty_repo::{self, SqliteThirdPartyRepository};
use super::RecipeUserRepository;
use crate::model::user::{AuthRecipeUser, RecipeId, UserId};
use crate::txn::ConstraintRules;
use rusqlite::Connection;

/// Constraint rules for signing up a user of `recipe`.
pub fn sign_up_rules(recipe: RecipeId) -> &'static ConstraintRules {
    match recipe {
        RecipeId::EmailPassword => &*emailpassword_repo::SIGN_UP_RULES,
        RecipeId::ThirdParty => &*thirdparty_repo::SIGN_UP_RULES,
        RecipeId::Passwordless => &*passwordless_repo::SIGN_UP_RULES,
    }
}

/// Inserts the detail row for `user` into its recipe table.
pub fn insert_user(conn: &Connection, user: &AuthRecipeUser) -> rusqlite::Result<()> {
    match user {
        AuthRecipeUser::EmailPassword(user) => SqliteEmailPasswordRepository::new(conn).insert(user),
        AuthRecipeUser::ThirdParty(user) => SqliteThirdPartyRepository::new(conn).insert(user),
        AuthRecipeUser::Passwordless(user) => SqlitePasswordlessRepository::new(conn).insert(user),
    }
}

/// Fetches `recipe` detail rows for `ids`, in no particular order.
pub fn batch_get_by_ids(
    conn: &Connection,
    recipe: RecipeId,
    ids: &[UserId],
) -> rusqlite::Result<Vec<AuthRecipeUser>> {
    let users = match recipe {
        RecipeId::EmailPassword => wrap(SqliteEmailPasswordRepository::new(conn).batch_get_by_ids(ids)?),
        RecipeId::ThirdParty => wrap(SqliteThirdPartyRepository::new(conn).batch_get_by_ids(ids)?),
        RecipeId::Passwordless => wrap(SqlitePasswordlessRepository::new(conn).batch_get_by_ids(ids)?),
    };
    Ok(users)
}

/// Deletes the `recipe` detail row for `user_id`. Returns whether it existed.
pub fn delete_user(conn: &Connection, recipe: RecipeId, user_id: &str) -> rusqlite::Result<bool> {
    match recipe {
        RecipeId::EmailPassword => SqliteEmailPasswordRepository::new(conn).delete(user_id),
        RecipeId::ThirdParty => SqliteThirdPartyRepository::new(conn).delete(user_id),
        RecipeId::Passwordless => SqlitePasswordlessRepository::new(conn).delete(user_id),
    }
}

fn wrap<U: Into<AuthRecipeUser>>(users: Vec<U>) -> Vec<AuthRecipeUser> {
    users.into_iter().map(Into::into).collect()
}
