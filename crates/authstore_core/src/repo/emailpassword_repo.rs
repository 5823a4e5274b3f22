//! Email-password recipe: users and password reset tokens.
//!
//! # Responsibility
//! - Persist email-password detail rows and their reset tokens.
//! - Register which constraints map to which domain violations.
//!
//! # Invariants
//! - Emails are unique across email-password users.
//! - A reset token always references an existing email-password user;
//!   deleting the user cascades to its tokens.

use super::placeholders;
use super::registry_repo;
use super::RecipeUserRepository;
use crate::model::user::{EmailPasswordUser, PasswordResetToken, UserId};
use crate::txn::{ConstraintRules, DomainViolation};
use once_cell::sync::Lazy;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

pub const USERS_TABLE: &str = "emailpassword_users";
pub const RESET_TOKENS_TABLE: &str = "emailpassword_pswd_reset_tokens";

const USER_SELECT_SQL: &str = "SELECT user_id, email, password_hash, time_joined
FROM emailpassword_users";

/// Constraint rules for signing up an email-password user.
pub static SIGN_UP_RULES: Lazy<ConstraintRules> = Lazy::new(|| {
    registry_repo::sign_up_rules()
        .primary_key(USERS_TABLE, "user_id", DomainViolation::DuplicateUserId)
        .unique(USERS_TABLE, "email", DomainViolation::DuplicateEmail)
});

/// Constraint rules for issuing a password reset token.
pub static RESET_TOKEN_RULES: Lazy<ConstraintRules> = Lazy::new(|| {
    ConstraintRules::new()
        .primary_key(
            RESET_TOKENS_TABLE,
            "user_id, token",
            DomainViolation::DuplicatePasswordResetToken,
        )
        .unique(
            RESET_TOKENS_TABLE,
            "token",
            DomainViolation::DuplicatePasswordResetToken,
        )
        .foreign_key(RESET_TOKENS_TABLE, "user_id", DomainViolation::UnknownUserId)
});

/// SQLite-backed email-password repository.
pub struct SqliteEmailPasswordRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEmailPasswordRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get_by_email(&self, email: &str) -> rusqlite::Result<Option<EmailPasswordUser>> {
        self.conn
            .query_row(
                &format!("{USER_SELECT_SQL} WHERE email = ?1;"),
                [email],
                parse_user_row,
            )
            .optional()
    }

    /// Inserts one reset token. Unknown users and repeated tokens surface as
    /// raw constraint failures.
    pub fn add_password_reset_token(&self, token: &PasswordResetToken) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO emailpassword_pswd_reset_tokens (user_id, token, token_expiry)
             VALUES (?1, ?2, ?3);",
            params![token.user_id, token.token, token.token_expiry],
        )?;
        Ok(())
    }

    /// Tokens issued to `user_id`, soonest expiry first.
    pub fn get_password_reset_tokens(
        &self,
        user_id: &str,
    ) -> rusqlite::Result<Vec<PasswordResetToken>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, token, token_expiry
             FROM emailpassword_pswd_reset_tokens
             WHERE user_id = ?1
             ORDER BY token_expiry ASC, token ASC;",
        )?;
        let tokens = stmt
            .query_map([user_id], parse_token_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tokens)
    }

    pub fn get_password_reset_token(
        &self,
        token: &str,
    ) -> rusqlite::Result<Option<PasswordResetToken>> {
        self.conn
            .query_row(
                "SELECT user_id, token, token_expiry
                 FROM emailpassword_pswd_reset_tokens
                 WHERE token = ?1;",
                [token],
                parse_token_row,
            )
            .optional()
    }

    /// Removes every token issued to `user_id`. Returns the number removed.
    pub fn delete_password_reset_tokens(&self, user_id: &str) -> rusqlite::Result<usize> {
        self.conn.execute(
            "DELETE FROM emailpassword_pswd_reset_tokens WHERE user_id = ?1;",
            [user_id],
        )
    }

    /// Removes tokens whose expiry is before `now`. Returns the number removed.
    pub fn delete_expired_password_reset_tokens(&self, now: i64) -> rusqlite::Result<usize> {
        self.conn.execute(
            "DELETE FROM emailpassword_pswd_reset_tokens WHERE token_expiry < ?1;",
            [now],
        )
    }
}

impl RecipeUserRepository for SqliteEmailPasswordRepository<'_> {
    type User = EmailPasswordUser;

    fn insert(&self, user: &EmailPasswordUser) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO emailpassword_users (user_id, email, password_hash, time_joined)
             VALUES (?1, ?2, ?3, ?4);",
            params![user.id, user.email, user.password_hash, user.time_joined],
        )?;
        Ok(())
    }

    fn batch_get_by_ids(&self, ids: &[UserId]) -> rusqlite::Result<Vec<EmailPasswordUser>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "{USER_SELECT_SQL} WHERE user_id IN ({});",
            placeholders(ids.len())
        ))?;
        let users = stmt
            .query_map(params_from_iter(ids), parse_user_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    fn delete(&self, user_id: &str) -> rusqlite::Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM emailpassword_users WHERE user_id = ?1;", [user_id])?;
        Ok(changed > 0)
    }
}

fn parse_user_row(row: &Row<'_>) -> rusqlite::Result<EmailPasswordUser> {
    Ok(EmailPasswordUser {
        id: row.get("user_id")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        time_joined: row.get("time_joined")?,
    })
}

fn parse_token_row(row: &Row<'_>) -> rusqlite::Result<PasswordResetToken> {
    Ok(PasswordResetToken {
        user_id: row.get("user_id")?,
        token: row.get("token")?,
        token_expiry: row.get("token_expiry")?,
    })
}
