//! Third-party recipe detail rows.
//!
//! # Invariants
//! - A provider identity `(third_party_id, third_party_user_id)` links to
//!   exactly one user.

use super::placeholders;
use super::registry_repo;
use super::RecipeUserRepository;
use crate::model::user::{ThirdPartyIdentity, ThirdPartyUser, UserId};
use crate::txn::{ConstraintRules, DomainViolation};
use once_cell::sync::Lazy;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

pub const USERS_TABLE: &str = "thirdparty_users";

const USER_SELECT_SQL: &str = "SELECT third_party_id, third_party_user_id, user_id, email, time_joined
FROM thirdparty_users";

/// Constraint rules for signing up a third-party user.
pub static SIGN_UP_RULES: Lazy<ConstraintRules> = Lazy::new(|| {
    registry_repo::sign_up_rules()
        .primary_key(
            USERS_TABLE,
            "third_party_id, third_party_user_id",
            DomainViolation::DuplicateThirdPartyUser,
        )
        .unique(USERS_TABLE, "user_id", DomainViolation::DuplicateUserId)
});

/// SQLite-backed third-party repository.
pub struct SqliteThirdPartyRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteThirdPartyRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get_by_identity(
        &self,
        third_party_id: &str,
        third_party_user_id: &str,
    ) -> rusqlite::Result<Option<ThirdPartyUser>> {
        self.conn
            .query_row(
                &format!(
                    "{USER_SELECT_SQL} WHERE third_party_id = ?1 AND third_party_user_id = ?2;"
                ),
                [third_party_id, third_party_user_id],
                parse_user_row,
            )
            .optional()
    }

    /// Updates the email reported by the provider. Returns whether the
    /// identity exists.
    pub fn update_email(
        &self,
        third_party_id: &str,
        third_party_user_id: &str,
        email: &str,
    ) -> rusqlite::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE thirdparty_users
             SET email = ?1
             WHERE third_party_id = ?2 AND third_party_user_id = ?3;",
            [email, third_party_id, third_party_user_id],
        )?;
        Ok(changed > 0)
    }
}

impl RecipeUserRepository for SqliteThirdPartyRepository<'_> {
    type User = ThirdPartyUser;

    fn insert(&self, user: &ThirdPartyUser) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO thirdparty_users (
                third_party_id,
                third_party_user_id,
                user_id,
                email,
                time_joined
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                user.third_party.id,
                user.third_party.user_id,
                user.id,
                user.email,
                user.time_joined,
            ],
        )?;
        Ok(())
    }

    fn batch_get_by_ids(&self, ids: &[UserId]) -> rusqlite::Result<Vec<ThirdPartyUser>> {
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
            .execute("DELETE FROM thirdparty_users WHERE user_id = ?1;", [user_id])?;
        Ok(changed > 0)
    }
}

fn parse_user_row(row: &Row<'_>) -> rusqlite::Result<ThirdPartyUser> {
    Ok(ThirdPartyUser {
        id: row.get("user_id")?,
        email: row.get("email")?,
        third_party: ThirdPartyIdentity {
            id: row.get("third_party_id")?,
            user_id: row.get("third_party_user_id")?,
        },
        time_joined: row.get("time_joined")?,
    })
}
