//! Passwordless recipe detail rows.

use super::placeholders;
use super::registry_repo;
use super::RecipeUserRepository;
use crate::model::user::{PasswordlessUser, UserId};
use crate::txn::{ConstraintRules, DomainViolation};
use once_cell::sync::Lazy;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

pub const USERS_TABLE: &str = "passwordless_users";

const USER_SELECT_SQL: &str = "SELECT user_id, email, phone_number, time_joined
FROM passwordless_users";

/// Constraint rules for signing up a passwordless user.
pub static SIGN_UP_RULES: Lazy<ConstraintRules> = Lazy::new(|| {
    registry_repo::sign_up_rules()
        .primary_key(USERS_TABLE, "user_id", DomainViolation::DuplicateUserId)
        .unique(USERS_TABLE, "email", DomainViolation::DuplicateEmail)
        .unique(USERS_TABLE, "phone_number", DomainViolation::DuplicatePhoneNumber)
});

/// SQLite-backed passwordless repository.
pub struct SqlitePasswordlessRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePasswordlessRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get_by_email(&self, email: &str) -> rusqlite::Result<Option<PasswordlessUser>> {
        self.conn
            .query_row(
                &format!("{USER_SELECT_SQL} WHERE email = ?1;"),
                [email],
                parse_user_row,
            )
            .optional()
    }

    pub fn get_by_phone_number(
        &self,
        phone_number: &str,
    ) -> rusqlite::Result<Option<PasswordlessUser>> {
        self.conn
            .query_row(
                &format!("{USER_SELECT_SQL} WHERE phone_number = ?1;"),
                [phone_number],
                parse_user_row,
            )
            .optional()
    }
}

impl RecipeUserRepository for SqlitePasswordlessRepository<'_> {
    type User = PasswordlessUser;

    fn insert(&self, user: &PasswordlessUser) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO passwordless_users (user_id, email, phone_number, time_joined)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                user.id,
                user.email.as_deref(),
                user.phone_number.as_deref(),
                user.time_joined,
            ],
        )?;
        Ok(())
    }

    fn batch_get_by_ids(&self, ids: &[UserId]) -> rusqlite::Result<Vec<PasswordlessUser>> {
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
            .execute("DELETE FROM passwordless_users WHERE user_id = ?1;", [user_id])?;
        Ok(changed > 0)
    }
}

fn parse_user_row(row: &Row<'_>) -> rusqlite::Result<PasswordlessUser> {
    Ok(PasswordlessUser {
        id: row.get("user_id")?,
        email: row.get("email")?,
        phone_number: row.get("phone_number")?,
        time_joined: row.get("time_joined")?,
    })
}

#[cfg(test)]
mod tests {
    use super::SqlitePasswordlessRepository;
    use crate::db::open_db_in_memory;
    use crate::model::user::PasswordlessUser;
    use crate::repo::RecipeUserRepository;

    #[test]
    fn users_without_email_do_not_collide() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqlitePasswordlessRepository::new(&conn);
        let first = PasswordlessUser::with_phone_number("+100", 1);
        let second = PasswordlessUser::with_phone_number("+200", 2);
        repo.insert(&first).unwrap();
        repo.insert(&second).unwrap();

        assert_eq!(repo.get_by_phone_number("+200").unwrap(), Some(second));
        assert!(repo.get_by_email("a@example.com").unwrap().is_none());
        assert!(repo.delete(&first.id).unwrap());
        assert!(!repo.delete(&first.id).unwrap());
    }
}
