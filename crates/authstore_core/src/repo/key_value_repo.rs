//! Named-value storage (`key_value` table).
//!
//! # Responsibility
//! - Plain reads, locking reads and upserts of named values.
//! - Serialize concurrent read-modify-write of one name (key rotation).
//!
//! # Invariants
//! - `get_for_update` takes the database write lock before reading, so the
//!   value it returns cannot change until the transaction ends.
//! - A row already read by `get_for_update` is written without re-reading.
//! - `delete` of an absent name is not an error.

use crate::model::key_value::KeyValueInfo;
use crate::txn::{IsolationLevel, StorageResult, TransactionCoordinator, Txn, WorkResult};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

/// Connection-scoped SQL over the `key_value` table.
pub struct SqliteKeyValueRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteKeyValueRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> rusqlite::Result<Option<KeyValueInfo>> {
        self.conn
            .query_row(
                "SELECT value, created_at_time FROM key_value WHERE name = ?1;",
                [key],
                |row| {
                    Ok(KeyValueInfo {
                        value: row.get::<_, Option<String>>("value")?.unwrap_or_default(),
                        created_at_time: row.get::<_, Option<i64>>("created_at_time")?.unwrap_or_default(),
                    })
                },
            )
            .optional()
    }

    /// Takes the write lock with a self-assignment that changes nothing,
    /// then reads. Matches no row when `key` is absent; the lock is still
    /// taken.
    pub fn lock_and_get(&self, key: &str) -> rusqlite::Result<Option<KeyValueInfo>> {
        self.conn
            .execute("UPDATE key_value SET name = name WHERE name = ?1;", [key])?;
        self.get(key)
    }

    pub fn upsert(&self, key: &str, info: &KeyValueInfo) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO key_value (name, value, created_at_time)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (name) DO UPDATE SET
                value = excluded.value,
                created_at_time = excluded.created_at_time;",
            params![key, info.value, info.created_at_time],
        )?;
        Ok(())
    }

    pub fn insert(&self, key: &str, info: &KeyValueInfo) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO key_value (name, value, created_at_time) VALUES (?1, ?2, ?3);",
            params![key, info.value, info.created_at_time],
        )?;
        Ok(())
    }

    pub fn update(&self, key: &str, info: &KeyValueInfo) -> rusqlite::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE key_value SET value = ?2, created_at_time = ?3 WHERE name = ?1;",
            params![key, info.value, info.created_at_time],
        )?;
        Ok(changed > 0)
    }

    pub fn delete(&self, key: &str) -> rusqlite::Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM key_value WHERE name = ?1;", [key])?;
        Ok(changed > 0)
    }
}

/// Transactional named-value store on top of a [`TransactionCoordinator`].
#[derive(Clone)]
pub struct KeyValueStore {
    coordinator: TransactionCoordinator,
}

impl KeyValueStore {
    pub fn new(coordinator: TransactionCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// Reads `key` without locking and outside any transaction.
    pub fn get(&self, key: &str) -> StorageResult<Option<KeyValueInfo>> {
        self.coordinator
            .read(|conn| Ok(SqliteKeyValueRepository::new(conn).get(key)?))
    }

    /// Reads `key` and holds it locked until `txn` ends.
    pub fn get_for_update(&self, txn: &mut Txn<'_>, key: &str) -> WorkResult<Option<KeyValueInfo>> {
        debug!(
            "event=kv_lock module=kv status=start key={} attempt={}",
            key,
            txn.attempt()
        );
        let row = SqliteKeyValueRepository::new(txn.connection()).lock_and_get(key)?;
        debug!(
            "event=kv_lock module=kv status=ok key={} present={}",
            key,
            row.is_some()
        );
        txn.hold_row(key, row.clone());
        Ok(row)
    }

    /// Upserts `key` in its own `Serializable` transaction.
    pub fn set(&self, key: &str, info: &KeyValueInfo) -> StorageResult<()> {
        self.coordinator
            .execute(IsolationLevel::Serializable, |txn| self.set_in(txn, key, info))
    }

    /// Upserts `key` inside `txn`, reusing a row held by `get_for_update`.
    pub fn set_in(&self, txn: &mut Txn<'_>, key: &str, info: &KeyValueInfo) -> WorkResult<()> {
        let repo = SqliteKeyValueRepository::new(txn.connection());
        match txn.held_row(key) {
            Some(Some(_)) => {
                repo.update(key, info)?;
            }
            Some(None) => repo.insert(key, info)?,
            None => repo.upsert(key, info)?,
        }
        txn.hold_row(key, Some(info.clone()));
        Ok(())
    }

    /// Deletes `key` in its own `Serializable` transaction.
    pub fn delete(&self, key: &str) -> StorageResult<()> {
        self.coordinator
            .execute(IsolationLevel::Serializable, |txn| self.delete_in(txn, key))
    }

    pub fn delete_in(&self, txn: &mut Txn<'_>, key: &str) -> WorkResult<()> {
        SqliteKeyValueRepository::new(txn.connection()).delete(key)?;
        if txn.held_row(key).is_some() {
            txn.hold_row(key, None);
        }
        Ok(())
    }
}
