//! Blocking connection pool over one SQLite database file.
//!
//! # Responsibility
//! - Bootstrap the database (pragmas + migrations) once at construction.
//! - Hand out one configured connection per unit of work.
//! - Keep a bounded set of idle connections for reuse.
//!
//! # Invariants
//! - A connection is owned by exactly one caller between `acquire` and drop.
//! - Connections opened after bootstrap only receive pragmas, never migrations.

use super::open::{configure_connection, open_with, OpenMode};
use super::{DbError, DbResult};
use crate::config::StorageConfig;
use log::debug;
use rusqlite::Connection;
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Shared source of SQLite connections.
pub struct ConnectionPool {
    path: PathBuf,
    busy_timeout: Duration,
    max_idle: usize,
    idle: Mutex<Vec<Connection>>,
}

impl ConnectionPool {
    /// Opens (and migrates) the database at `path`.
    ///
    /// # Errors
    /// - `DbError::InvalidConfig` when `config` fails validation.
    /// - Any bootstrap or migration failure of the first connection.
    pub fn open(path: impl AsRef<Path>, config: &StorageConfig) -> DbResult<Self> {
        config.validate().map_err(DbError::InvalidConfig)?;

        let path = path.as_ref().to_path_buf();
        let busy_timeout = config.busy_timeout();
        let first = open_with(|| Connection::open(&path), OpenMode::File, busy_timeout)?;

        Ok(Self {
            path,
            busy_timeout,
            max_idle: config.max_idle_connections,
            idle: Mutex::new(vec![first]),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of connections currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    /// Takes an idle connection or opens a new one.
    pub fn acquire(&self) -> DbResult<PooledConnection<'_>> {
        let reused = self.lock_idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!("event=pool_open module=db status=start");
                let conn = Connection::open(&self.path)?;
                configure_connection(&conn, OpenMode::File, self.busy_timeout)?;
                conn
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self,
        })
    }

    fn release(&self, conn: Connection) {
        let mut idle = self.lock_idle();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for ConnectionPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.path)
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}

/// Connection checked out of a [`ConnectionPool`]; returned on drop.
pub struct PooledConnection<'pool> {
    conn: Option<Connection>,
    pool: &'pool ConnectionPool,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection is only taken in drop"),
        }
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection is only taken in drop"),
        }
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
