//! Domain model for the identity store.
//!
//! # Responsibility
//! - Define user records for every auth recipe and the registry row tying
//!   them together.
//! - Define the named-value record and pagination types.
//!
//! # Invariants
//! - A user id is globally unique across recipes and never changes.
//! - Timestamps are Unix epoch milliseconds.

pub mod key_value;
pub mod pagination;
pub mod user;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
