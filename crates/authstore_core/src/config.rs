//! Storage configuration.
//!
//! # Responsibility
//! - Describe connection and retry tuning for the storage core.
//! - Reject settings the transaction engine cannot honor.
//!
//! # Invariants
//! - Every field has a default, so partial documents deserialize.
//! - Loading the document (file, env, flags) belongs to the embedding
//!   application; this module only owns the shape and validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 8;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_MIN_MS: u64 = 10;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30;

/// Retry policy for transient transaction conflicts.
///
/// The backoff is a fixed jitter window `[backoff_min_ms, backoff_max_ms)`
/// drawn fresh before every retry; it does not grow between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff_min_ms: u64,
    /// Exclusive upper bound.
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_min_ms: DEFAULT_BACKOFF_MIN_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl RetryPolicy {
    /// Validates attempt count and backoff window.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.backoff_min_ms >= self.backoff_max_ms {
            return Err(format!(
                "retry backoff window [{}, {}) is empty",
                self.backoff_min_ms, self.backoff_max_ms
            ));
        }
        Ok(())
    }
}

/// Connection and retry settings for one storage instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Idle connections kept by the pool for reuse.
    pub max_idle_connections: usize,
    pub retry: RetryPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            retry: RetryPolicy::default(),
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Validates the whole config.
    ///
    /// # Errors
    /// - Returns a human-readable message for the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_idle_connections == 0 {
            return Err("max_idle_connections must be at least 1".to_string());
        }
        self.retry.validate()
    }
}
