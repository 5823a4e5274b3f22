//! Named opaque values (signing keys, app id).

use serde::{Deserialize, Serialize};

/// Legacy single signing key, superseded by per-purpose keys.
pub const ACCESS_TOKEN_SIGNING_KEY_NAME: &str = "access_token_signing_key";
pub const REFRESH_TOKEN_KEY_NAME: &str = "refresh_token_key";
pub const APP_ID_NAME: &str = "app_id";

/// One stored value and the time it was first written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueInfo {
    pub value: String,
    /// Unix epoch milliseconds.
    pub created_at_time: i64,
}

impl KeyValueInfo {
    pub fn new(value: impl Into<String>, created_at_time: i64) -> Self {
        Self {
            value: value.into(),
            created_at_time,
        }
    }
}
