//! Signing key and app id management on top of [`KeyValueStore`].
//!
//! # Responsibility
//! - Create the refresh-token key and app id exactly once, even when several
//!   processes race on first start.
//! - Expose and retire the legacy single access-token signing key.
//!
//! # Invariants
//! - Get-or-create runs under `get_for_update`, so concurrent callers all
//!   observe the value written by the first committer.

use crate::model::key_value::{
    KeyValueInfo, ACCESS_TOKEN_SIGNING_KEY_NAME, APP_ID_NAME, REFRESH_TOKEN_KEY_NAME,
};
use crate::model::now_millis;
use crate::repo::key_value_repo::KeyValueStore;
use crate::txn::{IsolationLevel, StorageResult};
use log::info;
use rand::RngCore;
use uuid::Uuid;

const KEY_BYTES: usize = 32;

/// Random key material, hex encoded.
pub fn generate_key() -> String {
    let mut bytes = [0_u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[derive(Clone)]
pub struct SigningKeyService {
    store: KeyValueStore,
}

impl SigningKeyService {
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    /// Returns the refresh-token key, creating it on first use.
    pub fn get_or_create_refresh_token_key(&self) -> StorageResult<KeyValueInfo> {
        self.get_or_create(REFRESH_TOKEN_KEY_NAME, generate_key)
    }

    /// Returns the app id, creating it on first use.
    pub fn get_or_create_app_id(&self) -> StorageResult<KeyValueInfo> {
        self.get_or_create(APP_ID_NAME, || Uuid::new_v4().to_string())
    }

    pub fn legacy_access_token_signing_key(&self) -> StorageResult<Option<KeyValueInfo>> {
        self.store.get(ACCESS_TOKEN_SIGNING_KEY_NAME)
    }

    /// Removes the legacy access-token key once callers migrated off it.
    pub fn remove_legacy_access_token_signing_key(&self) -> StorageResult<()> {
        self.store.delete(ACCESS_TOKEN_SIGNING_KEY_NAME)
    }

    /// Reads `name` under lock and writes `generate()` when it is absent.
    ///
    /// `generate` may run once per attempt; only the committed value is
    /// returned.
    pub fn get_or_create<G>(&self, name: &str, mut generate: G) -> StorageResult<KeyValueInfo>
    where
        G: FnMut() -> String,
    {
        self.store
            .coordinator()
            .execute(IsolationLevel::Serializable, |txn| {
                if let Some(existing) = self.store.get_for_update(txn, name)? {
                    return Ok(existing);
                }
                let created = KeyValueInfo::new(generate(), now_millis());
                self.store.set_in(txn, name, &created)?;
                info!(
                    "event=key_create module=kv status=ok name={} attempt={}",
                    name,
                    txn.attempt()
                );
                Ok(created)
            })
    }
}
