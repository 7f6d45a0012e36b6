//! API key authorization.
//!
//! An API key is `prefix.secret` with a 16 byte prefix. The backend keeps
//! `sha256(secret + salt)` per prefix and the list of databases the owning
//! user may read. [`ApiKeyCache`] keeps that list per key so the hot path
//! never waits on the backend once a key has been seen.

mod api_key;
mod cache;
mod sweeper;

pub use api_key::{hash_secret, parse_api_key, verify_secret, API_KEY_PREFIX_LEN};
pub use cache::{ApiKeyCache, ApiKeyCacheConfig, ApiKeyCacheStats};
pub use sweeper::CacheSweeper;

use crate::status::NativeStatus;

/// API key row as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredApiKey {
    /// Hex encoded `sha256(secret + salt)`.
    pub secret: String,
    /// Salt appended to the client secret before hashing.
    pub salt: String,
    /// Key name.
    pub name: String,
    /// Owning user.
    pub user_id: u64,
}

/// Backend that owns API keys and user permissions.
pub trait CredentialStore: Send + Sync {
    /// Look up the key with the given prefix.
    fn api_key(&self, prefix: &str) -> Result<StoredApiKey, NativeStatus>;

    /// Databases the user may read.
    fn user_databases(&self, user_id: u64) -> Result<Vec<String>, NativeStatus>;
}
