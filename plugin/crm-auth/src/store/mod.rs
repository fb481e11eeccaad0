//! Credential stores consumed by [`AuthService`](crate::AuthService).
//!
//! Each trait is the narrow capability set the service needs. Two
//! implementations ship with the crate: [`postgres`] for production and
//! [`memory`] for tests and local tooling.

pub mod memory;
pub mod postgres;

use crate::error::AuthError;
use crate::models::{ApiKeyRecord, ConsumeOutcome, NewUser, RefreshTokenRecord, User};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::{MemoryApiKeyStore, MemoryRefreshTokenStore, MemoryUserStore};
pub use postgres::{PgApiKeyStore, PgRefreshTokenStore, PgUserStore};

/// User lookup and the few writes the auth flows make
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up by normalised (lower-cased) email
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError>;

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError>;

    /// Insert a user; fails with `EmailExists` on a duplicate email
    async fn create(&self, user: NewUser, at: DateTime<Utc>) -> Result<User, AuthError>;

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AuthError>;
}

/// API key lookup by hash
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn get_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AuthError>;

    async fn update_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError>;

    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), AuthError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKeyRecord>, AuthError>;

    /// Delete a key owned by `user_id`; returns whether a row was removed
    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool, AuthError>;
}

/// Refresh token persistence with single-use consumption
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), AuthError>;

    /// Atomically revoke the token if it is live and `token_hash` matches.
    ///
    /// Two concurrent calls for the same token must not both return
    /// `Consumed`. `replaced_by` is recorded on the consumed row.
    async fn consume(
        &self,
        id: Uuid,
        token_hash: &str,
        replaced_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, AuthError>;

    /// Revoke one token if `token_hash` matches; returns whether it was live
    async fn revoke(&self, id: Uuid, token_hash: &str, now: DateTime<Utc>)
        -> Result<bool, AuthError>;

    /// Revoke every live token of a user; returns how many were revoked
    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>)
        -> Result<u64, AuthError>;
}
