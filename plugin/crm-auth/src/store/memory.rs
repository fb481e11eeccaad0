//! In-memory stores for tests and local tooling.
//!
//! Every check-and-set happens under a single write lock, which gives the
//! same single-winner guarantee as the conditional SQL updates.

use super::{ApiKeyStore, RefreshTokenStore, UserStore};
use crate::error::AuthError;
use crate::models::{ApiKeyRecord, ConsumeOutcome, NewUser, RefreshTokenRecord, User};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

// ============================================
// Users
// ============================================

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_active(&self, id: Uuid, active: bool) {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.is_active = active;
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn create(&self, user: NewUser, at: DateTime<Utc>) -> Result<User, AuthError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(AuthError::EmailExists);
        }

        let user = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            role: user.role,
            is_active: true,
            last_login_at: None,
            created_at: at,
            updated_at: at,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.password_hash = password_hash.to_string();
            user.updated_at = at;
        }
        Ok(())
    }
}

// ============================================
// API Keys
// ============================================

#[derive(Default)]
pub struct MemoryApiKeyStore {
    keys: RwLock<HashMap<Uuid, ApiKeyRecord>>,
}

impl MemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_active(&self, id: Uuid, active: bool) {
        if let Some(key) = self.keys.write().await.get_mut(&id) {
            key.is_active = active;
        }
    }
}

#[async_trait]
impl ApiKeyStore for MemoryApiKeyStore {
    async fn get_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        let keys = self.keys.read().await;
        Ok(keys.values().find(|k| k.key_hash == key_hash).cloned())
    }

    async fn update_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(key) = self.keys.write().await.get_mut(&id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), AuthError> {
        self.keys.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKeyRecord>, AuthError> {
        let mut keys: Vec<ApiKeyRecord> = self
            .keys
            .read()
            .await
            .values()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool, AuthError> {
        let mut keys = self.keys.write().await;
        match keys.get(&id) {
            Some(key) if key.user_id == user_id => {
                keys.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================
// Refresh Tokens
// ============================================

#[derive(Default)]
pub struct MemoryRefreshTokenStore {
    tokens: RwLock<HashMap<Uuid, RefreshTokenRecord>>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<RefreshTokenRecord> {
        self.tokens.read().await.get(&id).cloned()
    }

    /// Number of unrevoked, unexpired tokens for a user
    pub async fn live_count(&self, user_id: Uuid, now: DateTime<Utc>) -> usize {
        self.tokens
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id && t.is_valid_at(now))
            .count()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), AuthError> {
        self.tokens.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn consume(
        &self,
        id: Uuid,
        token_hash: &str,
        replaced_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, AuthError> {
        let mut tokens = self.tokens.write().await;
        let Some(token) = tokens.get_mut(&id) else {
            return Ok(ConsumeOutcome::Rejected);
        };

        if token.token_hash != token_hash {
            return Ok(ConsumeOutcome::Rejected);
        }
        if token.is_revoked() {
            return Ok(ConsumeOutcome::Reused {
                user_id: token.user_id,
            });
        }
        if token.is_expired_at(now) {
            return Ok(ConsumeOutcome::Rejected);
        }

        token.revoked_at = Some(now);
        token.replaced_by = Some(replaced_by);
        Ok(ConsumeOutcome::Consumed {
            user_id: token.user_id,
        })
    }

    async fn revoke(
        &self,
        id: Uuid,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(&id) {
            Some(token) if token.token_hash == token_hash && !token.is_revoked() => {
                token.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        let mut revoked = 0;
        for token in self.tokens.write().await.values_mut() {
            if token.user_id == user_id && !token.is_revoked() {
                token.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}
