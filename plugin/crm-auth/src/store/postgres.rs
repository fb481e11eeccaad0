//! PostgreSQL-backed stores.
//!
//! Tables are described in `migrations/0001_credentials.sql`.

use super::{ApiKeyStore, RefreshTokenStore, UserStore};
use crate::error::AuthError;
use crate::models::{ApiKeyRecord, ConsumeOutcome, NewUser, RefreshTokenRecord, User};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, email, password_hash, name, role, is_active, last_login_at, created_at, updated_at";

const API_KEY_COLUMNS: &str =
    "id, user_id, name, key_hash, is_active, last_used_at, expires_at, created_at";

/// Postgres SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

// ============================================
// Users
// ============================================

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn create(&self, user: NewUser, at: DateTime<Utc>) -> Result<User, AuthError> {
        let result = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (email, password_hash, name, role, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.role)
        .bind(at)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Err(AuthError::EmailExists)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .bind(at)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

// ============================================
// API Keys
// ============================================

#[derive(Clone)]
pub struct PgApiKeyStore {
    db: PgPool,
}

impl PgApiKeyStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn get_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        let key = sqlx::query_as(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = $1"
        ))
        .bind(key_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(key)
    }

    async fn update_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (id, user_id, name, key_hash, is_active, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.name)
        .bind(&record.key_hash)
        .bind(record.is_active)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKeyRecord>, AuthError> {
        let keys = sqlx::query_as(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(keys)
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================
// Refresh Tokens
// ============================================

#[derive(Clone)]
pub struct PgRefreshTokenStore {
    db: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens
                (id, user_id, token_hash, expires_at, issued_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.issued_at)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn consume(
        &self,
        id: Uuid,
        token_hash: &str,
        replaced_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, AuthError> {
        // Single conditional update: only one caller can flip revoked_at
        let consumed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $4, replaced_by = $3
            WHERE id = $1
              AND token_hash = $2
              AND revoked_at IS NULL
              AND expires_at > $4
            RETURNING user_id
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(replaced_by)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        if let Some((user_id,)) = consumed {
            return Ok(ConsumeOutcome::Consumed { user_id });
        }

        let existing: Option<(Uuid, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT user_id, revoked_at FROM refresh_tokens WHERE id = $1 AND token_hash = $2",
        )
        .bind(id)
        .bind(token_hash)
        .fetch_optional(&self.db)
        .await?;

        Ok(match existing {
            Some((user_id, Some(_))) => ConsumeOutcome::Reused { user_id },
            _ => ConsumeOutcome::Rejected,
        })
    }

    async fn revoke(
        &self,
        id: Uuid,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens SET revoked_at = $3
            WHERE id = $1 AND token_hash = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Duration;

    // Needs DATABASE_URL pointing at a database with
    // migrations/0001_credentials.sql applied.

    async fn create_test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
        PgPool::connect(&url).await.expect("Failed to create test pool")
    }

    async fn setup_test_user(pool: &PgPool) -> User {
        PgUserStore::new(pool.clone())
            .create(
                NewUser {
                    email: format!("refresh_test_{}@example.com", Uuid::new_v4()),
                    password_hash: "test_hash".into(),
                    name: "Refresh Test".into(),
                    role: Role::Sales,
                },
                Utc::now(),
            )
            .await
            .expect("Failed to create test user")
    }

    async fn cleanup_test_user(pool: &PgPool, user_id: Uuid) {
        // Tokens and keys go with the user via CASCADE
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(pool)
            .await
            .expect("Failed to cleanup test user");
    }

    async fn insert_token(
        store: &PgRefreshTokenStore,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> RefreshTokenRecord {
        let now = Utc::now();
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: crate::token::hash_token(&Uuid::new_v4().to_string()),
            expires_at,
            issued_at: now,
            revoked_at: None,
            replaced_by: None,
            user_agent: Some("crm-web/2.1".into()),
            ip_address: Some("198.51.100.4".into()),
        };
        store.insert(&record).await.unwrap();
        record
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_consume_once_then_reused() {
        let pool = create_test_pool().await;
        let user = setup_test_user(&pool).await;
        let store = PgRefreshTokenStore::new(pool.clone());
        let now = Utc::now();
        let token = insert_token(&store, user.id, now + Duration::hours(1)).await;

        let next = Uuid::new_v4();
        assert_eq!(
            store.consume(token.id, &token.token_hash, next, now).await.unwrap(),
            ConsumeOutcome::Consumed { user_id: user.id }
        );
        assert_eq!(
            store.consume(token.id, &token.token_hash, next, now).await.unwrap(),
            ConsumeOutcome::Reused { user_id: user.id }
        );

        let (replaced_by,): (Option<Uuid>,) =
            sqlx::query_as("SELECT replaced_by FROM refresh_tokens WHERE id = $1")
                .bind(token.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(replaced_by, Some(next));

        cleanup_test_user(&pool, user.id).await;
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_consume_rejects_hash_mismatch() {
        let pool = create_test_pool().await;
        let user = setup_test_user(&pool).await;
        let store = PgRefreshTokenStore::new(pool.clone());
        let now = Utc::now();
        let token = insert_token(&store, user.id, now + Duration::hours(1)).await;

        let wrong_hash = crate::token::hash_token("someone-else");
        assert_eq!(
            store
                .consume(token.id, &wrong_hash, Uuid::new_v4(), now)
                .await
                .unwrap(),
            ConsumeOutcome::Rejected
        );
        assert_eq!(
            store
                .consume(Uuid::new_v4(), &token.token_hash, Uuid::new_v4(), now)
                .await
                .unwrap(),
            ConsumeOutcome::Rejected
        );

        // The real token is still usable
        assert_eq!(
            store
                .consume(token.id, &token.token_hash, Uuid::new_v4(), now)
                .await
                .unwrap(),
            ConsumeOutcome::Consumed { user_id: user.id }
        );

        cleanup_test_user(&pool, user.id).await;
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_consume_rejects_expired_row() {
        let pool = create_test_pool().await;
        let user = setup_test_user(&pool).await;
        let store = PgRefreshTokenStore::new(pool.clone());
        let now = Utc::now();
        let token = insert_token(&store, user.id, now - Duration::minutes(1)).await;

        assert_eq!(
            store
                .consume(token.id, &token.token_hash, Uuid::new_v4(), now)
                .await
                .unwrap(),
            ConsumeOutcome::Rejected
        );

        cleanup_test_user(&pool, user.id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_concurrent_consume_has_single_winner() {
        let pool = create_test_pool().await;
        let user = setup_test_user(&pool).await;
        let store = PgRefreshTokenStore::new(pool.clone());
        let now = Utc::now();
        let token = insert_token(&store, user.id, now + Duration::hours(1)).await;

        let (a, b) = tokio::join!(
            store.consume(token.id, &token.token_hash, Uuid::new_v4(), now),
            store.consume(token.id, &token.token_hash, Uuid::new_v4(), now),
        );
        let outcomes = [a.unwrap(), b.unwrap()];

        let winners = outcomes
            .iter()
            .filter(|o| matches!(o, ConsumeOutcome::Consumed { .. }))
            .count();
        assert_eq!(winners, 1);
        assert!(outcomes.contains(&ConsumeOutcome::Reused { user_id: user.id }));

        cleanup_test_user(&pool, user.id).await;
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_revoke_all_for_user() {
        let pool = create_test_pool().await;
        let user = setup_test_user(&pool).await;
        let store = PgRefreshTokenStore::new(pool.clone());
        let now = Utc::now();
        let a = insert_token(&store, user.id, now + Duration::hours(1)).await;
        insert_token(&store, user.id, now + Duration::hours(1)).await;

        assert!(store.revoke(a.id, &a.token_hash, now).await.unwrap());
        assert!(!store.revoke(a.id, &a.token_hash, now).await.unwrap());
        assert_eq!(store.revoke_all_for_user(user.id, now).await.unwrap(), 1);

        cleanup_test_user(&pool, user.id).await;
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_create_duplicate_email() {
        let pool = create_test_pool().await;
        let user = setup_test_user(&pool).await;
        let users = PgUserStore::new(pool.clone());

        let err = users
            .create(
                NewUser {
                    email: user.email.clone(),
                    password_hash: "other_hash".into(),
                    name: "Duplicate".into(),
                    role: Role::Customer,
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::EmailExists);

        let found = users.get_by_email(&user.email).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.role, Role::Sales);

        cleanup_test_user(&pool, user.id).await;
    }
}
