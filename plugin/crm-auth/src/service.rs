//! Authentication Service
//!
//! Core credential logic: password login, access token validation, refresh
//! token rotation, and API key issuance and validation. Storage and time are
//! injected so the service holds no global state.

use crate::api_key;
use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::*;
use crate::password::PasswordHasher;
use crate::store::{
    ApiKeyStore, PgApiKeyStore, PgRefreshTokenStore, PgUserStore, RefreshTokenStore, UserStore,
};
use crate::token::{hash_token, TokenIssuer};

use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Authentication service
pub struct AuthService {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    api_keys: Arc<dyn ApiKeyStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    clock: Arc<dyn Clock>,
    tokens: TokenIssuer,
    passwords: PasswordHasher,
}

impl AuthService {
    /// Create a new authentication service
    ///
    /// Validates `config` and builds the signing keys and password hasher.
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        api_keys: Arc<dyn ApiKeyStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
    ) -> Result<Self, AuthError> {
        config.validate()?;

        let tokens = TokenIssuer::new(&config);
        let passwords = PasswordHasher::new(&config)?;

        Ok(Self {
            config,
            users,
            api_keys,
            refresh_tokens,
            clock: Arc::new(SystemClock),
            tokens,
            passwords,
        })
    }

    /// Service backed by the PostgreSQL stores
    pub fn postgres(db: PgPool, config: AuthConfig) -> Result<Self, AuthError> {
        Self::new(
            config,
            Arc::new(PgUserStore::new(db.clone())),
            Arc::new(PgApiKeyStore::new(db.clone())),
            Arc::new(PgRefreshTokenStore::new(db)),
        )
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get reference to config
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // ============================================
    // Login / Logout
    // ============================================

    /// Verify email and password and issue a token pair
    ///
    /// Unknown email, inactive account and wrong password all fail with
    /// `InvalidCredentials`.
    pub async fn login(
        &self,
        req: LoginRequest,
        client: ClientInfo,
    ) -> Result<AuthResponse, AuthError> {
        let user = self.verify_credentials(&req.email, &req.password).await?;

        let now = self.clock.now();
        self.users.update_last_login(user.id, now).await?;

        let access_token = self.tokens.issue_access_token(&user, now)?;
        let refresh_token = self.store_refresh_token(user.id, Uuid::new_v4(), &client).await?;

        tracing::info!(user_id = %user.id, role = %user.role, "User logged in");

        let mut user = user;
        user.last_login_at = Some(now);

        Ok(AuthResponse {
            user: UserResponse::from(user),
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_ttl().num_seconds(),
        })
    }

    async fn verify_credentials(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            self.passwords.verify_dummy(password);
            return Err(AuthError::InvalidCredentials);
        }

        let Some(user) = self.users.get_by_email(&email).await? else {
            self.passwords.verify_dummy(password);
            return Err(AuthError::InvalidCredentials);
        };

        if !self.passwords.verify(password, &user.password_hash) {
            tracing::debug!(user_id = %user.id, "Password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            tracing::debug!(user_id = %user.id, "Login attempt on inactive account");
            return Err(AuthError::InvalidCredentials);
        }

        Ok(user)
    }

    /// Revoke a single refresh token
    ///
    /// An expired but correctly signed token can still be logged out.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let (claims, secret) = self.tokens.parse_refresh_token(refresh_token, None)?;

        let revoked = self
            .refresh_tokens
            .revoke(claims.tid, &hash_token(secret), self.clock.now())
            .await?;

        if revoked {
            tracing::info!(user_id = %claims.sub, "Refresh token revoked");
        }
        Ok(())
    }

    /// Revoke every refresh token of a user
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let revoked = self
            .refresh_tokens
            .revoke_all_for_user(user_id, self.clock.now())
            .await?;
        tracing::info!(user_id = %user_id, revoked, "All refresh tokens revoked");
        Ok(revoked)
    }

    // ============================================
    // Token Validation & Refresh
    // ============================================

    /// Validate an access token without touching the store
    pub fn validate(&self, access_token: &str) -> Result<Principal, AuthError> {
        let claims = self
            .tokens
            .validate_access_token(access_token, self.clock.now())?;
        let role = claims.role.parse().map_err(|_| AuthError::TokenInvalid)?;

        Ok(Principal {
            subject_id: claims.sub,
            role,
            method: AuthMethod::AccessToken,
        })
    }

    /// Exchange a refresh token for a new token pair (single use)
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: ClientInfo,
    ) -> Result<TokenResponse, AuthError> {
        let now = self.clock.now();
        let (claims, secret) = self.tokens.parse_refresh_token(refresh_token, Some(now))?;

        let next_id = Uuid::new_v4();
        let outcome = self
            .refresh_tokens
            .consume(claims.tid, &hash_token(secret), next_id, now)
            .await?;

        let user_id = match outcome {
            ConsumeOutcome::Consumed { user_id } => user_id,
            ConsumeOutcome::Reused { user_id } => {
                tracing::warn!(
                    user_id = %user_id,
                    "Refresh token reuse detected, revoking all tokens"
                );
                self.refresh_tokens.revoke_all_for_user(user_id, now).await?;
                return Err(AuthError::TokenInvalid);
            }
            ConsumeOutcome::Rejected => return Err(AuthError::TokenInvalid),
        };

        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::TokenInvalid)?;

        let access_token = self.tokens.issue_access_token(&user, now)?;
        let refresh_token = self.store_refresh_token(user.id, next_id, &client).await?;

        tracing::debug!(user_id = %user.id, "Refresh token rotated");

        Ok(TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_ttl().num_seconds(),
        })
    }

    async fn store_refresh_token(
        &self,
        user_id: Uuid,
        token_id: Uuid,
        client: &ClientInfo,
    ) -> Result<String, AuthError> {
        let now = self.clock.now();
        let (token, secret) = self.tokens.issue_refresh_token(user_id, token_id, now)?;

        let record = RefreshTokenRecord {
            id: token_id,
            user_id,
            token_hash: hash_token(&secret),
            expires_at: now + self.tokens.refresh_ttl(),
            issued_at: now,
            revoked_at: None,
            replaced_by: None,
            user_agent: client.user_agent.clone(),
            ip_address: client.ip.clone(),
        };
        self.refresh_tokens.insert(&record).await?;

        Ok(token)
    }

    // ============================================
    // API Keys
    // ============================================

    /// Validate a presented API key and resolve its owner
    pub async fn validate_api_key(&self, key: &str) -> Result<Principal, AuthError> {
        let key_hash = api_key::hash_presented(&self.config.api_key_prefix, key)
            .ok_or(AuthError::InvalidCredentials)?;

        let now = self.clock.now();
        let record = self
            .api_keys
            .get_by_hash(&key_hash)
            .await?
            .filter(|k| k.is_usable_at(now))
            .ok_or(AuthError::InvalidCredentials)?;

        let owner = self
            .users
            .get_by_id(record.user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::InvalidCredentials)?;

        self.api_keys.update_last_used(record.id, now).await?;

        Ok(Principal {
            subject_id: owner.id,
            role: owner.role,
            method: AuthMethod::ApiKey,
        })
    }

    /// Create an API key; the plaintext is returned here and nowhere else
    pub async fn create_api_key(
        &self,
        user_id: Uuid,
        req: CreateApiKeyRequest,
    ) -> Result<ApiKeyCreated, AuthError> {
        req.validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let now = self.clock.now();
        if req.expires_at.is_some_and(|exp| exp <= now) {
            return Err(AuthError::Validation(
                "expires_at must be in the future".to_string(),
            ));
        }

        self.users
            .get_by_id(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::NotFound)?;

        let generated = api_key::generate(&self.config.api_key_prefix);
        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            user_id,
            name: req.name,
            key_hash: generated.key_hash,
            is_active: true,
            last_used_at: None,
            expires_at: req.expires_at,
            created_at: now,
        };
        self.api_keys.insert(&record).await?;

        tracing::info!(user_id = %user_id, key_id = %record.id, "API key created");

        Ok(ApiKeyCreated {
            api_key: record,
            key: generated.plaintext,
        })
    }

    pub async fn list_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKeyRecord>, AuthError> {
        self.api_keys.list_for_user(user_id).await
    }

    /// Delete one of the user's API keys
    pub async fn revoke_api_key(&self, user_id: Uuid, key_id: Uuid) -> Result<(), AuthError> {
        if !self.api_keys.delete(key_id, user_id).await? {
            return Err(AuthError::NotFound);
        }
        tracing::info!(user_id = %user_id, key_id = %key_id, "API key revoked");
        Ok(())
    }

    // ============================================
    // Registration & Password Management
    // ============================================

    /// Register a new customer account
    pub async fn register(&self, req: RegisterRequest) -> Result<User, AuthError> {
        self.register_with_role(req, Role::Customer).await
    }

    /// Register an account with an explicit role (admin-driven user creation)
    pub async fn register_with_role(
        &self,
        req: RegisterRequest,
        role: Role,
    ) -> Result<User, AuthError> {
        req.validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;
        self.passwords.validate_strength(&req.password)?;

        let email = normalize_email(&req.email);
        if self.users.get_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailExists);
        }

        let password_hash = self.passwords.hash(&req.password)?;
        let user = self
            .users
            .create(
                NewUser {
                    email,
                    password_hash,
                    name: req.name,
                    role,
                },
                self.clock.now(),
            )
            .await?;

        tracing::info!(user_id = %user.id, role = %user.role, "User registered");
        Ok(user)
    }

    /// Change password for an authenticated user and end all sessions
    pub async fn change_password(
        &self,
        user_id: Uuid,
        req: ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        req.validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !self.passwords.verify(&req.current_password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        self.passwords.validate_strength(&req.new_password)?;
        let password_hash = self.passwords.hash(&req.new_password)?;

        let now = self.clock.now();
        self.users.update_password(user_id, &password_hash, now).await?;
        self.refresh_tokens.revoke_all_for_user(user_id, now).await?;

        tracing::info!(user_id = %user_id, "Password changed, sessions revoked");
        Ok(())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
