//! JWT issuance and validation.
//!
//! Access tokens are plain HS256 JWTs. Refresh tokens are a signed JWT
//! naming the stored token row, followed by `.` and a random secret whose
//! SHA-256 hash is what the store keeps.
//!
//! Expiry is checked against the caller-supplied time rather than inside
//! `jsonwebtoken`, so signature failures and expiry are reported separately.

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::{AccessTokenClaims, RefreshTokenClaims, User};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Length of the random part of a refresh token
const REFRESH_SECRET_LEN: usize = 48;

/// Signs and verifies access and refresh tokens
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            access_ttl: config.access_token_ttl(),
            refresh_ttl: config.refresh_token_ttl(),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation
    }

    // ============================================
    // Access Tokens
    // ============================================

    /// Generate an access token for a user
    pub fn issue_access_token(&self, user: &User, now: DateTime<Utc>) -> Result<String, AuthError> {
        let exp = now + self.access_ttl;

        let claims = AccessTokenClaims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| {
                tracing::error!("Failed to sign access token: {:?}", e);
                AuthError::Internal
            })?;
        Ok(token)
    }

    /// Validate an access token
    ///
    /// Signature, issuer and audience failures yield `TokenInvalid`; a token
    /// that verifies but whose `exp` is not after `now` yields `TokenExpired`.
    pub fn validate_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessTokenClaims, AuthError> {
        let mut validation = self.validation();
        validation.set_audience(&[&self.audience]);

        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)?.claims;

        if now.timestamp() >= claims.exp {
            return Err(AuthError::TokenExpired);
        }

        Ok(claims)
    }

    // ============================================
    // Refresh Tokens
    // ============================================

    /// Build a refresh token for the given stored row
    ///
    /// Returns `(token, secret)`; the caller persists `hash_token(secret)`.
    pub fn issue_refresh_token(
        &self,
        user_id: Uuid,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(String, String), AuthError> {
        let claims = RefreshTokenClaims {
            sub: user_id,
            tid: token_id,
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
            iss: self.issuer.clone(),
        };

        let jwt = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| {
                tracing::error!("Failed to sign refresh token: {:?}", e);
                AuthError::Internal
            })?;

        let secret = random_secret(REFRESH_SECRET_LEN);
        Ok((format!("{}.{}", jwt, secret), secret))
    }

    /// Split and verify a refresh token, returning its claims and secret
    ///
    /// Every failure, expiry included, is `TokenInvalid`: an unusable refresh
    /// token always means logging in again. Pass `now = None` to skip the
    /// expiry check (logout of an already-expired session).
    pub fn parse_refresh_token<'a>(
        &self,
        token: &'a str,
        now: Option<DateTime<Utc>>,
    ) -> Result<(RefreshTokenClaims, &'a str), AuthError> {
        let (jwt_part, secret) = token.rsplit_once('.').ok_or(AuthError::TokenInvalid)?;
        if secret.is_empty() {
            return Err(AuthError::TokenInvalid);
        }

        let claims = decode::<RefreshTokenClaims>(jwt_part, &self.decoding_key, &self.validation())?
            .claims;

        if let Some(now) = now {
            if now.timestamp() >= claims.exp {
                return Err(AuthError::TokenInvalid);
            }
        }

        Ok((claims, secret))
    }
}

/// Random alphanumeric string
pub(crate) fn random_secret(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Hash a token for secure storage (SHA-256, hex)
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::models::Role;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "ada@example.com".into(),
            password_hash: String::new(),
            name: "Ada".into(),
            role: Role::Sales,
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_access_token_round_trip() {
        let issuer = TokenIssuer::new(&test_config());
        let user = user();
        let now = Utc::now();

        let token = issuer.issue_access_token(&user, now).unwrap();
        let claims = issuer.validate_access_token(&token, now).unwrap();

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, "sales");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_access_token_expiry_boundary() {
        let issuer = TokenIssuer::new(&test_config());
        let issued_at = Utc::now();
        let token = issuer.issue_access_token(&user(), issued_at).unwrap();

        assert!(issuer
            .validate_access_token(&token, issued_at + Duration::minutes(59))
            .is_ok());
        assert_eq!(
            issuer
                .validate_access_token(&token, issued_at + Duration::minutes(61))
                .unwrap_err(),
            AuthError::TokenExpired
        );
    }

    #[test]
    fn test_tampered_payload_is_invalid_not_expired() {
        let issuer = TokenIssuer::new(&test_config());
        let issued_at = Utc::now();
        let token = issuer.issue_access_token(&user(), issued_at).unwrap();

        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let payload = &mut parts[1];
        let flipped = if payload.ends_with('A') { 'B' } else { 'A' };
        payload.pop();
        payload.push(flipped);
        let tampered = parts.join(".");

        // Even well past expiry, a bad signature is reported as invalid
        let later = issued_at + Duration::hours(5);
        assert_eq!(
            issuer.validate_access_token(&tampered, later).unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    #[test]
    fn test_foreign_secret_is_invalid() {
        let issuer = TokenIssuer::new(&test_config());
        let other = TokenIssuer::new(&AuthConfig {
            jwt_secret: "b".repeat(32),
            ..test_config()
        });
        let now = Utc::now();
        let token = other.issue_access_token(&user(), now).unwrap();

        assert_eq!(
            issuer.validate_access_token(&token, now).unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    #[test]
    fn test_wrong_audience_is_invalid() {
        let issuer = TokenIssuer::new(&test_config());
        let other = TokenIssuer::new(&AuthConfig {
            jwt_audience: "billing-api".into(),
            ..test_config()
        });
        let now = Utc::now();
        let token = other.issue_access_token(&user(), now).unwrap();

        assert_eq!(
            issuer.validate_access_token(&token, now).unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    #[test]
    fn test_refresh_token_parse() {
        let issuer = TokenIssuer::new(&test_config());
        let (user_id, token_id, now) = (Uuid::new_v4(), Uuid::new_v4(), Utc::now());

        let (token, secret) = issuer.issue_refresh_token(user_id, token_id, now).unwrap();
        let (claims, parsed_secret) = issuer.parse_refresh_token(&token, Some(now)).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.tid, token_id);
        assert_eq!(parsed_secret, secret);
        assert_eq!(secret.len(), REFRESH_SECRET_LEN);
    }

    #[test]
    fn test_refresh_token_expiry_is_invalid() {
        let issuer = TokenIssuer::new(&test_config());
        let now = Utc::now();
        let (token, _) = issuer
            .issue_refresh_token(Uuid::new_v4(), Uuid::new_v4(), now)
            .unwrap();

        let later = now + Duration::hours(25);
        assert_eq!(
            issuer.parse_refresh_token(&token, Some(later)).unwrap_err(),
            AuthError::TokenInvalid
        );
        assert!(issuer.parse_refresh_token(&token, None).is_ok());
    }

    #[test]
    fn test_tokens_are_not_interchangeable() {
        let issuer = TokenIssuer::new(&test_config());
        let now = Utc::now();
        let access = issuer.issue_access_token(&user(), now).unwrap();
        let (refresh, _) = issuer
            .issue_refresh_token(Uuid::new_v4(), Uuid::new_v4(), now)
            .unwrap();

        assert!(issuer.parse_refresh_token(&access, Some(now)).is_err());
        assert!(issuer.validate_access_token(&refresh, now).is_err());
    }

    #[test]
    fn test_hash_token_is_deterministic() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
