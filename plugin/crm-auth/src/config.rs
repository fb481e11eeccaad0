//! Authentication Configuration
//!
//! All configuration values are loaded from environment variables.
//! No hardcoded secrets or sensitive data.

use crate::error::AuthError;
use chrono::Duration;
use std::env;

/// Authentication configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// JWT secret key for signing tokens (from JWT_SECRET env var)
    pub jwt_secret: String,

    /// Access token lifetime in hours (from ACCESS_TOKEN_TTL_HOURS env var)
    pub access_token_ttl_hours: i64,

    /// Refresh token lifetime in hours (from REFRESH_TOKEN_TTL_HOURS env var)
    pub refresh_token_ttl_hours: i64,

    /// JWT issuer (from JWT_ISSUER env var)
    pub jwt_issuer: String,

    /// JWT audience (from JWT_AUDIENCE env var)
    pub jwt_audience: String,

    /// Scheme marker prepended to every API key (from API_KEY_PREFIX env var)
    pub api_key_prefix: String,

    /// Argon2 memory cost in KiB (from ARGON2_MEMORY_COST env var)
    pub argon2_memory_cost: u32,

    /// Argon2 time cost (iterations) (from ARGON2_TIME_COST env var)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (from ARGON2_PARALLELISM env var)
    pub argon2_parallelism: u32,

    /// Minimum password length (from MIN_PASSWORD_LENGTH env var)
    pub min_password_length: usize,
}

impl AuthConfig {
    /// Load configuration from environment variables
    ///
    /// Fails with [`AuthError::Config`] if `JWT_SECRET` is not set.
    pub fn from_env() -> Result<Self, AuthError> {
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AuthError::Config("JWT_SECRET must be set".to_string()))?;

        Ok(Self {
            jwt_secret,
            access_token_ttl_hours: parse_var("ACCESS_TOKEN_TTL_HOURS", 24),
            refresh_token_ttl_hours: parse_var("REFRESH_TOKEN_TTL_HOURS", 168), // 7 days
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "crm".to_string()),
            jwt_audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| "crm-api".to_string()),
            api_key_prefix: env::var("API_KEY_PREFIX").unwrap_or_else(|_| "crm_".to_string()),
            argon2_memory_cost: parse_var("ARGON2_MEMORY_COST", 65536), // 64 MiB
            argon2_time_cost: parse_var("ARGON2_TIME_COST", 3),
            argon2_parallelism: parse_var("ARGON2_PARALLELISM", 4),
            min_password_length: parse_var("MIN_PASSWORD_LENGTH", 8),
        })
    }

    /// Access token lifetime
    pub fn access_token_ttl(&self) -> Duration {
        Duration::hours(self.access_token_ttl_hours)
    }

    /// Refresh token lifetime
    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::hours(self.refresh_token_ttl_hours)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.jwt_secret.len() < 32 {
            return Err(AuthError::Config(
                "JWT_SECRET must be at least 32 characters".to_string(),
            ));
        }

        if self.access_token_ttl_hours <= 0 {
            return Err(AuthError::Config(
                "ACCESS_TOKEN_TTL_HOURS must be positive".to_string(),
            ));
        }

        if self.refresh_token_ttl_hours <= self.access_token_ttl_hours {
            return Err(AuthError::Config(
                "REFRESH_TOKEN_TTL_HOURS must be greater than ACCESS_TOKEN_TTL_HOURS".to_string(),
            ));
        }

        if self.api_key_prefix.is_empty()
            || !self
                .api_key_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(AuthError::Config(
                "API_KEY_PREFIX must be non-empty and contain only [A-Za-z0-9_]".to_string(),
            ));
        }

        if self.min_password_length < 8 {
            return Err(AuthError::Config(
                "MIN_PASSWORD_LENGTH must be at least 8".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) fn test_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "a".repeat(32),
        access_token_ttl_hours: 1,
        refresh_token_ttl_hours: 24,
        jwt_issuer: "crm-test".to_string(),
        jwt_audience: "crm-test-api".to_string(),
        api_key_prefix: "crm_".to_string(),
        // Cheap parameters keep the test suite fast
        argon2_memory_cost: 1024,
        argon2_time_cost: 1,
        argon2_parallelism: 1,
        min_password_length: 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_short_secret() {
        let config = AuthConfig {
            jwt_secret: "short".to_string(),
            ..test_config()
        };

        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_refresh_must_outlive_access() {
        let config = AuthConfig {
            access_token_ttl_hours: 24,
            refresh_token_ttl_hours: 24,
            ..test_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prefix_charset() {
        let config = AuthConfig {
            api_key_prefix: "crm.".to_string(),
            ..test_config()
        };
        assert!(config.validate().is_err());

        let config = AuthConfig {
            api_key_prefix: String::new(),
            ..test_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ttl_durations() {
        let config = test_config();
        assert_eq!(config.access_token_ttl(), Duration::hours(1));
        assert_eq!(config.refresh_token_ttl(), Duration::hours(24));
    }
}
