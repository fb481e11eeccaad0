//! CRM Authentication & Credential Service
//!
//! Credential handling for the CRM API:
//! - Email/password login with Argon2id hashes
//! - JWT access tokens carrying subject and role
//! - Single-use refresh tokens with rotation and reuse detection
//! - API keys for machine-to-machine calls, stored only as SHA-256 hashes
//! - Axum middleware resolving the caller from either credential
//!
//! # Configuration
//!
//! All configuration is loaded from environment variables:
//! - `JWT_SECRET` - Secret key for signing JWTs (required, min 32 chars)
//! - `ACCESS_TOKEN_TTL_HOURS` - Access token lifetime (default: 24)
//! - `REFRESH_TOKEN_TTL_HOURS` - Refresh token lifetime (default: 168)
//! - `JWT_ISSUER` - JWT issuer claim (default: "crm")
//! - `JWT_AUDIENCE` - JWT audience claim (default: "crm-api")
//! - `API_KEY_PREFIX` - Scheme marker on API keys (default: "crm_")
//!
//! # Usage
//!
//! ```rust,ignore
//! use crm_auth::{AuthConfig, AuthService, ClientInfo, LoginRequest};
//!
//! let auth = AuthService::postgres(db_pool, AuthConfig::from_env()?)?;
//! let response = auth.login(login_request, ClientInfo::default()).await?;
//! let principal = auth.validate(&response.access_token)?;
//! ```

pub mod api_key;
pub mod clock;
pub mod config;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod models;
pub mod password;
pub mod service;
pub mod store;
pub mod token;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AuthConfig;
pub use error::AuthError;
pub use extractors::AuthUser;
pub use middleware::{require_admin, require_auth, require_role, AuthState};
pub use models::*;
pub use service::AuthService;
pub use store::{ApiKeyStore, RefreshTokenStore, UserStore};
