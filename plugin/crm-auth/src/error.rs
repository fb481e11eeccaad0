//! Authentication Error Types
//!
//! Centralized error handling for all credential operations.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Authentication errors
///
/// `InvalidCredentials` covers unknown emails, wrong passwords, inactive
/// accounts and bad API keys alike so that callers cannot enumerate accounts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Credential store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Email already registered")]
    EmailExists,

    #[error("Password does not meet requirements")]
    WeakPassword,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error")]
    Internal,
}

impl AuthError {
    /// Machine-readable error code used in the JSON envelope
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenInvalid => "invalid_token",
            AuthError::StoreUnavailable(_) => "store_unavailable",
            AuthError::EmailExists => "email_exists",
            AuthError::WeakPassword => "weak_password",
            AuthError::Forbidden => "forbidden",
            AuthError::NotFound => "not_found",
            AuthError::Validation(_) => "validation_error",
            AuthError::Config(_) => "configuration_error",
            AuthError::Internal => "internal_error",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials | AuthError::TokenExpired | AuthError::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::EmailExists => StatusCode::CONFLICT,
            AuthError::WeakPassword | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::Config(_) | AuthError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::Validation(msg) => msg.clone(),
            // Store and config details stay in the logs
            AuthError::StoreUnavailable(_) => "Service temporarily unavailable".to_string(),
            AuthError::Config(_) | AuthError::Internal => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        (
            self.status(),
            Json(serde_json::json!({
                "error": self.code(),
                "message": message
            })),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AuthError::StoreUnavailable(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        tracing::error!("Password hashing error: {:?}", err);
        AuthError::Internal
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::debug!("JWT error: {:?}", err);
        AuthError::TokenInvalid
    }
}
