//! Authentication Middleware
//!
//! Resolves the caller from a bearer access token or an API key and stores
//! the [`Principal`] in request extensions for extractors.

use crate::api_key;
use crate::error::AuthError;
use crate::models::{Principal, Role};
use crate::service::AuthService;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Shared auth service state
pub type AuthState = Arc<AuthService>;

/// Header carrying an API key for machine-to-machine calls
pub const API_KEY_HEADER: &str = "X-API-Key";

enum Credential<'a> {
    AccessToken(&'a str),
    ApiKey(&'a str),
}

fn presented_credential<'a>(
    headers: &'a HeaderMap,
    api_key_prefix: &str,
) -> Result<Credential<'a>, AuthError> {
    if let Some(key) = headers.get(API_KEY_HEADER) {
        let key = key.to_str().map_err(|_| AuthError::InvalidCredentials)?;
        return Ok(Credential::ApiKey(key.trim()));
    }

    let header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::InvalidCredentials)?;

    let value = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(AuthError::InvalidCredentials)?;

    if api_key::has_prefix(api_key_prefix, value) {
        Ok(Credential::ApiKey(value))
    } else {
        Ok(Credential::AccessToken(value))
    }
}

/// Require an authenticated caller
///
/// Accepts `Authorization: Bearer <access token>`, `Authorization: Bearer
/// <api key>` or `X-API-Key: <api key>`.
pub async fn require_auth(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let principal = match presented_credential(req.headers(), &auth.config().api_key_prefix)? {
        Credential::AccessToken(token) => auth.validate(token)?,
        Credential::ApiKey(key) => auth.validate_api_key(key).await?,
    };

    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

fn check_role(req: &Request, roles: &[Role]) -> Result<(), AuthError> {
    let principal = req
        .extensions()
        .get::<Principal>()
        .ok_or(AuthError::InvalidCredentials)?;

    if !roles.contains(&principal.role) {
        tracing::debug!(
            subject_id = %principal.subject_id,
            role = %principal.role,
            "Role check failed"
        );
        return Err(AuthError::Forbidden);
    }
    Ok(())
}

/// Require admin role
///
/// Must be layered inside [`require_auth`].
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AuthError> {
    check_role(&req, &[Role::Admin])?;
    Ok(next.run(req).await)
}

/// Require one of the specified roles
///
/// Must be layered inside [`require_auth`].
pub fn require_role(
    roles: &'static [Role],
) -> impl Fn(Request, Next) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AuthError>> + Send>>
       + Clone
       + Send {
    move |req: Request, next: Next| {
        Box::pin(async move {
            check_role(&req, roles)?;
            Ok(next.run(req).await)
        })
    }
}
