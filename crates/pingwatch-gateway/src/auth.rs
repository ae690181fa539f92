//! Bearer-token authentication.
//!
//! The middleware enforces the write gate (`AUTH_REQUIRED` semantics) and
//! opportunistically authenticates any presented token so read handlers can
//! scope their queries. Handlers read the result from [`AuthContext`].

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use pingwatch_core::token;

use crate::app::AppState;
use crate::error::ApiError;

/// Write endpoints reachable without a token even when auth is required.
const PUBLIC_WRITE_PATHS: &[&str] = &["/auth/dev/login", "/notifications/telegram/webhook"];

/// Authenticated caller, if any. Inserted into request extensions by the
/// middleware.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub user_id: Option<String>,
    pub auth_session_id: Option<String>,
}

fn normalized_path(path: &str) -> &str {
    if path == "/" {
        path
    } else {
        path.trim_end_matches('/')
    }
}

fn is_public_write_path(path: &str) -> bool {
    PUBLIC_WRITE_PATHS.contains(&normalized_path(path))
}

fn is_write_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Pull the token out of `Authorization: Bearer <token>`.
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Validate a raw bearer token against the auth-session table.
fn authenticate_token(state: &AppState, raw_token: &str) -> Result<AuthContext, ApiError> {
    let token_hash = token::hash_token(raw_token);
    let session = state
        .store
        .get_auth_session_by_token_hash(&token_hash)?
        .ok_or_else(|| ApiError::Unauthorized("invalid auth token".to_string()))?;
    if session.revoked_at.is_some() {
        return Err(ApiError::Unauthorized("invalid auth token".to_string()));
    }
    if !session.is_valid(Utc::now()) {
        return Err(ApiError::Unauthorized("expired auth token".to_string()));
    }
    let user = state
        .store
        .get_user(&session.user_id)?
        .ok_or_else(|| ApiError::Unauthorized("invalid auth token".to_string()))?;
    Ok(AuthContext {
        user_id: Some(user.user_id),
        auth_session_id: Some(session.auth_session_id),
    })
}

/// Request-level auth: reject writes without a valid token when auth is
/// required, validate any presented token, and stash the caller identity.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();
    let ctx = if is_public_write_path(&path) {
        AuthContext::default()
    } else if let Some(raw) = extract_bearer_token(request.headers()) {
        authenticate_token(&state, &raw)?
    } else {
        if state.config.auth.required && is_write_method(request.method()) {
            return Err(ApiError::Unauthorized("missing bearer token".to_string()));
        }
        AuthContext::default()
    };
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

/// Caller scope for owner-scoped endpoints: the authenticated user, or
/// `None` when auth is disabled. With auth required and no token the
/// request is rejected — reads included.
pub fn require_scope(state: &AppState, ctx: &AuthContext) -> Result<Option<String>, ApiError> {
    if let Some(user_id) = &ctx.user_id {
        return Ok(Some(user_id.clone()));
    }
    if state.config.auth.required {
        return Err(ApiError::Unauthorized("missing bearer token".to_string()));
    }
    Ok(None)
}
