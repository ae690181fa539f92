//! Dev login — the single public write endpoint that mints bearer tokens.

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use pingwatch_core::token;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct DevLoginRequest {
    pub user_id: Option<String>,
    pub email: Option<String>,
}

/// POST /auth/dev/login
///
/// Upserts a user (email first, then id), mints a fresh bearer token, and
/// returns it with its expiry. The raw token exists only in this response;
/// the store keeps its hash.
pub async fn dev_login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DevLoginRequest>,
) -> Result<Json<Value>, ApiError> {
    if !state.config.auth.dev_login_enabled {
        return Err(ApiError::not_found("resource"));
    }

    let normalized_email = payload
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase);

    let mut user = None;
    if let Some(email) = &normalized_email {
        user = state.store.get_user_by_email(email)?;
    }
    if user.is_none() {
        if let Some(user_id) = payload.user_id.as_deref().filter(|id| !id.is_empty()) {
            user = state.store.get_user(user_id)?;
        }
    }
    let user = match user {
        Some(user) => user,
        None => state
            .store
            .create_user(payload.user_id.as_deref(), normalized_email.as_deref())?,
    };

    let raw_token = token::issue_token(token::BEARER_TOKEN_BYTES);
    let ttl = state.config.auth.effective_token_ttl_seconds();
    let expires_at = Utc::now() + Duration::seconds(ttl as i64);
    state.store.create_auth_session(
        &user.user_id,
        &token::hash_token(&raw_token),
        Some(expires_at),
    )?;
    info!(user_id = %user.user_id, ttl_seconds = ttl, "dev login issued");

    Ok(Json(json!({
        "access_token": raw_token,
        "token_type": "bearer",
        "user_id": user.user_id,
        "expires_at": expires_at.to_rfc3339(),
    })))
}
