//! Telegram binding surface: readiness, link start/status, webhook
//! ingress, and device→chat target resolution.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Extension, Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use pingwatch_core::token;
use pingwatch_store::LinkStatus;
use pingwatch_telegram::Update;

use crate::app::AppState;
use crate::auth::{require_scope, AuthContext};
use crate::error::ApiError;
use crate::linker;

#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkStartRequest {
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkStatusQuery {
    pub device_id: String,
    pub attempt_id: String,
}

fn readiness(
    enabled: bool,
    ready: bool,
    status: &str,
    device_id: Option<&str>,
    reason: Option<&str>,
) -> Json<Value> {
    Json(json!({
        "enabled": enabled,
        "ready": ready,
        "status": status,
        "device_id": device_id,
        "reason": reason,
    }))
}

fn not_configured(device_id: Option<&str>) -> Json<Value> {
    readiness(
        false,
        false,
        "not_configured",
        device_id,
        Some("Telegram bot token is not configured on the server."),
    )
}

/// GET /notifications/telegram/readiness?device_id=
///
/// Reports where the device stands: linked-and-reachable, waiting on the
/// user, waiting on a pending attempt, or unusable.
pub async fn telegram_readiness(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<Value>, ApiError> {
    let device_id = query.device_id.as_str();
    info!(device_id, "telegram readiness check requested");
    let Some(telegram) = &state.telegram else {
        return Ok(not_configured(Some(device_id)));
    };

    let Some(_device) = state.store.get_device(device_id)? else {
        return Ok(readiness(
            true,
            false,
            "unknown_device",
            Some(device_id),
            Some("Device is not registered yet. Refresh and try again."),
        ));
    };

    if let Some((chat_id, _)) = state.store.device_telegram_chat(device_id)? {
        return Ok(match telegram.get_chat(&chat_id).await {
            Ok((200, body)) if body.get("ok").and_then(Value::as_bool) == Some(true) => {
                readiness(true, true, "ready", Some(device_id), None)
            }
            Ok((status @ (400 | 403), body)) => {
                let description = body.get("description").and_then(Value::as_str);
                info!(device_id, status, "telegram chat not reachable yet");
                let reason = match description {
                    Some(desc) => format!("{desc}. Send /start, then check again."),
                    None => "Telegram chat is not reachable yet. Open Telegram and send /start, \
                             then check again."
                        .to_string(),
                };
                readiness(true, false, "needs_user_action", Some(device_id), Some(&reason))
            }
            Ok((status, _)) => {
                warn!(device_id, status, "unexpected telegram readiness status");
                readiness(
                    true,
                    false,
                    "error",
                    Some(device_id),
                    Some(&format!("Telegram check failed with status {status}.")),
                )
            }
            Err(e) => {
                warn!(device_id, error = %e, "telegram readiness request error");
                readiness(
                    true,
                    false,
                    "error",
                    Some(device_id),
                    Some("Unable to reach Telegram right now. Please retry in a few seconds."),
                )
            }
        });
    }

    if let Some(attempt) = state.store.latest_telegram_link_attempt(device_id)? {
        if attempt.status == LinkStatus::Pending {
            if attempt.is_expired(Utc::now()) {
                state
                    .store
                    .mark_telegram_link_attempt_expired(&attempt.attempt_id)?;
                return Ok(readiness(
                    true,
                    false,
                    "expired",
                    Some(device_id),
                    Some("The link attempt expired. Start a new one."),
                ));
            }
            return Ok(readiness(
                true,
                false,
                "pending",
                Some(device_id),
                Some("Open the connect link and send /start, then check again."),
            ));
        }
    }

    Ok(readiness(
        true,
        false,
        "needs_user_action",
        Some(device_id),
        Some("Start a link attempt to connect this device to Telegram."),
    ))
}

/// POST /notifications/telegram/link/start
///
/// Mints a fresh link token (never stored raw), records the PENDING
/// attempt, and returns the connect URL carrying the token.
pub async fn telegram_link_start(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<LinkStartRequest>,
) -> Result<Json<Value>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    if state.telegram.is_none() {
        return Ok(Json(json!({
            "enabled": false,
            "status": "not_configured",
            "device_id": payload.device_id,
            "reason": "Telegram bot token is not configured on the server.",
        })));
    }

    let device = state
        .store
        .get_device(&payload.device_id)?
        .ok_or_else(|| ApiError::not_found("device"))?;
    if let Some(caller) = user_id.as_deref() {
        if device.user_id.as_deref() != Some(caller) {
            return Err(ApiError::not_found("device"));
        }
    }

    let raw_token = token::issue_token(token::LINK_TOKEN_BYTES);
    let token_hash = token::hash_token(&raw_token);
    let ttl = state.config.telegram.link_token_ttl_seconds.max(1);
    let expires_at = Utc::now() + Duration::seconds(ttl as i64);
    let attempt = state.store.create_telegram_link_attempt(
        &payload.device_id,
        user_id.as_deref(),
        &token_hash,
        expires_at,
    )?;
    info!(
        device_id = %payload.device_id,
        attempt_id = %attempt.attempt_id,
        token = token::fingerprint(&token_hash),
        "telegram link attempt started"
    );

    let connect_url = state
        .config
        .telegram
        .onboarding_url
        .as_deref()
        .map(|base| linker::build_connect_url(base, &raw_token));

    Ok(Json(json!({
        "enabled": true,
        "status": "pending",
        "device_id": payload.device_id,
        "attempt_id": attempt.attempt_id,
        "connect_url": connect_url,
        "expires_at": attempt.expires_at,
    })))
}

/// GET /notifications/telegram/link/status?device_id&attempt_id
///
/// While the attempt is PENDING this also drives the fallback getUpdates
/// pull (with user feedback suppressed) and applies lazy expiry.
pub async fn telegram_link_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LinkStatusQuery>,
) -> Result<Json<Value>, ApiError> {
    let attempt = state
        .store
        .get_telegram_link_attempt(&query.attempt_id)?
        .filter(|a| a.device_id == query.device_id)
        .ok_or_else(|| ApiError::not_found("link attempt"))?;

    let attempt = if attempt.status == LinkStatus::Pending {
        if attempt.is_expired(Utc::now()) {
            state
                .store
                .mark_telegram_link_attempt_expired(&attempt.attempt_id)?
                .unwrap_or(attempt)
        } else {
            // Fallback pull: the webhook may not be reachable from
            // Telegram, so poll for the /start while the user waits.
            linker::pull_updates(&state).await;
            state
                .store
                .get_telegram_link_attempt(&attempt.attempt_id)?
                .unwrap_or(attempt)
        }
    } else {
        attempt
    };

    let linked = attempt.status == LinkStatus::Linked;
    Ok(Json(json!({
        "status": attempt.status,
        "ready": linked,
        "linked": linked,
        "device_id": attempt.device_id,
        "attempt_id": attempt.attempt_id,
        "chat_id": attempt.chat_id,
        "expires_at": attempt.expires_at,
    })))
}

/// POST /notifications/telegram/webhook — public ingress.
///
/// Optional shared-secret check, then the standard update handling with
/// user-facing confirmations enabled. Replies `{"ok": true}` regardless of
/// whether the update linked anything, so Telegram does not retry.
pub async fn telegram_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    if let Some(secret) = state
        .config
        .telegram
        .webhook_secret
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let presented = headers
            .get("x-telegram-bot-api-secret-token")
            .and_then(|v| v.to_str().ok());
        if presented != Some(secret) {
            return Err(ApiError::Unauthorized("invalid webhook secret".to_string()));
        }
    }

    if !body.is_object() {
        return Err(ApiError::BadRequest("webhook body must be a JSON object".to_string()));
    }
    let update: Update = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("malformed update: {e}")))?;

    let outcome = linker::handle_update(&state, &update, true).await;
    info!(?outcome, "telegram webhook processed");
    Ok(Json(json!({"ok": true})))
}

/// GET /notifications/telegram/target?device_id=
///
/// Device→chat resolution consumed by the notification dispatcher.
pub async fn telegram_target(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<Value>, ApiError> {
    let device_id = query.device_id.as_str();
    if state.telegram.is_none() {
        return Ok(Json(json!({
            "enabled": false,
            "linked": false,
            "device_id": device_id,
            "chat_id": null,
        })));
    }
    let chat = state.store.device_telegram_chat(device_id)?;
    let (linked, chat_id) = match chat {
        Some((chat_id, _)) => (true, Some(chat_id)),
        None => (false, None),
    };
    Ok(Json(json!({
        "enabled": true,
        "linked": linked,
        "device_id": device_id,
        "chat_id": chat_id,
    })))
}
