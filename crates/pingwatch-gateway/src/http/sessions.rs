use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use pingwatch_store::Session;

use crate::app::AppState;
use crate::auth::{require_scope, AuthContext};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub device_id: String,
    pub analysis_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopSessionRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub device_id: Option<String>,
}

/// POST /sessions/start
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    let session = state
        .store
        .create_session(
            &payload.device_id,
            payload.analysis_prompt.as_deref(),
            user_id.as_deref(),
        )?
        .ok_or_else(|| ApiError::not_found("device"))?;
    Ok(Json(session))
}

/// POST /sessions/stop — monotonic close.
pub async fn stop_session(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<StopSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    let session = state
        .store
        .stop_session(&payload.session_id, user_id.as_deref())?
        .ok_or_else(|| ApiError::not_found("session"))?;
    Ok(Json(session))
}

/// POST /sessions/force-stop
///
/// Closes the session, then best-effort cancels the session's queued jobs
/// and purges its still-processing events. From the caller's perspective
/// the session is over when this returns; a job already in flight is not
/// interrupted, but its event row is gone.
pub async fn force_stop_session(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<StopSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    let session = state
        .store
        .stop_session(&payload.session_id, user_id.as_deref())?
        .ok_or_else(|| ApiError::not_found("session"))?;

    let dropped_queued_jobs = state.queue.cancel_session_jobs(&payload.session_id);
    let dropped_processing_events = state
        .store
        .delete_processing_events_for_session(&payload.session_id, user_id.as_deref())?;

    info!(
        session_id = %payload.session_id,
        dropped_processing_events,
        dropped_queued_jobs,
        "session force-stopped"
    );
    Ok(Json(json!({
        "status": "stopped",
        "session": session,
        "dropped_processing_events": dropped_processing_events,
        "dropped_queued_jobs": dropped_queued_jobs,
    })))
}

/// GET /sessions?device_id= — owner-scoped listing.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    let sessions = state
        .store
        .list_sessions(query.device_id.as_deref(), user_id.as_deref())?;
    Ok(Json(sessions))
}
