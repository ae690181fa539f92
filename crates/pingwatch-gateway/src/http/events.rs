//! Event lifecycle: initiate → (relay) upload → finalize → summary.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use pingwatch_store::{Event, EventVerdict, NewEvent};

use crate::app::AppState;
use crate::auth::{require_scope, AuthContext};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct InitiateUploadRequest {
    pub event_id: Option<String>,
    pub session_id: String,
    pub device_id: String,
    pub trigger_type: String,
    pub duration_seconds: f64,
    pub clip_mime: String,
    pub clip_size_bytes: i64,
}

#[derive(Debug, Deserialize)]
pub struct FinalizeUploadRequest {
    pub etag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    pub summary: String,
    pub label: Option<String>,
    pub confidence: Option<f64>,
    pub inference_provider: Option<String>,
    pub inference_model: Option<String>,
    pub should_notify: Option<bool>,
    pub alert_reason: Option<String>,
    #[serde(default)]
    pub matched_rules: Vec<String>,
    #[serde(default)]
    pub detected_entities: Vec<String>,
    #[serde(default)]
    pub detected_actions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    pub session_id: Option<String>,
}

/// POST /events/upload/initiate
///
/// Reserves the event row and hands back an upload target: a signed cloud
/// URL when the cloud backend is healthy, otherwise a relay URL on this
/// API. Idempotent on `event_id`.
pub async fn initiate_upload(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<InitiateUploadRequest>,
) -> Result<Json<Value>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    if payload.duration_seconds < 0.0 {
        return Err(ApiError::BadRequest(
            "duration_seconds must be non-negative".to_string(),
        ));
    }
    if payload.clip_size_bytes < 0 {
        return Err(ApiError::BadRequest(
            "clip_size_bytes must be non-negative".to_string(),
        ));
    }

    // Mint the id up front so the blob name and upload target always match
    // the reserved row, client-chosen or not.
    let event_id = payload
        .event_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let plan = state
        .blob
        .plan_upload(
            &payload.session_id,
            &event_id,
            &payload.clip_mime,
            &state.config.gateway.public_base_url,
        )
        .await;

    let event = state
        .store
        .create_event(NewEvent {
            session_id: &payload.session_id,
            device_id: &payload.device_id,
            trigger_type: &payload.trigger_type,
            duration_seconds: payload.duration_seconds,
            clip_uri: &plan.blob_url,
            clip_mime: &payload.clip_mime,
            clip_size_bytes: payload.clip_size_bytes,
            event_id: Some(&event_id),
            clip_container: Some(&plan.container),
            clip_blob_name: Some(&plan.blob_name),
            user_id: user_id.as_deref(),
        })?
        .ok_or_else(|| ApiError::not_found("session"))?;

    Ok(Json(json!({
        "event": event,
        "upload_url": plan.upload_url,
        "blob_url": plan.blob_url,
        "expires_at": plan.expires_at.to_rfc3339(),
    })))
}

/// PUT /events/{event_id}/upload — relay upload of the clip bytes.
///
/// Path traversal is rejected before a single byte is written; success
/// flips the event to local mode and returns the strong ETag.
pub async fn relay_upload(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(event_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, HeaderMap, Json<Event>), ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    let event = state
        .store
        .get_event(&event_id, user_id.as_deref())?
        .ok_or_else(|| ApiError::not_found("event"))?;
    let blob_name = event
        .clip_blob_name
        .as_deref()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ApiError::BadRequest("event has no blob name".to_string()))?;

    let etag = state.blob.store_relay_upload(blob_name, &body)?;
    let etag = if state.config.blob.strong_etags {
        etag
    } else {
        format!("\"{}\"", uuid::Uuid::new_v4().simple())
    };
    let updated = state
        .store
        .mark_event_clip_uploaded_via_local_api(&event_id, blob_name)?
        .ok_or_else(|| ApiError::not_found("event"))?;
    let updated = state
        .store
        .mark_event_clip_uploaded(&event_id, Some(&etag))?
        .unwrap_or(updated);

    info!(event_id = %event_id, bytes = body.len(), "relay upload stored");
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert("etag", value);
    }
    Ok((StatusCode::CREATED, headers, Json(updated)))
}

/// POST /events/{event_id}/upload/finalize
///
/// Stamps `clip_uploaded_at` once, then enqueues the processing job
/// best-effort: a broken queue logs and leaves the event `processing` for
/// operator reprocess, it never fails the request.
pub async fn finalize_upload(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(event_id): Path<String>,
    Json(payload): Json<FinalizeUploadRequest>,
) -> Result<Json<Event>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    state
        .store
        .get_event(&event_id, user_id.as_deref())?
        .ok_or_else(|| ApiError::not_found("event"))?;
    let event = state
        .store
        .mark_event_clip_uploaded(&event_id, payload.etag.as_deref())?
        .ok_or_else(|| ApiError::not_found("event"))?;

    let analysis_prompt = state
        .store
        .get_session(&event.session_id, user_id.as_deref())?
        .and_then(|s| s.analysis_prompt);

    let job_payload = json!({
        "event_id": event.event_id,
        "session_id": event.session_id,
        "device_id": event.device_id,
        "clip_blob_name": event.clip_blob_name,
        "clip_container": event.clip_container,
        "clip_mime": event.clip_mime,
        "clip_uri": event.clip_uri,
        "analysis_prompt": analysis_prompt,
    });
    let mut job_id = state.queue.try_enqueue(&job_payload);
    if job_id.is_none() && state.config.queue.retry_on_finalize {
        job_id = state.queue.try_enqueue(&job_payload);
    }
    match job_id {
        Some(job_id) => info!(event_id = %event.event_id, job_id = %job_id, "processing job enqueued"),
        None => warn!(event_id = %event.event_id, "enqueue failed; event stays processing"),
    }

    Ok(Json(event))
}

/// POST /events/{event_id}/summary — terminal writeback from the worker.
pub async fn post_summary(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(event_id): Path<String>,
    Json(payload): Json<SummaryRequest>,
) -> Result<Json<Event>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    if let Some(user) = user_id.as_deref() {
        state
            .store
            .get_event(&event_id, Some(user))?
            .ok_or_else(|| ApiError::not_found("event"))?;
    }
    let verdict = EventVerdict {
        summary: payload.summary,
        label: payload.label,
        confidence: payload.confidence,
        inference_provider: payload.inference_provider,
        inference_model: payload.inference_model,
        should_notify: payload.should_notify,
        alert_reason: payload.alert_reason,
        matched_rules: payload.matched_rules,
        detected_entities: payload.detected_entities,
        detected_actions: payload.detected_actions,
    };
    let event = state
        .store
        .update_event_summary(&event_id, &verdict)?
        .ok_or_else(|| ApiError::not_found("event"))?;
    Ok(Json(event))
}

/// GET /events/{event_id}/summary
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(event_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    let event = state
        .store
        .get_event(&event_id, user_id.as_deref())?
        .ok_or_else(|| ApiError::not_found("event"))?;
    Ok(Json(json!({
        "event_id": event.event_id,
        "session_id": event.session_id,
        "status": event.status,
        "summary": event.summary,
        "label": event.label,
        "confidence": event.confidence,
        "should_notify": event.should_notify,
        "alert_reason": event.alert_reason,
        "matched_rules": event.matched_rules,
        "detected_entities": event.detected_entities,
        "detected_actions": event.detected_actions,
        "inference_provider": event.inference_provider,
        "inference_model": event.inference_model,
    })))
}

/// GET /events/{event_id} — full event record.
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(event_id): Path<String>,
) -> Result<Json<Event>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    let event = state
        .store
        .get_event(&event_id, user_id.as_deref())?
        .ok_or_else(|| ApiError::not_found("event"))?;
    Ok(Json(event))
}

/// GET /events?session_id= — owner-scoped listing.
///
/// Filtering by a session the caller cannot see is a 404, so session ids
/// cannot be probed across tenants through the listing.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    if let Some(session_id) = query.session_id.as_deref() {
        state
            .store
            .get_session(session_id, user_id.as_deref())?
            .ok_or_else(|| ApiError::not_found("session"))?;
    }
    let events = state
        .store
        .list_events(query.session_id.as_deref(), user_id.as_deref())?;
    Ok(Json(events))
}
