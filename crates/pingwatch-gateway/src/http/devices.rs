use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::Deserialize;

use pingwatch_store::Device;

use crate::app::AppState;
use crate::auth::{require_scope, AuthContext};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub device_id: Option<String>,
    pub label: Option<String>,
}

/// POST /devices/register — idempotent register-and-claim.
pub async fn register_device(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<RegisterDeviceRequest>,
) -> Result<Json<Device>, ApiError> {
    let user_id = require_scope(&state, &ctx)?;
    let device = state
        .store
        .register_device(
            payload.device_id.as_deref(),
            payload.label.as_deref(),
            user_id.as_deref(),
        )?
        .ok_or_else(|| ApiError::not_found("device"))?;
    Ok(Json(device))
}
