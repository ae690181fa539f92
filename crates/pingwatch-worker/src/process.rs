//! Per-job processing pipeline.

use serde_json::{json, Value};
use tracing::{error, info, warn};

use pingwatch_blob::BlobGateway;
use pingwatch_core::PingWatchConfig;
use pingwatch_inference::{normalize_video_mime, InferenceResult, InferenceRouter};
use pingwatch_notify::{NotificationDispatcher, NotificationPayload};

use crate::api::{ControlApi, SummaryBody};

/// Everything a job needs. Built once per worker process; the only mutable
/// state inside is the router's rule cache.
pub struct WorkerContext {
    pub config: PingWatchConfig,
    pub api: ControlApi,
    pub blob: BlobGateway,
    pub router: InferenceRouter,
    pub dispatcher: NotificationDispatcher,
}

impl WorkerContext {
    pub fn new(config: PingWatchConfig) -> Self {
        let api = ControlApi::new(&config.worker.api_base_url);
        let blob = BlobGateway::new(&config.blob);
        let router = InferenceRouter::from_settings(&config.inference);
        let dispatcher = NotificationDispatcher::new(
            &config.worker.api_base_url,
            &config.telegram,
            &config.notify,
        );
        Self {
            config,
            api,
            blob,
            router,
            dispatcher,
        }
    }
}

fn field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Process one `clip_uploaded` job payload.
///
/// Every failure between download and writeback still ends in a terminal
/// error summary so the event reaches `done`; reprocessing is an operator
/// action, never an automatic retry.
pub async fn process_clip(ctx: &WorkerContext, payload: &Value) -> Value {
    let Some(event_id) = field(payload, "event_id") else {
        warn!("job payload has no event_id; dropping");
        return json!({"status": "error", "reason": "missing event_id"});
    };
    let session_id = field(payload, "session_id").unwrap_or("");
    info!(event_id, session_id, "processing clip");

    if ctx.config.worker.test_mode {
        let body = SummaryBody {
            summary: "Test mode: clip processed without inference".to_string(),
            label: Some("test".to_string()),
            confidence: Some(1.0),
            should_notify: Some(true),
            alert_reason: Some("Test mode".to_string()),
            ..Default::default()
        };
        return match ctx.api.post_event_summary(event_id, &body).await {
            Ok(_) => json!({"status": "done", "mode": "test", "event_id": event_id}),
            Err(e) => {
                error!(event_id, error = %e, "test-mode writeback failed");
                json!({"status": "error", "event_id": event_id})
            }
        };
    }

    match run_pipeline(ctx, payload, event_id, session_id).await {
        Ok(result) => json!({
            "status": "done",
            "event_id": event_id,
            "label": result.label,
            "should_notify": result.should_notify,
        }),
        Err(failure) => {
            if failure.upstream_auth {
                // Credentials problems are actionable and noisy enough
                // without a full error chain.
                error!(event_id, "inference authentication failed; check provider API keys");
            } else {
                error!(event_id, error = %failure.message, "clip processing failed");
            }
            let body = SummaryBody {
                summary: format!("Processing failed: {}", failure.message),
                label: Some("error".to_string()),
                confidence: Some(0.0),
                should_notify: Some(false),
                ..Default::default()
            };
            if let Err(e) = ctx.api.post_event_summary(event_id, &body).await {
                error!(event_id, error = %e, "error-summary writeback failed; event stays processing");
            }
            json!({"status": "error", "event_id": event_id})
        }
    }
}

struct PipelineFailure {
    message: String,
    upstream_auth: bool,
}

impl PipelineFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            upstream_auth: false,
        }
    }
}

async fn run_pipeline(
    ctx: &WorkerContext,
    payload: &Value,
    event_id: &str,
    session_id: &str,
) -> Result<InferenceResult, PipelineFailure> {
    let container = field(payload, "clip_container").unwrap_or("");
    let blob_name = field(payload, "clip_blob_name").unwrap_or("");
    let clip_mime = normalize_video_mime(field(payload, "clip_mime"));
    let analysis_prompt = field(payload, "analysis_prompt");

    let clip_data = ctx
        .blob
        .download(container, blob_name)
        .await
        .map_err(|e| PipelineFailure::new(format!("clip download failed: {e}")))?;
    info!(event_id, bytes = clip_data.len(), "clip downloaded");

    // Best effort: the primary inference path is video-mode, so a clip
    // that yields no frames still proceeds.
    let frames = crate::frames::extract_frames_as_data_uris(
        &clip_data,
        ctx.config.inference.num_frames,
    )
    .await;

    let result = ctx
        .router
        .analyze_clip(&clip_data, &clip_mime, analysis_prompt, &frames)
        .await
        .map_err(|e| PipelineFailure {
            upstream_auth: e.is_upstream_auth(),
            message: e.to_string(),
        })?;

    let body = SummaryBody {
        summary: result.summary.clone(),
        label: Some(result.label.clone()),
        confidence: Some(result.confidence),
        inference_provider: Some(result.provider.clone()),
        inference_model: result.model.clone(),
        should_notify: Some(result.should_notify),
        alert_reason: Some(result.alert_reason.clone()),
        matched_rules: result.matched_rules.clone(),
        detected_entities: result.detected_entities.clone(),
        detected_actions: result.detected_actions.clone(),
    };
    ctx.api
        .post_event_summary(event_id, &body)
        .await
        .map_err(|e| PipelineFailure::new(format!("summary writeback failed: {e}")))?;

    if result.should_notify {
        let outcome = ctx
            .dispatcher
            .dispatch(&NotificationPayload {
                event_id: event_id.to_string(),
                session_id: session_id.to_string(),
                device_id: field(payload, "device_id").map(String::from),
                should_notify: true,
                summary: result.summary.clone(),
                label: Some(result.label.clone()),
                confidence: Some(result.confidence),
                alert_reason: Some(result.alert_reason.clone()),
                matched_rules: result.matched_rules.clone(),
                detected_entities: result.detected_entities.clone(),
                detected_actions: result.detected_actions.clone(),
                inference_provider: Some(result.provider.clone()),
                inference_model: result.model.clone(),
                clip_uri: field(payload, "clip_uri").map(String::from),
                clip_mime: clip_mime.clone(),
                clip_data: Some(clip_data),
            })
            .await;
        info!(
            event_id,
            telegram_sent = outcome.telegram_sent,
            webhook_sent = outcome.webhook_sent,
            "alert dispatched"
        );
    }

    Ok(result)
}
