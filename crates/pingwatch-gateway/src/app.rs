use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use tracing::info;
use uuid::Uuid;

use pingwatch_blob::BlobGateway;
use pingwatch_core::PingWatchConfig;
use pingwatch_queue::JobQueue;
use pingwatch_store::Store;
use pingwatch_telegram::TelegramClient;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: PingWatchConfig,
    pub store: Store,
    pub queue: JobQueue,
    pub blob: BlobGateway,
    /// Present when a bot token is configured.
    pub telegram: Option<TelegramClient>,
    /// Process-local getUpdates offset for the linking fallback pull.
    /// Losing it on restart costs at most duplicate (idempotent) link
    /// attempts.
    pub poll_offset: AtomicI64,
}

impl AppState {
    pub fn new(config: PingWatchConfig, store: Store, queue: JobQueue, blob: BlobGateway) -> Self {
        let timeout = Duration::from_secs(config.notify.timeout_seconds.max(1));
        let telegram = config
            .telegram
            .token()
            .map(|token| TelegramClient::new(config.telegram.api_base.clone(), token, timeout));
        Self {
            config,
            store,
            queue,
            blob,
            telegram,
            poll_offset: AtomicI64::new(0),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = crate::cors::build_cors_layer(&state.config.gateway.cors_extra_origins);
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/auth/dev/login", post(crate::http::auth_routes::dev_login))
        .route("/devices/register", post(crate::http::devices::register_device))
        .route("/sessions/start", post(crate::http::sessions::start_session))
        .route("/sessions/stop", post(crate::http::sessions::stop_session))
        .route(
            "/sessions/force-stop",
            post(crate::http::sessions::force_stop_session),
        )
        .route("/sessions", get(crate::http::sessions::list_sessions))
        .route(
            "/events/upload/initiate",
            post(crate::http::events::initiate_upload),
        )
        .route("/events/{event_id}/upload", put(crate::http::events::relay_upload))
        .route(
            "/events/{event_id}/upload/finalize",
            post(crate::http::events::finalize_upload),
        )
        .route(
            "/events/{event_id}/summary",
            post(crate::http::events::post_summary).get(crate::http::events::get_summary),
        )
        .route("/events/{event_id}", get(crate::http::events::get_event))
        .route("/events", get(crate::http::events::list_events))
        .route(
            "/notifications/telegram/readiness",
            get(crate::http::notifications::telegram_readiness),
        )
        .route(
            "/notifications/telegram/link/start",
            post(crate::http::notifications::telegram_link_start),
        )
        .route(
            "/notifications/telegram/link/status",
            get(crate::http::notifications::telegram_link_status),
        )
        .route(
            "/notifications/telegram/webhook",
            post(crate::http::notifications::telegram_webhook),
        )
        .route(
            "/notifications/telegram/target",
            get(crate::http::notifications::telegram_target),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::auth_middleware,
        ))
        .layer(middleware::from_fn::<_, (Request,)>(request_logger))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Log one line per request with correlation ids, and echo `x-request-id`.
async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let (request_id, device_id, session_id, event_id) = {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let request_id = header("x-request-id").unwrap_or_else(|| Uuid::new_v4().to_string());
        let device_id = header("x-device-id");
        let session_id = header("x-session-id");
        let event_id = header("x-event-id");
        (request_id, device_id, session_id, event_id)
    };

    let mut response = next.run(request).await;

    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status_code = response.status().as_u16(),
        duration_ms = format!("{duration_ms:.2}"),
        device_id = device_id.as_deref().unwrap_or(""),
        session_id = session_id.as_deref().unwrap_or(""),
        event_id = event_id.as_deref().unwrap_or(""),
        "request"
    );
    response
}
