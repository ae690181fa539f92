//! End-to-end API tests driven through the router with `oneshot`.

use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use tower::ServiceExt;

use pingwatch_blob::BlobGateway;
use pingwatch_core::PingWatchConfig;
use pingwatch_gateway::{build_router, AppState};
use pingwatch_queue::JobQueue;
use pingwatch_store::Store;

struct TestApp {
    state: Arc<AppState>,
    router: Router,
    _upload_dir: tempfile::TempDir,
}

fn test_app(configure: impl FnOnce(&mut PingWatchConfig)) -> TestApp {
    let upload_dir = tempfile::tempdir().expect("tempdir");
    let mut config = PingWatchConfig::default();
    config.gateway.public_base_url = "http://test".to_string();
    config.blob.local_upload_dir = upload_dir.path().to_string_lossy().into_owned();
    configure(&mut config);

    let store = Store::new(Connection::open_in_memory().expect("open")).expect("store");
    let queue = JobQueue::new(
        Connection::open_in_memory().expect("open"),
        config.queue.name.clone(),
    )
    .expect("queue");
    let blob = BlobGateway::new(&config.blob);
    let state = Arc::new(AppState::new(config, store, queue, blob));
    TestApp {
        router: build_router(state.clone()),
        state,
        _upload_dir: upload_dir,
    }
}

async fn request(
    app: &TestApp,
    method: &str,
    uri: &str,
    body: Option<Value>,
    bearer: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn start_session(app: &TestApp, device_id: &str, prompt: Option<&str>) -> String {
    let (status, _) = request(
        app,
        "POST",
        "/devices/register",
        Some(json!({"device_id": device_id})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, session) = request(
        app,
        "POST",
        "/sessions/start",
        Some(json!({"device_id": device_id, "analysis_prompt": prompt})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    session["session_id"].as_str().unwrap().to_string()
}

async fn initiate(app: &TestApp, session_id: &str, device_id: &str, event_id: &str) -> Value {
    let (status, body) = request(
        app,
        "POST",
        "/events/upload/initiate",
        Some(json!({
            "event_id": event_id,
            "session_id": session_id,
            "device_id": device_id,
            "trigger_type": "motion",
            "duration_seconds": 1.0,
            "clip_mime": "video/webm",
            "clip_size_bytes": 3,
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}

#[tokio::test]
async fn health_is_public() {
    let app = test_app(|_| {});
    let (status, body) = request(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn relay_upload_roundtrip() {
    let app = test_app(|_| {});
    let session_id = start_session(&app, "dev_1", None).await;

    let body = initiate(&app, &session_id, "dev_1", "clip-local").await;
    assert_eq!(body["event"]["event_id"], "clip-local");
    assert_eq!(
        body["upload_url"],
        "http://test/events/clip-local/upload"
    );
    assert!(body["expires_at"].is_string());

    // PUT the bytes through the relay endpoint.
    let put = Request::builder()
        .method("PUT")
        .uri("/events/clip-local/upload")
        .header("content-type", "video/webm")
        .body(Body::from("abc"))
        .unwrap();
    let response = app.router.clone().oneshot(put).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let etag = response
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .expect("etag header")
        .to_string();
    assert_eq!(etag, "\"900150983cd24fb0d6963f7d28e17f72\"");

    let (status, event) = request(
        &app,
        "POST",
        "/events/clip-local/upload/finalize",
        Some(json!({"etag": etag})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(event["clip_uploaded_at"].is_string());
    assert_eq!(event["clip_etag"], etag.as_str());
    assert_eq!(event["clip_container"], "local");
    assert!(event["clip_uri"]
        .as_str()
        .unwrap()
        .starts_with("local://sessions/"));

    // Finalize enqueued exactly one job with the session stamped in.
    let pending = app.state.queue.iterate_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload["event_id"], "clip-local");
    assert_eq!(pending[0].payload["session_id"], session_id.as_str());

    // Finalize again: uploaded stamp unchanged, best-effort enqueue may
    // add another job but the row is not duplicated.
    let (status, second) = request(
        &app,
        "POST",
        "/events/clip-local/upload/finalize",
        Some(json!({})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["clip_uploaded_at"], event["clip_uploaded_at"]);
}

#[tokio::test]
async fn initiate_is_idempotent_on_event_id() {
    let app = test_app(|_| {});
    let session_id = start_session(&app, "dev_1", None).await;

    let first = initiate(&app, &session_id, "dev_1", "clip-123").await;
    let second = initiate(&app, &session_id, "dev_1", "clip-123").await;
    assert_eq!(
        first["event"]["created_at"],
        second["event"]["created_at"]
    );

    let (_, events) = request(
        &app,
        "GET",
        &format!("/events?session_id={session_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(events.as_array().unwrap().len(), 1);

    // Same event id under another session conflicts.
    let other = start_session(&app, "dev_1", None).await;
    let (status, _) = request(
        &app,
        "POST",
        "/events/upload/initiate",
        Some(json!({
            "event_id": "clip-123",
            "session_id": other,
            "device_id": "dev_1",
            "trigger_type": "motion",
            "duration_seconds": 1.0,
            "clip_mime": "video/webm",
            "clip_size_bytes": 3,
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn traversal_blob_names_are_rejected() {
    // Blob names are server-minted, so a traversal can only appear through
    // a corrupted row; the write path must still refuse it before any
    // bytes land.
    let app = test_app(|_| {});
    let err = app
        .state
        .blob
        .store_relay_upload("../escape", b"abc")
        .unwrap_err();
    assert!(matches!(err, pingwatch_blob::BlobError::PathTraversal(_)));

    let err = app
        .state
        .blob
        .store_relay_upload("a/../../escape", b"abc")
        .unwrap_err();
    assert!(matches!(err, pingwatch_blob::BlobError::PathTraversal(_)));
}

#[tokio::test]
async fn force_stop_purges_processing_and_cancels_jobs() {
    let app = test_app(|_| {});
    let session_id = start_session(&app, "dev_1", None).await;

    for event_id in ["clip-a", "clip-b"] {
        initiate(&app, &session_id, "dev_1", event_id).await;
        let (status, _) = request(
            &app,
            "POST",
            &format!("/events/{event_id}/upload/finalize"),
            Some(json!({})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(app.state.queue.iterate_pending().unwrap().len(), 2);

    let (status, body) = request(
        &app,
        "POST",
        "/sessions/force-stop",
        Some(json!({"session_id": session_id})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");
    assert_eq!(body["dropped_processing_events"], 2);
    assert_eq!(body["dropped_queued_jobs"], 2);

    let (_, events) = request(
        &app,
        "GET",
        &format!("/events?session_id={session_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(events, json!([]));
    assert!(app.state.queue.iterate_pending().unwrap().is_empty());
}

#[tokio::test]
async fn summary_writeback_is_terminal_and_readable() {
    let app = test_app(|_| {});
    let session_id = start_session(&app, "dev_1", None).await;
    initiate(&app, &session_id, "dev_1", "clip-123").await;

    let (status, event) = request(
        &app,
        "POST",
        "/events/clip-123/summary",
        Some(json!({
            "summary": "A person walks up to the porch",
            "label": "person",
            "confidence": 0.92,
            "should_notify": true,
            "alert_reason": "Matched configured alert criteria",
            "matched_rules": ["person near door"],
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["status"], "done");

    let (status, summary) = request(&app, "GET", "/events/clip-123/summary", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["label"], "person");
    assert_eq!(summary["should_notify"], true);
    assert_eq!(summary["matched_rules"], json!(["person near door"]));

    let (status, _) = request(
        &app,
        "POST",
        "/events/ghost/summary",
        Some(json!({"summary": "x"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn auth_required_gates_writes_and_scopes_reads() {
    let app = test_app(|config| {
        config.auth.required = true;
    });

    // Write without a token: 401. Dev-login stays public.
    let (status, _) = request(
        &app,
        "POST",
        "/devices/register",
        Some(json!({"device_id": "dev-1"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, login_a) = request(
        &app,
        "POST",
        "/auth/dev/login",
        Some(json!({"email": "Alice@Example.com"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login_a["token_type"], "bearer");
    let token_a = login_a["access_token"].as_str().unwrap().to_string();

    let (status, login_b) = request(
        &app,
        "POST",
        "/auth/dev/login",
        Some(json!({"email": "bob@example.com"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token_b = login_b["access_token"].as_str().unwrap().to_string();
    assert_ne!(token_a, token_b);

    // Same email logs into the same account.
    let (_, again) = request(
        &app,
        "POST",
        "/auth/dev/login",
        Some(json!({"email": "alice@example.com"})),
        None,
    )
    .await;
    assert_eq!(again["user_id"], login_a["user_id"]);

    // Alice claims dev-1 and starts a session.
    let (status, _) = request(
        &app,
        "POST",
        "/devices/register",
        Some(json!({"device_id": "dev-1"})),
        Some(&token_a),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, session) = request(
        &app,
        "POST",
        "/sessions/start",
        Some(json!({"device_id": "dev-1"})),
        Some(&token_a),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let session_id = session["session_id"].as_str().unwrap().to_string();

    // Bob cannot see or touch any of it — always 404, never 403.
    let (status, _) = request(
        &app,
        "POST",
        "/devices/register",
        Some(json!({"device_id": "dev-1"})),
        Some(&token_b),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(
        &app,
        "POST",
        "/sessions/stop",
        Some(json!({"session_id": session_id})),
        Some(&token_b),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(
        &app,
        "POST",
        "/events/upload/initiate",
        Some(json!({
            "session_id": session_id,
            "device_id": "dev-1",
            "trigger_type": "motion",
            "duration_seconds": 1.0,
            "clip_mime": "video/webm",
            "clip_size_bytes": 3,
        })),
        Some(&token_b),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(
        &app,
        "GET",
        &format!("/events?session_id={session_id}"),
        None,
        Some(&token_b),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Reads without a token are rejected when auth is required.
    let (status, _) = request(&app, "GET", "/sessions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A bad token is rejected outright.
    let (status, _) = request(&app, "GET", "/sessions", None, Some("bogus")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Alice still sees her session.
    let (status, sessions) = request(&app, "GET", "/sessions", None, Some(&token_a)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sessions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn dev_login_can_be_disabled() {
    let app = test_app(|config| {
        config.auth.dev_login_enabled = false;
    });
    let (status, _) = request(
        &app,
        "POST",
        "/auth/dev/login",
        Some(json!({"email": "x@example.com"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// --- telegram linking ----------------------------------------------------

/// Minimal fake Bot API: records every call, confirms getChat, returns no
/// pending updates.
async fn fake_telegram() -> (String, Arc<Mutex<Vec<(String, Value)>>>) {
    use axum::extract::Path;
    use axum::routing::any;

    let calls: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();
    // The Bot API shape is /bot<token>/<method>; capture the first segment
    // whole since it embeds the token.
    let router = Router::new().route(
        "/{bot}/{method}",
        any(
            move |Path((_bot, method)): Path<(String, String)>, body: String| {
                let recorded = recorded.clone();
                async move {
                    let parsed: Value =
                        serde_json::from_str(&body).unwrap_or(Value::Null);
                    recorded.lock().unwrap().push((method.clone(), parsed));
                    let result = match method.as_str() {
                        "getChat" => json!({"ok": true, "result": {"id": 987654321}}),
                        "getUpdates" => json!({"ok": true, "result": []}),
                        _ => json!({"ok": true, "result": {}}),
                    };
                    axum::Json(result)
                }
            },
        ),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), calls)
}

#[tokio::test]
async fn telegram_link_via_webhook() {
    let (api_base, calls) = fake_telegram().await;
    let app = test_app(|config| {
        config.telegram.bot_token = Some("test-token".into());
        config.telegram.api_base = api_base;
        config.telegram.onboarding_url = Some("https://t.me/pingbot".into());
    });

    let (status, _) = request(
        &app,
        "POST",
        "/devices/register",
        Some(json!({"device_id": "dev-1"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, link) = request(
        &app,
        "POST",
        "/notifications/telegram/link/start",
        Some(json!({"device_id": "dev-1"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(link["status"], "pending");
    let attempt_id = link["attempt_id"].as_str().unwrap().to_string();
    let connect_url = link["connect_url"].as_str().unwrap();
    let token = connect_url
        .split("start=")
        .nth(1)
        .expect("connect url carries the token")
        .to_string();
    assert!(!token.is_empty());

    // The user taps the link; Telegram delivers /start via the webhook.
    let (status, body) = request(
        &app,
        "POST",
        "/notifications/telegram/webhook",
        Some(json!({
            "message": {
                "text": format!("/start {token}"),
                "chat": {"id": 987654321},
                "from": {"username": "alice"},
            }
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["ok"], true);

    let (status, state_body) = request(
        &app,
        "GET",
        &format!("/notifications/telegram/link/status?device_id=dev-1&attempt_id={attempt_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state_body["status"], "linked");
    assert_eq!(state_body["ready"], true);
    assert_eq!(state_body["linked"], true);
    assert_eq!(state_body["chat_id"], "987654321");

    let (status, readiness) = request(
        &app,
        "GET",
        "/notifications/telegram/readiness?device_id=dev-1",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["status"], "ready");
    assert_eq!(readiness["ready"], true);

    let (status, target) = request(
        &app,
        "GET",
        "/notifications/telegram/target?device_id=dev-1",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(target["linked"], true);
    assert_eq!(target["chat_id"], "987654321");

    // Exactly one confirmation message went out to that chat.
    let sends: Vec<Value> = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(method, _)| method == "sendMessage")
        .map(|(_, body)| body.clone())
        .collect();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0]["chat_id"], "987654321");
}

#[tokio::test]
async fn webhook_replay_is_idempotent() {
    let (api_base, _calls) = fake_telegram().await;
    let app = test_app(|config| {
        config.telegram.bot_token = Some("test-token".into());
        config.telegram.api_base = api_base;
        config.telegram.onboarding_url = Some("https://t.me/pingbot".into());
    });
    request(
        &app,
        "POST",
        "/devices/register",
        Some(json!({"device_id": "dev-1"})),
        None,
    )
    .await;
    let (_, link) = request(
        &app,
        "POST",
        "/notifications/telegram/link/start",
        Some(json!({"device_id": "dev-1"})),
        None,
    )
    .await;
    let token = link["connect_url"]
        .as_str()
        .unwrap()
        .split("start=")
        .nth(1)
        .unwrap()
        .to_string();
    let update = json!({
        "update_id": 424242,
        "message": {
            "text": format!("/start {token}"),
            "chat": {"id": 987654321},
            "from": {"username": "alice"},
        }
    });

    for _ in 0..2 {
        let (status, _) = request(
            &app,
            "POST",
            "/notifications/telegram/webhook",
            Some(update.clone()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let attempt = app
        .state
        .store
        .get_telegram_link_attempt(link["attempt_id"].as_str().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(attempt.status, pingwatch_store::LinkStatus::Linked);
    // Only one endpoint exists for the chat.
    let (chat, _) = app.state.store.device_telegram_chat("dev-1").unwrap().unwrap();
    assert_eq!(chat, "987654321");
}

#[tokio::test]
async fn webhook_secret_and_body_validation() {
    let (api_base, _calls) = fake_telegram().await;
    let app = test_app(|config| {
        config.telegram.bot_token = Some("test-token".into());
        config.telegram.api_base = api_base;
        config.telegram.webhook_secret = Some("shh".into());
    });

    // Missing secret header.
    let (status, _) = request(
        &app,
        "POST",
        "/notifications/telegram/webhook",
        Some(json!({"message": {"text": "/start x", "chat": {"id": 1}}})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Correct secret, malformed body.
    let bad = Request::builder()
        .method("POST")
        .uri("/notifications/telegram/webhook")
        .header("content-type", "application/json")
        .header("x-telegram-bot-api-secret-token", "shh")
        .body(Body::from("[1, 2, 3]"))
        .unwrap();
    let response = app.router.clone().oneshot(bad).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Correct secret, unknown token: accepted without state change.
    let ok = Request::builder()
        .method("POST")
        .uri("/notifications/telegram/webhook")
        .header("content-type", "application/json")
        .header("x-telegram-bot-api-secret-token", "shh")
        .body(Body::from(
            json!({"message": {"text": "/start nope", "chat": {"id": 1}}}).to_string(),
        ))
        .unwrap();
    let response = app.router.clone().oneshot(ok).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn link_status_applies_lazy_expiry() {
    let (api_base, _calls) = fake_telegram().await;
    let app = test_app(|config| {
        config.telegram.bot_token = Some("test-token".into());
        config.telegram.api_base = api_base;
    });
    request(
        &app,
        "POST",
        "/devices/register",
        Some(json!({"device_id": "dev-1"})),
        None,
    )
    .await;

    // Plant an attempt whose deadline has already passed.
    let attempt = app
        .state
        .store
        .create_telegram_link_attempt(
            "dev-1",
            None,
            "expired-hash",
            chrono::Utc::now() - chrono::Duration::seconds(5),
        )
        .unwrap();

    let (status, body) = request(
        &app,
        "GET",
        &format!(
            "/notifications/telegram/link/status?device_id=dev-1&attempt_id={}",
            attempt.attempt_id
        ),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "expired");
    assert_eq!(body["linked"], false);
}

#[tokio::test]
async fn readiness_reports_not_configured_without_token() {
    let app = test_app(|_| {});
    let (status, body) = request(
        &app,
        "GET",
        "/notifications/telegram/readiness?device_id=dev-1",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
    assert_eq!(body["status"], "not_configured");

    let (status, target) = request(
        &app,
        "GET",
        "/notifications/telegram/target?device_id=dev-1",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(target["enabled"], false);
    assert_eq!(target["linked"], false);
}
