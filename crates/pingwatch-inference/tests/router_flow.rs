//! Router behavior against a fake chat-completions endpoint.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use axum::{routing::post, Json, Router};
use serde_json::{json, Value};

use pingwatch_core::config::InferenceConfig;
use pingwatch_inference::InferenceRouter;

struct FakeProvider {
    base_url: String,
    text_calls: Arc<AtomicUsize>,
    multimodal_calls: Arc<AtomicUsize>,
}

/// Chat-completions fake: text-only requests get a rule set back,
/// multimodal requests get a verdict. Counts both kinds.
async fn fake_provider() -> FakeProvider {
    let text_calls = Arc::new(AtomicUsize::new(0));
    let multimodal_calls = Arc::new(AtomicUsize::new(0));
    let text = text_calls.clone();
    let multi = multimodal_calls.clone();

    let router = Router::new().route(
        "/v1/chat/completions",
        post(move |Json(body): Json<Value>| {
            let text = text.clone();
            let multi = multi.clone();
            async move {
                let user_content = body["messages"]
                    .as_array()
                    .and_then(|msgs| msgs.iter().find(|m| m["role"] == "user"))
                    .map(|m| m["content"].clone())
                    .unwrap_or(Value::Null);
                let reply = if user_content.is_string() {
                    text.fetch_add(1, Ordering::SeqCst);
                    json!({
                        "target_entities": ["person"],
                        "target_actions": ["approaching"],
                        "locations": [],
                        "time_constraints": [],
                        "ignore_conditions": [],
                        "sensitivity": "high"
                    })
                    .to_string()
                } else {
                    multi.fetch_add(1, Ordering::SeqCst);
                    json!({
                        "label": "person",
                        "summary": "A person approaches the door",
                        "confidence": 0.9,
                        "notify": true,
                        "reason": "person detected",
                        "matched_rules": ["person"]
                    })
                    .to_string()
                };
                Json(json!({
                    "model": "fake-vlm",
                    "choices": [{"message": {"content": reply}, "finish_reason": "stop"}],
                }))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    FakeProvider {
        base_url: format!("http://{addr}"),
        text_calls,
        multimodal_calls,
    }
}

#[tokio::test]
async fn identical_prompts_normalise_once() {
    let provider = fake_provider().await;
    let mut settings = InferenceConfig::default();
    settings.primary_api_key = Some("test-key".into());
    settings.primary_base_url = provider.base_url.clone();
    settings.timeout_seconds = 5;
    let router = InferenceRouter::from_settings(&settings);

    let prompt = Some("alert me when a person approaches");
    let first = router
        .analyze_clip(b"clip-bytes", "video/webm", prompt, &[])
        .await
        .expect("first clip");
    assert_eq!(first.label, "person");
    assert!(first.should_notify);
    assert_eq!(first.provider, "primary");
    assert_eq!(first.model.as_deref(), Some(settings.primary_model.as_str()));

    let second = router
        .analyze_clip(b"other-bytes", "video/webm", prompt, &[])
        .await
        .expect("second clip");
    assert_eq!(second.label, "person");

    // One normalisation + two clip analyses = three provider hits total.
    assert_eq!(provider.text_calls.load(Ordering::SeqCst), 1);
    assert_eq!(provider.multimodal_calls.load(Ordering::SeqCst), 2);
    assert_eq!(router.rule_cache().len(), 1);
}

#[tokio::test]
async fn primary_failure_falls_back_to_frames() {
    // Primary points at a closed port; fallback is the fake provider.
    let provider = fake_provider().await;
    let mut settings = InferenceConfig::default();
    settings.primary_api_key = Some("dead-key".into());
    settings.primary_base_url = "http://127.0.0.1:9".into();
    settings.fallback_api_key = Some("live-key".into());
    settings.fallback_base_url = provider.base_url.clone();
    settings.timeout_seconds = 5;
    let router = InferenceRouter::from_settings(&settings);

    let frames = vec!["data:image/jpeg;base64,YWJj".to_string()];
    let result = router
        .analyze_clip(b"clip-bytes", "video/webm", None, &frames)
        .await
        .expect("fallback succeeds");
    assert_eq!(result.provider, "fallback");
    assert_eq!(result.label, "person");

    // Without frames the primary error surfaces instead.
    let err = router
        .analyze_clip(b"clip-bytes", "video/webm", None, &[])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no frames"));
}
