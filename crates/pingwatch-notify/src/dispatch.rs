//! Per-channel dispatch with independent failure handling.

use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use pingwatch_core::config::{NotifyConfig, TelegramConfig};
use pingwatch_telegram::TelegramClient;

use crate::payload::NotificationPayload;

/// Which channels actually delivered. Informational only — a false never
/// fails the enclosing job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub telegram_sent: bool,
    pub webhook_sent: bool,
}

/// Stateless dispatcher invoked synchronously by the worker after a
/// notify-worthy verdict.
pub struct NotificationDispatcher {
    client: reqwest::Client,
    api_base_url: String,
    telegram: Option<TelegramClient>,
    send_video: bool,
    webhook_url: Option<String>,
    webhook_secret: Option<String>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(api_base_url: &str, telegram: &TelegramConfig, notify: &NotifyConfig) -> Self {
        let timeout = Duration::from_secs(notify.timeout_seconds.max(1));
        let telegram_client = telegram
            .token()
            .map(|token| TelegramClient::new(telegram.api_base.clone(), token, timeout));
        Self {
            client: reqwest::Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            telegram: telegram_client,
            send_video: telegram.send_video,
            webhook_url: notify
                .webhook_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from),
            webhook_secret: notify
                .webhook_secret
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            timeout,
        }
    }

    /// Deliver one alert on every configured channel. Channel errors are
    /// swallowed after logging; the outcome records what went through.
    pub async fn dispatch(&self, payload: &NotificationPayload) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        info!(
            event_id = %payload.event_id,
            should_notify = payload.should_notify,
            telegram_configured = self.telegram.is_some(),
            webhook_configured = self.webhook_url.is_some(),
            "notification dispatch requested"
        );

        if !payload.should_notify {
            return outcome;
        }
        if self.telegram.is_none() && self.webhook_url.is_none() {
            warn!(event_id = %payload.event_id, "no outbound notification channels configured");
            return outcome;
        }

        match self.send_telegram(payload).await {
            Ok(sent) => outcome.telegram_sent = sent,
            Err(e) => warn!(event_id = %payload.event_id, error = %e, "telegram notification failed"),
        }
        match self.send_webhook(payload).await {
            Ok(sent) => outcome.webhook_sent = sent,
            Err(e) => warn!(event_id = %payload.event_id, error = %e, "webhook notification failed"),
        }

        info!(
            event_id = %payload.event_id,
            telegram_sent = outcome.telegram_sent,
            webhook_sent = outcome.webhook_sent,
            "notification dispatch finished"
        );
        outcome
    }

    /// Look the device's chat up through the control API — never directly
    /// in the database, so the dispatcher works from any process.
    async fn resolve_chat_id(&self, payload: &NotificationPayload) -> Option<String> {
        let device_id = payload.device_id.as_deref()?;
        let url = format!("{}/notifications/telegram/target", self.api_base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .query(&[("device_id", device_id)])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let body: Value = resp.json().await.ok()?;
                let chat_id = body
                    .get("chat_id")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from);
                if chat_id.is_some() {
                    info!(event_id = %payload.event_id, device_id, "telegram chat resolved");
                }
                chat_id
            }
            Ok(resp) => {
                warn!(
                    event_id = %payload.event_id,
                    device_id,
                    status = resp.status().as_u16(),
                    "telegram target lookup failed"
                );
                None
            }
            Err(e) => {
                warn!(event_id = %payload.event_id, device_id, error = %e, "telegram target lookup failed");
                None
            }
        }
    }

    async fn send_telegram(&self, payload: &NotificationPayload) -> Result<bool, String> {
        let Some(telegram) = &self.telegram else {
            return Ok(false);
        };
        let Some(chat_id) = self.resolve_chat_id(payload).await else {
            info!(event_id = %payload.event_id, "telegram notification skipped: no chat resolved");
            return Ok(false);
        };

        let caption = build_alert_text(payload);
        let mime = normalize_video_mime(&payload.clip_mime);

        if self.send_video {
            if let Some(clip) = &payload.clip_data {
                let filename = format!("clip-{}.webm", payload.event_id);
                telegram
                    .send_video(&chat_id, &caption, clip.clone(), &filename, &mime)
                    .await
                    .map_err(|e| e.to_string())?;
                info!(event_id = %payload.event_id, "telegram video alert sent");
                return Ok(true);
            }
        }

        telegram
            .send_message(&chat_id, &caption)
            .await
            .map_err(|e| e.to_string())?;
        info!(event_id = %payload.event_id, "telegram text alert sent");
        Ok(true)
    }

    async fn send_webhook(&self, payload: &NotificationPayload) -> Result<bool, String> {
        let Some(url) = &self.webhook_url else {
            return Ok(false);
        };
        let mime = normalize_video_mime(&payload.clip_mime);
        let mut request = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&payload.webhook_body(&mime));
        if let Some(secret) = &self.webhook_secret {
            request = request.header("X-Ping-Watch-Webhook-Secret", secret);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("webhook status {}", response.status().as_u16()));
        }
        info!(event_id = %payload.event_id, "webhook alert sent");
        Ok(true)
    }
}

fn normalize_video_mime(mime: &str) -> String {
    let base = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if base.is_empty() {
        "video/webm".to_string()
    } else {
        base
    }
}

/// Fixed caption layout for Telegram alerts.
fn build_alert_text(payload: &NotificationPayload) -> String {
    let confidence = match payload.confidence {
        Some(c) => format!("{}%", (c * 100.0).round() as i64),
        None => "n/a".to_string(),
    };
    let mut lines = vec![
        "Ping Watch alert".to_string(),
        format!("Event: {}", payload.event_id),
        format!("Label: {}", payload.label.as_deref().unwrap_or("unknown")),
        format!("Confidence: {confidence}"),
        format!("Summary: {}", payload.summary),
    ];
    if let Some(reason) = payload.alert_reason.as_deref().filter(|r| !r.is_empty()) {
        lines.push(format!("Reason: {reason}"));
    }
    if let Some(uri) = payload.clip_uri.as_deref().filter(|u| !u.is_empty()) {
        lines.push(format!("Clip: {uri}"));
    }
    lines.join("\n")
}
