use serde::Serialize;

/// Everything the dispatcher needs to deliver one alert.
#[derive(Debug, Clone, Default)]
pub struct NotificationPayload {
    pub event_id: String,
    pub session_id: String,
    pub device_id: Option<String>,
    pub should_notify: bool,
    pub summary: String,
    pub label: Option<String>,
    pub confidence: Option<f64>,
    pub alert_reason: Option<String>,
    pub matched_rules: Vec<String>,
    pub detected_entities: Vec<String>,
    pub detected_actions: Vec<String>,
    pub inference_provider: Option<String>,
    pub inference_model: Option<String>,
    pub clip_uri: Option<String>,
    pub clip_mime: String,
    /// Raw clip bytes, present when the worker downloaded them; enables
    /// the video send path.
    pub clip_data: Option<Vec<u8>>,
}

/// JSON body POSTed to the outbound webhook.
#[derive(Debug, Serialize)]
pub struct WebhookBody<'a> {
    pub event_id: &'a str,
    pub session_id: &'a str,
    pub should_notify: bool,
    pub label: Option<&'a str>,
    pub confidence: Option<f64>,
    pub summary: &'a str,
    pub alert_reason: Option<&'a str>,
    pub matched_rules: &'a [String],
    pub detected_entities: &'a [String],
    pub detected_actions: &'a [String],
    pub inference_provider: Option<&'a str>,
    pub inference_model: Option<&'a str>,
    pub clip_uri: Option<&'a str>,
    pub clip_mime: &'a str,
}

impl NotificationPayload {
    pub(crate) fn webhook_body<'a>(&'a self, clip_mime: &'a str) -> WebhookBody<'a> {
        WebhookBody {
            event_id: &self.event_id,
            session_id: &self.session_id,
            should_notify: self.should_notify,
            label: self.label.as_deref(),
            confidence: self.confidence,
            summary: &self.summary,
            alert_reason: self.alert_reason.as_deref(),
            matched_rules: &self.matched_rules,
            detected_entities: &self.detected_entities,
            detected_actions: &self.detected_actions,
            inference_provider: self.inference_provider.as_deref(),
            inference_model: self.inference_model.as_deref(),
            clip_uri: self.clip_uri.as_deref(),
            clip_mime,
        }
    }
}
