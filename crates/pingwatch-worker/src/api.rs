//! Client for the control-plane API the worker writes verdicts through.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

const WRITEBACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
}

/// Terminal analysis fields POSTed to `/events/{id}/summary`.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SummaryBody {
    pub summary: String,
    pub label: Option<String>,
    pub confidence: Option<f64>,
    pub inference_provider: Option<String>,
    pub inference_model: Option<String>,
    pub should_notify: Option<bool>,
    pub alert_reason: Option<String>,
    pub matched_rules: Vec<String>,
    pub detected_entities: Vec<String>,
    pub detected_actions: Vec<String>,
}

pub struct ControlApi {
    client: reqwest::Client,
    base_url: String,
}

impl ControlApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The single atomic commit point of a job: flips the event to `done`.
    pub async fn post_event_summary(
        &self,
        event_id: &str,
        body: &SummaryBody,
    ) -> Result<Value, ApiClientError> {
        let url = format!("{}/events/{event_id}/summary", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(WRITEBACK_TIMEOUT)
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiClientError::Api { status, body: text });
        }
        info!(event_id, "event summary written back");
        Ok(response.json().await.unwrap_or(Value::Null))
    }
}
