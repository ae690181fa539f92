//! Chat-completions client used for both inference providers.
//!
//! Both the video-mode primary and the image-mode fallback speak the same
//! OpenAI-compatible wire format; only base URL, model, and the optional
//! system prompt differ.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::parse::extract_response_text;

/// A single OpenAI-compatible chat-completions endpoint.
pub struct ChatProvider {
    client: reqwest::Client,
    provider_name: String,
    api_key: String,
    base_url: String,
    /// Path appended to base_url. Default: "/v1/chat/completions"
    chat_path: String,
    model: String,
    /// Optional fixed system message prepended to every request.
    system_prompt: Option<String>,
}

impl ChatProvider {
    /// `base_url` should NOT include a trailing slash.
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider_name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            chat_path: "/v1/chat/completions".to_string(),
            model: model.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.provider_name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one user message (plain text or a multimodal content array) and
    /// return the assistant's text.
    pub async fn complete(
        &self,
        content: serde_json::Value,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": content}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": 0.2,
            "top_p": 1.0,
            "stream": false,
        });
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(provider = %self.provider_name, model = %self.model, "sending chat completion");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 401 || status == 403 {
            // Deliberately short: credentials problems are logged without a
            // body dump and handled specially upstream.
            warn!(provider = %self.provider_name, status, "inference authentication failed");
            return Err(ProviderError::Auth { status });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(provider = %self.provider_name, status, body = %text, "inference API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let choice = api_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("no choices in API response".to_string()))?;
        Ok(extract_response_text(&choice.message.content))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// 401/403 from the provider — bad or missing credentials.
    #[error("authentication failed ({status}); check the provider API key")]
    Auth { status: u16 },

    #[error("parse error: {0}")]
    Parse(String),
}

impl ProviderError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::Auth { .. })
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: serde_json::Value,
}
