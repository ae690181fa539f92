//! Bot API calls over reqwest.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::TelegramError;
use crate::types::{SendMessageRequest, TelegramResponse, Update};

/// Client for one bot token against one API base.
///
/// The base is configurable (`https://api.telegram.org` in production) so
/// integration tests can stand in a local fake.
pub struct TelegramClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
    timeout: Duration,
}

impl TelegramClient {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            timeout,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    /// Send a plain text message with link previews disabled.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), TelegramError> {
        let request = SendMessageRequest {
            chat_id,
            text,
            disable_web_page_preview: Some(true),
        };
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TelegramError::Api { status, body });
        }
        debug!(chat_id, "telegram message sent");
        Ok(())
    }

    /// Upload a clip with `sendVideo` (multipart), caption included.
    pub async fn send_video(
        &self,
        chat_id: &str,
        caption: &str,
        video: Vec<u8>,
        filename: &str,
        mime: &str,
    ) -> Result<(), TelegramError> {
        let part = reqwest::multipart::Part::bytes(video)
            .file_name(filename.to_string())
            .mime_str(mime)
            .map_err(|e| TelegramError::Parse(format!("invalid video mime: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("supports_streaming", "true")
            .part("video", part);

        let response = self
            .client
            .post(self.method_url("sendVideo"))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TelegramError::Api { status, body });
        }
        debug!(chat_id, "telegram video sent");
        Ok(())
    }

    /// Pull pending updates. A 409 maps to [`TelegramError::WebhookActive`]
    /// so callers can delete the webhook and retry once.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, TelegramError> {
        let mut params: Vec<(&str, String)> =
            vec![("timeout", "0".to_string()), ("limit", "100".to_string())];
        if let Some(offset) = offset {
            params.push(("offset", offset.to_string()));
        }
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .timeout(self.timeout)
            .query(&params)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 409 {
            return Err(TelegramError::WebhookActive);
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelegramError::Api { status, body });
        }
        let parsed: TelegramResponse<Vec<Update>> = response
            .json()
            .await
            .map_err(|e| TelegramError::Parse(e.to_string()))?;
        Ok(parsed.result.unwrap_or_default())
    }

    /// Remove a registered webhook so long polling works again.
    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        let response = self
            .client
            .post(self.method_url("deleteWebhook"))
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TelegramError::Api { status, body });
        }
        info!("telegram webhook deleted");
        Ok(())
    }

    /// Probe whether a chat is reachable. Returns the HTTP status and the
    /// decoded body (empty object when the body is not JSON).
    pub async fn get_chat(&self, chat_id: &str) -> Result<(u16, Value), TelegramError> {
        let response = self
            .client
            .get(self.method_url("getChat"))
            .timeout(self.timeout)
            .query(&[("chat_id", chat_id)])
            .send()
            .await?;
        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap_or(Value::Object(Default::default()));
        Ok((status, body))
    }
}
