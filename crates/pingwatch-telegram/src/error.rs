use thiserror::Error;

/// Errors from the Telegram Bot API client.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Transport-level failure.
    #[error("telegram http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The Bot API answered with a non-success status.
    #[error("telegram API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// 409 on getUpdates — a webhook is registered and long polling is
    /// refused until it is deleted.
    #[error("telegram getUpdates conflict: webhook is active")]
    WebhookActive,

    /// The response body was not the expected JSON shape.
    #[error("telegram response parse error: {0}")]
    Parse(String),
}
