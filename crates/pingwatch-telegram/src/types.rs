//! Telegram Bot API request/response types — the subset Ping Watch uses.

use serde::{Deserialize, Serialize};

/// Standard Bot API envelope.
#[derive(Debug, Deserialize)]
pub struct TelegramResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

/// One update from `getUpdates` or the webhook body.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    /// Absent on direct webhook test posts; getUpdates always sets it.
    #[serde(default)]
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
}

impl Update {
    /// The message payload, preferring the original over an edit.
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref().or(self.edited_message.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: Option<i64>,
    pub text: Option<String>,
    pub chat: Option<Chat>,
    pub from: Option<SenderUser>,
}

impl Message {
    /// Username to record on a link: the sender's, falling back to the
    /// chat's.
    pub fn username(&self) -> Option<&str> {
        self.from
            .as_ref()
            .and_then(|u| u.username.as_deref())
            .or_else(|| self.chat.as_ref().and_then(|c| c.username.as_deref()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SenderUser {
    pub username: Option<String>,
}

/// `sendMessage` request body.
#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_web_page_preview: Option<bool>,
}
