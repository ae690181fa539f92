//! Telegram linking protocol: connect URLs, `/start` token handling, and
//! the long-poll fallback pull.
//!
//! Both confirmation paths (webhook push and status-poll pull) run through
//! [`handle_update`]; the only difference is whether the user gets a chat
//! confirmation, which the pull path suppresses by default so the webhook
//! stays the voice of the bot.

use std::sync::atomic::Ordering;

use chrono::Utc;
use tracing::{debug, info, warn};

use pingwatch_core::token;
use pingwatch_store::{LinkStatus, TelegramLinkAttempt};
use pingwatch_telegram::{TelegramError, Update};

use crate::app::AppState;

/// Outcome of feeding one update through the link state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update did not carry a usable `/start <token>` payload.
    Ignored,
    /// Token known but the attempt cannot link (already terminal, or just
    /// expired).
    Rejected,
    /// The attempt reached `linked` (or already was, idempotently).
    Linked { attempt_id: String, chat_id: String },
}

/// Extract the payload of a `/start <token>` command.
pub fn extract_start_payload(text: Option<&str>) -> Option<&str> {
    let mut parts = text?.trim().split_whitespace();
    let command = parts.next()?;
    if !command.starts_with("/start") {
        return None;
    }
    parts.next()
}

/// Build the deep link a user follows to confirm a device.
///
/// `{start_payload}` / `{token}` placeholders substitute the raw token;
/// otherwise `start=<token>` is appended, preserving any existing query.
pub fn build_connect_url(onboarding_url: &str, link_token: &str) -> String {
    let encoded = urlencoding::encode(link_token);
    if onboarding_url.contains("{start_payload}") {
        return onboarding_url.replace("{start_payload}", &encoded);
    }
    if onboarding_url.contains("{token}") {
        return onboarding_url.replace("{token}", &encoded);
    }
    let separator = if onboarding_url.contains('?') { '&' } else { '?' };
    format!("{onboarding_url}{separator}start={encoded}")
}

fn attempt_is_stale(attempt: &TelegramLinkAttempt) -> bool {
    attempt.status == LinkStatus::Pending && attempt.is_expired(Utc::now())
}

/// Feed one Telegram update through the link state machine.
///
/// `notify_user` controls the user-facing replies (confirmation on success,
/// polite rejection otherwise); failures to deliver those replies are
/// logged and ignored.
pub async fn handle_update(state: &AppState, update: &Update, notify_user: bool) -> UpdateOutcome {
    let Some(message) = update.message() else {
        return UpdateOutcome::Ignored;
    };
    let Some(chat) = &message.chat else {
        return UpdateOutcome::Ignored;
    };
    let chat_id = chat.id.to_string();

    let Some(raw_token) = extract_start_payload(message.text.as_deref()) else {
        return UpdateOutcome::Ignored;
    };
    let token_hash = token::hash_token(raw_token);
    debug!(
        token = token::fingerprint(&token_hash),
        chat_id, "link token received"
    );

    let attempt = match state.store.get_telegram_link_attempt_by_token_hash(&token_hash) {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "link attempt lookup failed");
            return UpdateOutcome::Rejected;
        }
    };

    let Some(attempt) = attempt else {
        if notify_user {
            reply(state, &chat_id, "That link code isn't valid. Please start the linking flow again from your device.").await;
        }
        return UpdateOutcome::Rejected;
    };

    if attempt_is_stale(&attempt) {
        let _ = state.store.mark_telegram_link_attempt_expired(&attempt.attempt_id);
        if notify_user {
            reply(state, &chat_id, "That link code has expired. Please start the linking flow again from your device.").await;
        }
        return UpdateOutcome::Rejected;
    }

    match state
        .store
        .complete_telegram_link(&attempt.attempt_id, &chat_id, message.username())
    {
        Ok(Some(linked)) if linked.status == LinkStatus::Linked => {
            info!(
                attempt_id = %linked.attempt_id,
                device_id = %linked.device_id,
                "device linked to telegram chat"
            );
            if notify_user {
                reply(
                    state,
                    &chat_id,
                    "Ping Watch is connected. You'll receive alerts for this device here.",
                )
                .await;
            }
            UpdateOutcome::Linked {
                attempt_id: linked.attempt_id,
                chat_id,
            }
        }
        Ok(_) => {
            if notify_user {
                reply(state, &chat_id, "That link code can no longer be used. Please start the linking flow again from your device.").await;
            }
            UpdateOutcome::Rejected
        }
        Err(e) => {
            warn!(error = %e, "link completion failed");
            UpdateOutcome::Rejected
        }
    }
}

/// Best-effort `getUpdates` pull used while a status poll sees a PENDING
/// attempt. A 409 ("webhook active") triggers one deleteWebhook retry.
///
/// Every pulled update goes through [`handle_update`] with user feedback
/// suppressed unless `telegram.confirm_on_poll` is set.
pub async fn pull_updates(state: &AppState) {
    let Some(telegram) = &state.telegram else {
        return;
    };
    let offset = state.poll_offset.load(Ordering::Relaxed);
    let offset = (offset > 0).then_some(offset);

    let updates = match telegram.get_updates(offset).await {
        Ok(updates) => updates,
        Err(TelegramError::WebhookActive) => {
            info!("getUpdates refused: webhook active; deleting webhook and retrying");
            if let Err(e) = telegram.delete_webhook().await {
                warn!(error = %e, "deleteWebhook failed");
                return;
            }
            match telegram.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "getUpdates retry failed");
                    return;
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "getUpdates failed");
            return;
        }
    };

    let notify_user = state.config.telegram.confirm_on_poll;
    for update in &updates {
        handle_update(state, update, notify_user).await;
        let next = update.update_id + 1;
        state.poll_offset.fetch_max(next, Ordering::Relaxed);
    }
}

async fn reply(state: &AppState, chat_id: &str, text: &str) {
    let Some(telegram) = &state.telegram else {
        return;
    };
    if let Err(e) = telegram.send_message(chat_id, text).await {
        warn!(chat_id, error = %e, "telegram reply failed");
    }
}
