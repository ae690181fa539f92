//! SAS and shared-key signing for the Azure-compatible blob wire format.
//!
//! Everything here is pure string work over HMAC-SHA256, so the exact
//! canonical forms are unit-tested without a blob server.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::cloud::CloudConfig;
use crate::error::{BlobError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signed-timestamp format used in SAS tokens and `x-ms-date` headers.
pub fn format_sas_datetime(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Map a clip MIME type onto a blob-name extension. Parameters such as
/// `;codecs=vp8` are ignored; anything outside the allowlist gets no
/// extension.
pub fn guess_extension(mime_type: &str) -> &'static str {
    let normalized = mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "video/webm" => ".webm",
        "video/mp4" => ".mp4",
        _ => "",
    }
}

/// Canonical blob name for a clip: `sessions/{session}/events/{event}{ext}`.
pub fn build_blob_name(session_id: &str, event_id: &str, mime_type: &str) -> String {
    format!(
        "sessions/{session_id}/events/{event_id}{}",
        guess_extension(mime_type)
    )
}

fn sign(account_key: &str, string_to_sign: &str) -> Result<String> {
    let decoded_key = BASE64
        .decode(account_key)
        .map_err(|e| BlobError::Config(format!("account key is not valid base64: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(&decoded_key)
        .map_err(|e| BlobError::Config(format!("account key rejected by HMAC: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Build the SAS query string granting create+write on exactly one blob.
///
/// Returns the query (without leading `?`) and the expiry instant it was
/// signed for.
pub fn generate_upload_sas(
    config: &CloudConfig,
    blob_name: &str,
    now: DateTime<Utc>,
) -> Result<(String, DateTime<Utc>)> {
    let expiry = now + Duration::seconds(config.sas_expiry_seconds as i64);
    let expiry_str = format_sas_datetime(expiry);
    let permissions = "cw";
    let resource = "b";
    let canonicalized_resource = format!(
        "/blob/{}/{}/{}",
        config.account_name, config.container, blob_name
    );

    // Fixed empty positions: signed start, identifier, IP, snapshot time,
    // encryption scope, and the five response-header overrides.
    let string_to_sign = [
        permissions,
        "",
        expiry_str.as_str(),
        canonicalized_resource.as_str(),
        "",
        "",
        config.sas_protocol.as_str(),
        config.sas_version.as_str(),
        resource,
        "",
        "",
        "",
        "",
        "",
        "",
        "",
    ]
    .join("\n");

    let signature = sign(&config.account_key, &string_to_sign)?;

    let query = [
        ("sv", config.sas_version.as_str()),
        ("se", expiry_str.as_str()),
        ("sp", permissions),
        ("sr", resource),
        ("spr", config.sas_protocol.as_str()),
        ("sig", signature.as_str()),
    ]
    .iter()
    .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
    .collect::<Vec<_>>()
    .join("&");

    Ok((query, expiry))
}

/// Canonical string-to-sign for shared-key requests.
///
/// The Content-Length line is exactly empty when the body is empty and the
/// decimal length otherwise.
pub fn shared_key_string_to_sign(
    method: &str,
    content_length: u64,
    canonicalized_resource: &str,
    x_ms_date: &str,
    x_ms_version: &str,
) -> String {
    let canonicalized_headers = format!("x-ms-date:{x_ms_date}\nx-ms-version:{x_ms_version}\n");
    let content_length_value = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    [
        method.to_uppercase().as_str(),
        "", // Content-Encoding
        "", // Content-Language
        content_length_value.as_str(),
        "", // Content-MD5
        "", // Content-Type
        "", // Date (x-ms-date is used instead)
        "", // If-Modified-Since
        "", // If-Match
        "", // If-None-Match
        "", // If-Unmodified-Since
        "", // Range
        &format!("{canonicalized_headers}{canonicalized_resource}"),
    ]
    .join("\n")
}

/// `SharedKey {account}:{signature}` authorization header value.
pub fn shared_key_authorization(
    config: &CloudConfig,
    method: &str,
    content_length: u64,
    canonicalized_resource: &str,
    x_ms_date: &str,
    x_ms_version: &str,
) -> Result<String> {
    let string_to_sign = shared_key_string_to_sign(
        method,
        content_length,
        canonicalized_resource,
        x_ms_date,
        x_ms_version,
    );
    let signature = sign(&config.account_key, &string_to_sign)?;
    Ok(format!("SharedKey {}:{}", config.account_name, signature))
}
