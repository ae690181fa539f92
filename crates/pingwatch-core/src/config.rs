use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default gateway port — matches the port devices are provisioned with.
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Queue the gateway enqueues finalized clips on and the worker consumes.
pub const DEFAULT_QUEUE_NAME: &str = "clip_uploaded";

/// Bearer-token TTL bounds: 5 minutes to 30 days.
pub const TOKEN_TTL_MIN_SECONDS: u64 = 300;
pub const TOKEN_TTL_MAX_SECONDS: u64 = 60 * 60 * 24 * 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Invalid(String),
}

/// Top-level config (pingwatch.toml + PINGWATCH__* env overrides).
///
/// Env keys use a double-underscore separator, e.g.
/// `PINGWATCH__AUTH__REQUIRED=true` or `PINGWATCH__TELEGRAM__BOT_TOKEN=...`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PingWatchConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL devices use to reach this API. Relay upload URLs are built
    /// from it, so it must be reachable from the capture device.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Extra CORS origins (tunnel domains etc.) beyond the built-in
    /// localhost/private-LAN allowance.
    #[serde(default)]
    pub cors_extra_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            public_base_url: default_public_base_url(),
            cors_extra_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// When true, every write outside the public allowlist requires a valid
    /// bearer token and reads without one return 401.
    #[serde(default)]
    pub required: bool,
    #[serde(default = "bool_true")]
    pub dev_login_enabled: bool,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: false,
            dev_login_enabled: true,
            token_ttl_seconds: default_token_ttl(),
        }
    }
}

impl AuthConfig {
    /// Configured TTL clamped into the allowed [5 min, 30 days] window.
    pub fn effective_token_ttl_seconds(&self) -> u64 {
        self.token_ttl_seconds
            .clamp(TOKEN_TTL_MIN_SECONDS, TOKEN_TTL_MAX_SECONDS)
    }
}

/// Cloud blob store settings. When `endpoint`/`account_name`/`account_key`
/// are not all present the gateway serves relay uploads instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    pub endpoint: Option<String>,
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_sas_expiry")]
    pub sas_expiry_seconds: u64,
    #[serde(default = "default_sas_version")]
    pub sas_version: String,
    #[serde(default = "default_sas_protocol")]
    pub sas_protocol: String,
    #[serde(default)]
    pub auto_create_container: bool,
    #[serde(default = "default_blob_timeout")]
    pub request_timeout_seconds: f64,
    /// Root directory for relay-mode uploads.
    #[serde(default = "default_local_upload_dir")]
    pub local_upload_dir: String,
    /// Relay ETags are content hashes (strong) by default; turn off to
    /// hand out opaque tags instead.
    #[serde(default = "bool_true")]
    pub strong_etags: bool,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            account_name: None,
            account_key: None,
            container: default_container(),
            sas_expiry_seconds: default_sas_expiry(),
            sas_version: default_sas_version(),
            sas_protocol: default_sas_protocol(),
            auto_create_container: false,
            request_timeout_seconds: default_blob_timeout(),
            local_upload_dir: default_local_upload_dir(),
            strong_etags: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// API key for the primary (video-mode) provider.
    pub primary_api_key: Option<String>,
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    #[serde(default = "default_primary_base_url")]
    pub primary_base_url: String,
    /// API key for the fallback (image-mode) provider.
    pub fallback_api_key: Option<String>,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default = "default_fallback_base_url")]
    pub fallback_base_url: String,
    #[serde(default = "default_inference_timeout")]
    pub timeout_seconds: u64,
    /// Frames extracted per clip for the image-mode fallback.
    #[serde(default = "default_num_frames")]
    pub num_frames: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            primary_api_key: None,
            primary_model: default_primary_model(),
            primary_base_url: default_primary_base_url(),
            fallback_api_key: None,
            fallback_model: default_fallback_model(),
            fallback_base_url: default_fallback_base_url(),
            timeout_seconds: default_inference_timeout(),
            num_frames: default_num_frames(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    pub bot_token: Option<String>,
    /// Shared secret expected in `X-Telegram-Bot-Api-Secret-Token` on
    /// webhook ingress. Unset disables the check.
    pub webhook_secret: Option<String>,
    /// Deep-link base for connect URLs. `{start_payload}` / `{token}`
    /// placeholders substitute the link token; otherwise `?start=` is
    /// appended.
    pub onboarding_url: Option<String>,
    #[serde(default = "default_link_token_ttl")]
    pub link_token_ttl_seconds: u64,
    /// Send the clip itself (sendVideo) when bytes are available.
    #[serde(default = "bool_true")]
    pub send_video: bool,
    /// Echo a confirmation message for links completed during a status
    /// poll. Off by default so the webhook path stays the one that talks.
    #[serde(default)]
    pub confirm_on_poll: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_telegram_api_base(),
            bot_token: None,
            webhook_secret: None,
            onboarding_url: None,
            link_token_ttl_seconds: default_link_token_ttl(),
            send_video: true,
            confirm_on_poll: false,
        }
    }
}

impl TelegramConfig {
    /// Bot token with surrounding whitespace stripped; `None` when unset or
    /// blank.
    pub fn token(&self) -> Option<&str> {
        self.bot_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Outbound webhook target for alert payloads.
    pub webhook_url: Option<String>,
    /// Sent as `X-Ping-Watch-Webhook-Secret` when set.
    pub webhook_secret: Option<String>,
    #[serde(default = "default_notify_timeout")]
    pub timeout_seconds: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_secret: None,
            timeout_seconds: default_notify_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,
    /// Whether finalize retries a failed enqueue once. Default matches the
    /// operator-reprocess policy.
    #[serde(default)]
    pub retry_on_finalize: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            retry_on_finalize: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Control-plane API base the worker writes verdicts back through.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_worker_log_level")]
    pub log_level: String,
    /// Skip download/frames/inference and write a fixed test verdict.
    #[serde(default)]
    pub test_mode: bool,
    /// Idle sleep between queue polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            log_level: default_worker_log_level(),
            test_mode: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_public_base_url() -> String {
    format!("http://localhost:{DEFAULT_PORT}")
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.pingwatch/pingwatch.db")
}
fn default_token_ttl() -> u64 {
    86_400
}
fn default_container() -> String {
    "clips".to_string()
}
fn default_sas_expiry() -> u64 {
    900
}
fn default_sas_version() -> String {
    "2020-10-02".to_string()
}
fn default_sas_protocol() -> String {
    "http".to_string()
}
fn default_blob_timeout() -> f64 {
    2.0
}
fn default_local_upload_dir() -> String {
    ".local_uploads".to_string()
}
fn default_primary_model() -> String {
    "nvidia/nemotron-nano-12b-v2-vl".to_string()
}
fn default_primary_base_url() -> String {
    "https://integrate.api.nvidia.com".to_string()
}
fn default_fallback_model() -> String {
    "zai-org/GLM-4.6V-FP8:zai-org".to_string()
}
fn default_fallback_base_url() -> String {
    "https://router.huggingface.co".to_string()
}
fn default_inference_timeout() -> u64 {
    60
}
fn default_num_frames() -> usize {
    3
}
fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_link_token_ttl() -> u64 {
    600
}
fn default_notify_timeout() -> u64 {
    10
}
fn default_queue_name() -> String {
    DEFAULT_QUEUE_NAME.to_string()
}
fn default_api_base_url() -> String {
    format!("http://localhost:{DEFAULT_PORT}")
}
fn default_worker_log_level() -> String {
    "info".to_string()
}
fn default_poll_interval_ms() -> u64 {
    500
}

impl PingWatchConfig {
    /// Load config from a TOML file with PINGWATCH__* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. PINGWATCH_CONFIG env var
    ///   3. ~/.pingwatch/pingwatch.toml
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("PINGWATCH_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PINGWATCH__").split("__"))
            .extract()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// True when all three cloud blob settings are present and non-empty.
    pub fn cloud_blob_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.blob.endpoint) && set(&self.blob.account_name) && set(&self.blob.account_key)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.pingwatch/pingwatch.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = PingWatchConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert!(!cfg.auth.required);
        assert!(cfg.auth.dev_login_enabled);
        assert_eq!(cfg.queue.name, "clip_uploaded");
        assert_eq!(cfg.inference.num_frames, 3);
        assert!(cfg.telegram.send_video);
        assert!(!cfg.telegram.confirm_on_poll);
        assert!(!cfg.cloud_blob_configured());
    }

    #[test]
    fn token_ttl_is_clamped() {
        let mut auth = AuthConfig::default();
        auth.token_ttl_seconds = 10;
        assert_eq!(auth.effective_token_ttl_seconds(), TOKEN_TTL_MIN_SECONDS);
        auth.token_ttl_seconds = u64::MAX;
        assert_eq!(auth.effective_token_ttl_seconds(), TOKEN_TTL_MAX_SECONDS);
        auth.token_ttl_seconds = 3600;
        assert_eq!(auth.effective_token_ttl_seconds(), 3600);
    }

    #[test]
    fn blank_bot_token_reads_as_unset() {
        let mut tg = TelegramConfig::default();
        assert_eq!(tg.token(), None);
        tg.bot_token = Some("   ".to_string());
        assert_eq!(tg.token(), None);
        tg.bot_token = Some(" 123:abc ".to_string());
        assert_eq!(tg.token(), Some("123:abc"));
    }

    #[test]
    fn cloud_configured_requires_all_three() {
        let mut cfg = PingWatchConfig::default();
        cfg.blob.endpoint = Some("http://127.0.0.1:10000/devstoreaccount1".into());
        cfg.blob.account_name = Some("devstoreaccount1".into());
        assert!(!cfg.cloud_blob_configured());
        cfg.blob.account_key = Some("a2V5".into());
        assert!(cfg.cloud_blob_configured());
    }
}
