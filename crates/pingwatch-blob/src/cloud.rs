//! Shared-key HTTP client for the cloud blob backend.

use chrono::Utc;
use tracing::{debug, info, warn};

use pingwatch_core::config::BlobConfig;

use crate::error::{BlobError, Result};
use crate::sas::{format_sas_datetime, shared_key_authorization};

/// Cloud settings with all required fields present.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub endpoint: String,
    pub account_name: String,
    pub account_key: String,
    pub container: String,
    pub sas_expiry_seconds: u64,
    pub sas_version: String,
    pub sas_protocol: String,
    pub auto_create_container: bool,
    pub request_timeout_seconds: f64,
}

impl CloudConfig {
    /// Build from the shared settings; `None` when any of endpoint,
    /// account name, or account key is missing (relay mode applies then).
    pub fn from_settings(settings: &BlobConfig) -> Option<Self> {
        let take = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.trim_end_matches('/').to_string())
        };
        let endpoint = take(&settings.endpoint)?;
        let account_name = settings
            .account_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?
            .to_string();
        let account_key = settings
            .account_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?
            .to_string();
        Some(Self {
            endpoint,
            account_name,
            account_key,
            container: settings.container.clone(),
            sas_expiry_seconds: settings.sas_expiry_seconds,
            sas_version: settings.sas_version.clone(),
            sas_protocol: settings.sas_protocol.clone(),
            auto_create_container: settings.auto_create_container,
            request_timeout_seconds: settings.request_timeout_seconds,
        })
    }

    /// Path component of the endpoint (Azurite carries the account name
    /// there; real Azure endpoints have an empty path).
    fn endpoint_path(&self) -> String {
        self.endpoint
            .splitn(4, '/')
            .nth(3)
            .unwrap_or("")
            .trim_matches('/')
            .to_string()
    }

    /// `{endpoint}/{container}/{blob_name}`
    pub fn blob_url(&self, blob_name: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.container, blob_name)
    }
}

/// Minimal blob-service client: container bootstrap and downloads, both
/// authenticated with the account's shared key.
pub struct CloudBlobClient {
    client: reqwest::Client,
    config: CloudConfig,
}

impl CloudBlobClient {
    pub fn new(config: CloudConfig) -> Self {
        let timeout = std::time::Duration::from_secs_f64(config.request_timeout_seconds.max(0.1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    /// Create the clips container if it does not exist. An existing
    /// container (409) counts as success.
    pub async fn ensure_container_exists(&self) -> Result<()> {
        let cfg = &self.config;
        let x_ms_date = format_sas_datetime(Utc::now());
        let url = format!("{}/{}?restype=container", cfg.endpoint, cfg.container);

        let endpoint_path = cfg.endpoint_path();
        let resource_path = [endpoint_path.as_str(), cfg.container.as_str()]
            .iter()
            .filter(|p| !p.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        let canonicalized_resource =
            format!("/{}/{}\nrestype:container", cfg.account_name, resource_path);
        let authorization = shared_key_authorization(
            cfg,
            "PUT",
            0,
            &canonicalized_resource,
            &x_ms_date,
            &cfg.sas_version,
        )?;

        let response = self
            .client
            .put(&url)
            .header("x-ms-date", x_ms_date)
            .header("x-ms-version", &cfg.sas_version)
            .header("Content-Length", "0")
            .header("Authorization", authorization)
            .send()
            .await?;

        match response.status().as_u16() {
            201 | 202 | 204 => {
                info!(container = %cfg.container, "blob container created");
                Ok(())
            }
            409 => {
                debug!(container = %cfg.container, "blob container already exists");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(status, container = %cfg.container, "container create failed");
                Err(BlobError::Api {
                    status,
                    message: body,
                })
            }
        }
    }

    /// Download one blob from the clips container.
    pub async fn download(&self, blob_name: &str) -> Result<Vec<u8>> {
        let cfg = &self.config;
        let x_ms_date = format_sas_datetime(Utc::now());
        let url = cfg.blob_url(blob_name);

        let endpoint_path = cfg.endpoint_path();
        let resource_path = [endpoint_path.as_str(), cfg.container.as_str(), blob_name]
            .iter()
            .filter(|p| !p.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        let canonicalized_resource = format!("/{}/{}", cfg.account_name, resource_path);
        let authorization = shared_key_authorization(
            cfg,
            "GET",
            0,
            &canonicalized_resource,
            &x_ms_date,
            &cfg.sas_version,
        )?;

        let response = self
            .client
            .get(&url)
            .header("x-ms-date", x_ms_date)
            .header("x-ms-version", &cfg.sas_version)
            .header("Authorization", authorization)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 404 {
            warn!(blob = blob_name, "blob not found in cloud storage");
            return Err(BlobError::NotFound(blob_name.to_string()));
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BlobError::Api {
                status,
                message: body,
            });
        }
        let bytes = response.bytes().await?;
        debug!(blob = blob_name, bytes = bytes.len(), "blob downloaded");
        Ok(bytes.to_vec())
    }
}
