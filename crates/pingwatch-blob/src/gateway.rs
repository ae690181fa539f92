//! Backend selection: cloud SAS uploads when configured, relay otherwise.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use pingwatch_core::config::BlobConfig;

use crate::cloud::{CloudBlobClient, CloudConfig};
use crate::error::{BlobError, Result};
use crate::local::LocalClipStore;
use crate::sas::generate_upload_sas;

/// Where a device should PUT its clip, and how the event row should record
/// the location.
#[derive(Debug, Clone)]
pub struct UploadPlan {
    pub upload_url: String,
    pub blob_url: String,
    pub blob_name: String,
    pub container: String,
    pub expires_at: DateTime<Utc>,
}

/// Two-backend clip storage facade.
pub struct BlobGateway {
    cloud: Option<CloudBlobClient>,
    local: LocalClipStore,
    sas_expiry_seconds: u64,
}

impl BlobGateway {
    pub fn new(settings: &BlobConfig) -> Self {
        let cloud = CloudConfig::from_settings(settings).map(CloudBlobClient::new);
        if cloud.is_some() {
            info!("blob gateway: cloud backend configured");
        } else {
            info!(dir = %settings.local_upload_dir, "blob gateway: relay backend only");
        }
        Self {
            cloud,
            local: LocalClipStore::new(settings.local_upload_dir.clone()),
            sas_expiry_seconds: settings.sas_expiry_seconds,
        }
    }

    pub fn cloud_configured(&self) -> bool {
        self.cloud.is_some()
    }

    /// Plan the upload target for one clip.
    ///
    /// Cloud mode wins when configured and its container can be prepared;
    /// any cloud-side failure degrades to a relay URL on this API rather
    /// than failing the initiate request.
    pub async fn plan_upload(
        &self,
        session_id: &str,
        event_id: &str,
        clip_mime: &str,
        public_base_url: &str,
    ) -> UploadPlan {
        let blob_name = crate::sas::build_blob_name(session_id, event_id, clip_mime);
        let now = Utc::now();

        if let Some(cloud) = &self.cloud {
            match self.plan_cloud_upload(cloud, &blob_name, now).await {
                Ok(plan) => return plan,
                Err(e) => {
                    warn!(error = %e, "cloud upload planning failed; falling back to relay");
                }
            }
        }
        self.plan_relay_upload(event_id, &blob_name, public_base_url, now)
    }

    async fn plan_cloud_upload(
        &self,
        cloud: &CloudBlobClient,
        blob_name: &str,
        now: DateTime<Utc>,
    ) -> Result<UploadPlan> {
        let cfg = cloud.config();
        if cfg.auto_create_container {
            cloud.ensure_container_exists().await?;
        }
        let (query, expires_at) = generate_upload_sas(cfg, blob_name, now)?;
        let blob_url = cfg.blob_url(blob_name);
        Ok(UploadPlan {
            upload_url: format!("{blob_url}?{query}"),
            blob_url,
            blob_name: blob_name.to_string(),
            container: cfg.container.clone(),
            expires_at,
        })
    }

    fn plan_relay_upload(
        &self,
        event_id: &str,
        blob_name: &str,
        public_base_url: &str,
        now: DateTime<Utc>,
    ) -> UploadPlan {
        let base = public_base_url.trim_end_matches('/');
        let upload_url = format!("{base}/events/{event_id}/upload");
        UploadPlan {
            blob_url: upload_url.clone(),
            upload_url,
            blob_name: blob_name.to_string(),
            container: "local".to_string(),
            expires_at: now + Duration::seconds(self.sas_expiry_seconds as i64),
        }
    }

    /// Store relayed bytes. Returns the strong ETag.
    pub fn store_relay_upload(&self, blob_name: &str, bytes: &[u8]) -> Result<String> {
        self.local.write(blob_name, bytes)
    }

    /// Fetch clip bytes for processing.
    ///
    /// Container `local` (or a blank container) reads the relay store
    /// directly; otherwise the cloud backend is tried first with local as
    /// the last resort.
    pub async fn download(&self, container: &str, blob_name: &str) -> Result<Vec<u8>> {
        if blob_name.trim().is_empty() {
            return Err(BlobError::NotFound("(empty blob name)".to_string()));
        }
        let cloud = match &self.cloud {
            Some(cloud) if container != "local" && !container.trim().is_empty() => cloud,
            _ => return self.local.read(blob_name),
        };
        match cloud.download(blob_name).await {
            Ok(bytes) => Ok(bytes),
            Err(e @ (BlobError::NotFound(_) | BlobError::Api { .. } | BlobError::Http(_))) => {
                warn!(error = %e, blob = blob_name, "cloud download failed; trying local copy");
                self.local.read(blob_name)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay_only(dir: &std::path::Path) -> BlobGateway {
        let mut settings = BlobConfig::default();
        settings.local_upload_dir = dir.to_string_lossy().into_owned();
        BlobGateway::new(&settings)
    }

    #[tokio::test]
    async fn relay_plan_points_back_at_this_api() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gateway = relay_only(dir.path());

        let plan = gateway
            .plan_upload("s-1", "clip-local", "video/webm", "http://test/")
            .await;
        assert_eq!(plan.upload_url, "http://test/events/clip-local/upload");
        assert_eq!(plan.container, "local");
        assert_eq!(plan.blob_name, "sessions/s-1/events/clip-local.webm");
        assert!(plan.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn cloud_plan_signs_the_blob_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = BlobConfig::default();
        settings.local_upload_dir = dir.path().to_string_lossy().into_owned();
        settings.endpoint = Some("http://127.0.0.1:10000/devstoreaccount1".into());
        settings.account_name = Some("devstoreaccount1".into());
        settings.account_key = Some("c2VjcmV0LWtleQ==".into());
        // auto_create stays off so no network call happens.
        let gateway = BlobGateway::new(&settings);

        let plan = gateway
            .plan_upload("s-1", "clip-123", "video/webm", "http://test")
            .await;
        assert!(plan.upload_url.starts_with(
            "http://127.0.0.1:10000/devstoreaccount1/clips/sessions/s-1/events/clip-123.webm?"
        ));
        assert!(plan.upload_url.contains("sig="));
        assert_eq!(plan.container, "clips");
    }

    #[tokio::test]
    async fn download_prefers_local_for_local_container() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gateway = relay_only(dir.path());
        gateway
            .store_relay_upload("sessions/s/events/e.webm", b"abc")
            .unwrap();
        let bytes = gateway.download("local", "sessions/s/events/e.webm").await.unwrap();
        assert_eq!(bytes, b"abc");
    }
}
