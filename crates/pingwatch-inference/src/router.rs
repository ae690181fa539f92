//! Provider routing: video-mode primary, image-mode fallback.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tracing::{info, warn};

use pingwatch_core::config::InferenceConfig;

use crate::error::InferenceError;
use crate::parse::{parse_inference_response, InferenceResult};
use crate::prompts::{build_clip_analysis_prompt, build_intent_prompt, PRIMARY_SYSTEM_PROMPT};
use crate::provider::ChatProvider;
use crate::rules::{parse_rule_set, RuleCache, RuleSet};

const ANALYSIS_MAX_TOKENS: u32 = 1024;
const FALLBACK_MAX_TOKENS: u32 = 500;

/// MIME types the video-mode provider accepts as-is.
const SUPPORTED_VIDEO_MIME_TYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/quicktime",
    "video/mov",
];

/// Strip codec parameters and restrict to known video types.
///
/// Browsers report values like `video/webm;codecs=vp8,opus`; the parameter
/// commas would corrupt a data URL, so only the base type survives. The
/// result also flows into Telegram uploads.
pub fn normalize_video_mime(clip_mime: Option<&str>) -> String {
    let raw = clip_mime.unwrap_or("").trim().to_ascii_lowercase();
    if raw.is_empty() {
        return "video/webm".to_string();
    }
    let base = raw.split(';').next().unwrap_or("").trim().to_string();
    if SUPPORTED_VIDEO_MIME_TYPES.contains(&base.as_str()) || base.starts_with("video/") {
        return base;
    }
    "video/webm".to_string()
}

fn to_data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

/// Routes clip analysis to the primary video-mode provider with an
/// image-mode fallback, and owns the prompt→rules cache.
pub struct InferenceRouter {
    primary: Option<ChatProvider>,
    fallback: Option<ChatProvider>,
    cache: RuleCache,
    timeout: Duration,
}

impl InferenceRouter {
    pub fn from_settings(settings: &InferenceConfig) -> Self {
        let key_of = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .map(|s| s.trim_matches('"').trim_matches('\''))
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let primary = key_of(&settings.primary_api_key).map(|key| {
            ChatProvider::new(
                "primary",
                key,
                settings.primary_base_url.clone(),
                settings.primary_model.clone(),
            )
            .with_system_prompt(PRIMARY_SYSTEM_PROMPT)
        });
        let fallback = key_of(&settings.fallback_api_key).map(|key| {
            ChatProvider::new(
                "fallback",
                key,
                settings.fallback_base_url.clone(),
                settings.fallback_model.clone(),
            )
        });
        Self {
            primary,
            fallback,
            cache: RuleCache::new(),
            timeout: Duration::from_secs(settings.timeout_seconds.max(1)),
        }
    }

    #[cfg(test)]
    pub(crate) fn bare(timeout: Duration) -> Self {
        Self {
            primary: None,
            fallback: None,
            cache: RuleCache::new(),
            timeout,
        }
    }

    pub fn has_providers(&self) -> bool {
        self.primary.is_some() || self.fallback.is_some()
    }

    pub fn rule_cache(&self) -> &RuleCache {
        &self.cache
    }

    /// Normalise a free-form alert intent into a rule set.
    ///
    /// Cached by trimmed-lowercased prompt. Primary provider first, then
    /// fallback; when both fail the default rule set is cached so the
    /// failure is not retried per clip.
    pub async fn normalize_alert_intent(&self, user_prompt: &str) -> RuleSet {
        let prompt = user_prompt.trim();
        if prompt.is_empty() {
            return RuleSet::default();
        }
        if let Some(cached) = self.cache.get(prompt) {
            return cached;
        }

        let intent_prompt = build_intent_prompt(prompt);
        for provider in [self.primary.as_ref(), self.fallback.as_ref()]
            .into_iter()
            .flatten()
        {
            match provider
                .complete(json!(intent_prompt), ANALYSIS_MAX_TOKENS, self.timeout)
                .await
            {
                Ok(text) => {
                    let rules = parse_rule_set(&text);
                    self.cache.insert(prompt, rules.clone());
                    info!(provider = provider.name(), "alert intent normalised");
                    return rules;
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "alert-rule normalisation failed");
                }
            }
        }

        warn!("falling back to default alert rules");
        let rules = RuleSet::default();
        self.cache.insert(prompt, rules.clone());
        rules
    }

    /// Analyse one clip.
    ///
    /// The primary provider receives the whole clip as a base64 video data
    /// URL; on any primary failure the fallback gets the extracted frames.
    /// A fallback without frames re-raises the primary error.
    pub async fn analyze_clip(
        &self,
        clip_data: &[u8],
        clip_mime: &str,
        user_prompt: Option<&str>,
        frame_data_uris: &[String],
    ) -> Result<InferenceResult, InferenceError> {
        if clip_data.is_empty() {
            return Err(InferenceError::EmptyClip);
        }
        if !self.has_providers() {
            return Err(InferenceError::NoProviders);
        }

        let rules = match user_prompt.map(str::trim).filter(|p| !p.is_empty()) {
            Some(prompt) => Some(self.normalize_alert_intent(prompt).await),
            None => None,
        };
        let clip_prompt = build_clip_analysis_prompt(user_prompt, rules.as_ref());

        let mut primary_error = None;
        if let Some(primary) = &self.primary {
            let mime = normalize_video_mime(Some(clip_mime));
            let content = json!([
                {"type": "text", "text": clip_prompt},
                {"type": "video_url", "video_url": {"url": to_data_uri(clip_data, &mime)}},
            ]);
            info!(
                provider = primary.name(),
                model = primary.model(),
                bytes = clip_data.len(),
                "running video-mode inference"
            );
            match primary.complete(content, ANALYSIS_MAX_TOKENS, self.timeout).await {
                Ok(text) => {
                    let mut result = parse_inference_response(&text);
                    result.provider = primary.name().to_string();
                    result.model = Some(primary.model().to_string());
                    return Ok(result);
                }
                Err(e) => {
                    warn!(provider = primary.name(), error = %e, "video-mode inference failed");
                    primary_error = Some(e);
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            if frame_data_uris.is_empty() {
                return Err(match primary_error {
                    Some(e) => InferenceError::NoFramesForFallback(e),
                    None => InferenceError::Provider(crate::provider::ProviderError::Parse(
                        "image-mode fallback requires at least one extracted frame".to_string(),
                    )),
                });
            }
            let mut content = vec![json!({"type": "text", "text": clip_prompt})];
            for uri in frame_data_uris {
                content.push(json!({"type": "image_url", "image_url": {"url": uri}}));
            }
            info!(
                provider = fallback.name(),
                model = fallback.model(),
                frames = frame_data_uris.len(),
                "running image-mode fallback inference"
            );
            let text = fallback
                .complete(json!(content), FALLBACK_MAX_TOKENS, self.timeout)
                .await?;
            let mut result = parse_inference_response(&text);
            result.provider = fallback.name().to_string();
            result.model = Some(fallback.model().to_string());
            return Ok(result);
        }

        match primary_error {
            Some(e) => Err(InferenceError::Provider(e)),
            None => Err(InferenceError::NoProviders),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_normalisation_strips_parameters() {
        assert_eq!(
            normalize_video_mime(Some("video/webm;codecs=vp8,opus")),
            "video/webm"
        );
        assert_eq!(normalize_video_mime(Some("VIDEO/MP4")), "video/mp4");
        assert_eq!(normalize_video_mime(Some("video/x-matroska")), "video/x-matroska");
        assert_eq!(normalize_video_mime(Some("application/pdf")), "video/webm");
        assert_eq!(normalize_video_mime(Some("")), "video/webm");
        assert_eq!(normalize_video_mime(None), "video/webm");
    }

    #[test]
    fn data_uri_shape() {
        let uri = to_data_uri(b"abc", "video/webm");
        assert_eq!(uri, "data:video/webm;base64,YWJj");
    }

    #[tokio::test]
    async fn empty_clip_is_rejected_before_any_call() {
        let router = InferenceRouter::bare(Duration::from_secs(1));
        let err = router.analyze_clip(&[], "video/webm", None, &[]).await.unwrap_err();
        assert!(matches!(err, InferenceError::EmptyClip));
    }

    #[tokio::test]
    async fn missing_credentials_are_reported() {
        let router = InferenceRouter::bare(Duration::from_secs(1));
        let err = router
            .analyze_clip(b"clip", "video/webm", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::NoProviders));
    }

    #[tokio::test]
    async fn empty_intent_skips_cache_and_providers() {
        let router = InferenceRouter::bare(Duration::from_secs(1));
        let rules = router.normalize_alert_intent("   ").await;
        assert_eq!(rules, RuleSet::default());
        assert!(router.rule_cache().is_empty());
    }

    #[tokio::test]
    async fn failed_normalisation_caches_the_default() {
        // No providers configured: normalisation degrades to the default
        // rule set and caches it so the next clip skips the attempt.
        let router = InferenceRouter::bare(Duration::from_secs(1));
        let rules = router.normalize_alert_intent("alert on people").await;
        assert_eq!(rules, RuleSet::default());
        assert_eq!(router.rule_cache().len(), 1);
        assert!(router.rule_cache().get("Alert On People").is_some());
    }

    #[test]
    fn provider_construction_from_settings() {
        let mut settings = InferenceConfig::default();
        assert!(!InferenceRouter::from_settings(&settings).has_providers());

        settings.primary_api_key = Some("\"nvapi-123\"".into());
        let router = InferenceRouter::from_settings(&settings);
        assert!(router.has_providers());

        settings.primary_api_key = Some("   ".into());
        settings.fallback_api_key = Some("hf_456".into());
        let router = InferenceRouter::from_settings(&settings);
        assert!(router.has_providers());
    }
}
