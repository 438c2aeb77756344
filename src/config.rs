//! Configuration types for menu analysis.
//!
//! Every knob lives in [`AnalysisConfig`], built via its
//! [`AnalysisConfigBuilder`]. The config is immutable once built and cheap to
//! clone, so one instance is shared by every concurrent request; nothing in
//! it is mutated per request.

use crate::error::DishcoveryError;
use crate::progress::AnalysisObserver;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Default upload ceiling: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Default suffix appended to every dish image prompt.
pub const DEFAULT_IMAGE_STYLE_SUFFIX: &str =
    ", professional food photography, high quality, restaurant style";

/// Configuration for the analysis pipeline and the image generator.
///
/// # Example
/// ```rust
/// use dishcovery::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .extraction_model("gpt-4o")
///     .max_upload_bytes(5 * 1024 * 1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.structuring_model, "gpt-4o-mini");
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Largest accepted upload in bytes. Default: 10 MiB.
    pub max_upload_bytes: usize,

    /// Longest edge of the normalised image sent to the vision model.
    /// Larger images are downscaled (Lanczos3). Default: 2000.
    pub max_image_dimension: u32,

    /// JPEG quality of the normalised image (1–100). Default: 85.
    pub jpeg_quality: u8,

    /// Vision model used by Stage 1. Default: `gpt-4o-mini`.
    pub extraction_model: String,

    /// Text model used by Stage 2. Default: `gpt-4o-mini`.
    pub structuring_model: String,

    /// Image model. Default: `dall-e-3`.
    pub image_model: String,

    /// Requested image size. Default: `1024x1024`.
    pub image_size: String,

    /// Requested image quality. Default: `standard`.
    pub image_quality: String,

    /// Appended to every dish `image_prompt` before generation.
    pub image_style_suffix: String,

    /// Sampling temperature for both stages. Default: 0.1.
    pub temperature: f32,

    /// Max output tokens per stage. Default: 4096.
    pub max_tokens: usize,

    /// Bound on opening an upstream call and on a whole image call, in
    /// seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Bound on the wait for each next streamed fragment, in milliseconds.
    /// Default: 60 000.
    pub fragment_timeout_ms: u64,

    /// Base URL of the OpenAI-compatible API. Default: `https://api.openai.com/v1`.
    pub api_base_url: String,

    /// API key for the OpenAI-compatible API. Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,

    /// `edgequake-llm` provider name (e.g. "anthropic", "gemini", "ollama").
    /// `None` or `"openai"` selects the native streaming client.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Custom Stage 1 system prompt.
    pub extraction_prompt: Option<String>,

    /// Custom Stage 2 system prompt.
    pub structuring_prompt: Option<String>,

    /// Optional progress observer.
    pub observer: Option<Arc<dyn AnalysisObserver>>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_image_dimension: 2000,
            jpeg_quality: 85,
            extraction_model: "gpt-4o-mini".to_string(),
            structuring_model: "gpt-4o-mini".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
            image_quality: "standard".to_string(),
            image_style_suffix: DEFAULT_IMAGE_STYLE_SUFFIX.to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            api_timeout_secs: 120,
            fragment_timeout_ms: 60_000,
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            provider_name: None,
            provider: None,
            extraction_prompt: None,
            structuring_prompt: None,
            observer: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("extraction_model", &self.extraction_model)
            .field("structuring_model", &self.structuring_model)
            .field("image_model", &self.image_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("fragment_timeout_ms", &self.fragment_timeout_ms)
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("observer", &self.observer.as_ref().map(|_| "<dyn AnalysisObserver>"))
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// The API key from config, else `OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()))
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px.max(64);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn extraction_model(mut self, model: impl Into<String>) -> Self {
        self.config.extraction_model = model.into();
        self
    }

    pub fn structuring_model(mut self, model: impl Into<String>) -> Self {
        self.config.structuring_model = model.into();
        self
    }

    pub fn image_model(mut self, model: impl Into<String>) -> Self {
        self.config.image_model = model.into();
        self
    }

    pub fn image_size(mut self, size: impl Into<String>) -> Self {
        self.config.image_size = size.into();
        self
    }

    pub fn image_quality(mut self, quality: impl Into<String>) -> Self {
        self.config.image_quality = quality.into();
        self
    }

    pub fn image_style_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.image_style_suffix = suffix.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn fragment_timeout_ms(mut self, ms: u64) -> Self {
        self.config.fragment_timeout_ms = ms;
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn structuring_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.structuring_prompt = Some(prompt.into());
        self
    }

    pub fn observer(mut self, observer: Arc<dyn AnalysisObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, DishcoveryError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(DishcoveryError::InvalidConfig(
                "max_upload_bytes must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(DishcoveryError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 || c.fragment_timeout_ms == 0 {
            return Err(DishcoveryError::InvalidConfig(
                "timeouts must be non-zero".into(),
            ));
        }
        if c.extraction_model.trim().is_empty() || c.structuring_model.trim().is_empty() {
            return Err(DishcoveryError::InvalidConfig(
                "model names must not be empty".into(),
            ));
        }
        if !c.api_base_url.starts_with("http://") && !c.api_base_url.starts_with("https://") {
            return Err(DishcoveryError::InvalidConfig(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                c.api_base_url
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_limits() {
        let c = AnalysisConfig::default();
        assert_eq!(c.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(c.max_image_dimension, 2000);
        assert_eq!(c.jpeg_quality, 85);
        assert_eq!(c.max_tokens, 4096);
    }

    #[test]
    fn builder_clamps_and_trims() {
        let c = AnalysisConfig::builder()
            .jpeg_quality(0)
            .temperature(9.0)
            .api_base_url("http://localhost:11434/v1/")
            .build()
            .unwrap();
        assert_eq!(c.jpeg_quality, 1);
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.api_base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn build_rejects_bad_values() {
        assert!(AnalysisConfig::builder().max_upload_bytes(0).build().is_err());
        assert!(AnalysisConfig::builder().fragment_timeout_ms(0).build().is_err());
        assert!(AnalysisConfig::builder().api_base_url("ftp://x").build().is_err());
        assert!(AnalysisConfig::builder().extraction_model(" ").build().is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let c = AnalysisConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn explicit_key_wins_over_env() {
        let c = AnalysisConfig::builder().api_key("sk-explicit").build().unwrap();
        assert_eq!(c.resolved_api_key().as_deref(), Some("sk-explicit"));
    }
}
