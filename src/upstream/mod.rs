//! External generation services, as injected capabilities.
//!
//! The pipeline never reaches for a global client. Everything it calls goes
//! through the [`Services`] bundle handed to each request, which holds three
//! trait objects:
//!
//! | Field         | Trait            | Used by |
//! |---------------|------------------|---------|
//! | `transcriber` | [`TextStreamer`] | Stage 1 (vision, image attached) |
//! | `structurer`  | [`TextStreamer`] | Stage 2 (text only) |
//! | `images`      | [`ImageGenerator`] | per-dish image calls |
//!
//! Production code builds the bundle with [`Services::from_config`]; tests
//! build it from the deterministic fakes in [`scripted`].

pub mod openai;
pub mod provider;
pub mod scripted;

use crate::config::AnalysisConfig;
use crate::error::{DishcoveryError, UpstreamError};
use async_trait::async_trait;
use edgequake_llm::{ImageData, LLMProvider, ProviderFactory};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

pub use openai::OpenAiClient;
pub use provider::LlmProviderStreamer;
pub use scripted::{ScriptStep, ScriptedImageGenerator, ScriptedStreamer};

/// Ordered text fragments of one streaming call. The stream ending is the
/// upstream's explicit completion signal; an `Err` item ends it with a failure.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

/// One streaming generation call.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    /// Attached for Stage 1 only.
    pub image: Option<ImageData>,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// A streaming text-generation service.
#[async_trait]
pub trait TextStreamer: Send + Sync {
    /// Open the call. Errors that happen before the first fragment (auth,
    /// bad request, connection refused) are returned here; later ones arrive
    /// as `Err` items on the stream.
    async fn open_stream(&self, request: StreamRequest) -> Result<FragmentStream, UpstreamError>;
}

/// A request/response image-generation service.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one image and return its URL.
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError>;
}

/// The capability bundle handed to each request.
#[derive(Clone)]
pub struct Services {
    pub transcriber: Arc<dyn TextStreamer>,
    pub structurer: Arc<dyn TextStreamer>,
    pub images: Arc<dyn ImageGenerator>,
}

impl Services {
    pub fn new(
        transcriber: Arc<dyn TextStreamer>,
        structurer: Arc<dyn TextStreamer>,
        images: Arc<dyn ImageGenerator>,
    ) -> Self {
        Self {
            transcriber,
            structurer,
            images,
        }
    }

    /// Resolve services from config, from most-specific to least-specific:
    ///
    /// 1. **Pre-built provider** (`config.provider`): used for both stages.
    /// 2. **Named provider** (`config.provider_name`, anything but `openai`):
    ///    built via [`ProviderFactory::create_llm_provider`] once per stage
    ///    model; the provider reads its own API key from the environment.
    /// 3. **OpenAI-compatible streaming client**: needs `config.api_key` or
    ///    `OPENAI_API_KEY`.
    ///
    /// Image generation always goes to the OpenAI-compatible endpoint; with
    /// no key it is wired to a generator that fails every call.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, DishcoveryError> {
        let openai = config
            .resolved_api_key()
            .map(|key| OpenAiClient::new(&config.api_base_url, key, config))
            .transpose()?
            .map(Arc::new);

        let images: Arc<dyn ImageGenerator> = match openai {
            Some(ref client) => client.clone(),
            None => Arc::new(UnconfiguredImageGenerator),
        };

        if let Some(ref provider) = config.provider {
            info!("Using pre-built LLM provider for both stages");
            let streamer: Arc<dyn TextStreamer> =
                Arc::new(LlmProviderStreamer::new(Arc::clone(provider)));
            return Ok(Self::new(streamer.clone(), streamer, images));
        }

        if let Some(name) = config
            .provider_name
            .as_deref()
            .filter(|n| !n.eq_ignore_ascii_case("openai"))
        {
            info!("Using provider '{}' via edgequake-llm", name);
            let transcriber = create_provider(name, &config.extraction_model)?;
            let structurer = create_provider(name, &config.structuring_model)?;
            return Ok(Self::new(
                Arc::new(LlmProviderStreamer::new(transcriber)),
                Arc::new(LlmProviderStreamer::new(structurer)),
                images,
            ));
        }

        match openai {
            Some(client) => {
                info!("Using OpenAI-compatible streaming API at {}", config.api_base_url);
                Ok(Self::new(client.clone(), client.clone(), client))
            }
            None => Err(DishcoveryError::ProviderNotConfigured {
                provider: "openai".to_string(),
                hint: "Set OPENAI_API_KEY (or pass --api-key), or choose another provider \
                       with --provider anthropic|gemini|ollama."
                    .to_string(),
            }),
        }
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DishcoveryError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        DishcoveryError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Stands in for image generation when no OpenAI-compatible key exists.
struct UnconfiguredImageGenerator;

#[async_trait]
impl ImageGenerator for UnconfiguredImageGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, UpstreamError> {
        Err(UpstreamError::NotConfigured(
            "image generation needs an OpenAI-compatible API key (OPENAI_API_KEY)".to_string(),
        ))
    }
}
