//! [`TextStreamer`] over any `edgequake_llm` provider.
//!
//! `LLMProvider::chat` is request/response, so the whole completion arrives
//! as a single fragment. The pipeline is indifferent to fragment boundaries;
//! clients just see one large `markdown` event instead of many small ones.

use crate::error::UpstreamError;
use crate::upstream::{FragmentStream, StreamRequest, TextStreamer};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use tracing::debug;

pub struct LlmProviderStreamer {
    provider: Arc<dyn LLMProvider>,
}

impl LlmProviderStreamer {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl TextStreamer for LlmProviderStreamer {
    async fn open_stream(&self, request: StreamRequest) -> Result<FragmentStream, UpstreamError> {
        let images: Vec<_> = request.image.into_iter().collect();
        let messages = vec![
            ChatMessage::system(request.system.as_str()),
            ChatMessage::user_with_images(request.user.as_str(), images),
        ];

        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| UpstreamError::Provider(e.to_string()))?;

        debug!(
            "Provider completion: {} chars, {} in / {} out tokens",
            response.content.len(),
            response.prompt_tokens,
            response.completion_tokens
        );

        Ok(Box::pin(futures::stream::iter(vec![Ok(response.content)])))
    }
}
