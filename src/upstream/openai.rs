//! OpenAI-compatible HTTP client: streaming chat completions and image
//! generation.
//!
//! Works against api.openai.com and any server that speaks the same
//! protocol (vLLM, LiteLLM, Ollama's `/v1`, …).
//!
//! ## Chunk stream
//!
//! With `"stream": true` the server answers with server-sent events, one
//! `chat.completion.chunk` JSON per `data:` record, ending with
//! `data: [DONE]`. Records are framed by `eventsource-stream`. The text
//! lives in `choices[0].delta.content`, which is a string on most servers
//! and an array of content parts on some. A stream
//! that closes without `[DONE]` or a `finish_reason` was cut off and is
//! reported as malformed rather than silently treated as complete.

use crate::config::AnalysisConfig;
use crate::error::{DishcoveryError, UpstreamError};
use crate::pipeline::encode::data_url;
use crate::upstream::{FragmentStream, ImageGenerator, StreamRequest, TextStreamer};
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// The only transport-level bound on the client; stage budgets are applied
/// by the pipeline on top of it.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAI-compatible client. Cheap to clone; the connection pool is shared.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    image_model: String,
    image_size: String,
    image_quality: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        config: &AnalysisConfig,
    ) -> Result<Self, DishcoveryError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| DishcoveryError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            image_model: config.image_model.clone(),
            image_size: config.image_size.clone(),
            image_quality: config.image_quality.clone(),
        })
    }
}

#[async_trait]
impl TextStreamer for OpenAiClient {
    async fn open_stream(&self, request: StreamRequest) -> Result<FragmentStream, UpstreamError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            "Opening chat stream: model={} image={}",
            request.model,
            request.image.is_some()
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&chat_body(&request))
            .send()
            .await
            .map_err(|e| request_error(e, CONNECT_TIMEOUT))?;
        let response = check_status(response).await?;
        Ok(Box::pin(chunk_stream(response)))
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        let url = format!("{}/images/generations", self.base_url);
        let body = json!({
            "model": self.image_model,
            "prompt": prompt,
            "size": self.image_size,
            "quality": self.image_quality,
            "n": 1,
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, CONNECT_TIMEOUT))?;
        let response = check_status(response).await?;
        let parsed: ImagesResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(format!("image response: {e}")))?;
        parsed
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| UpstreamError::Malformed("image response contained no URL".into()))
    }
}

/// Request body for a streaming chat completion.
fn chat_body(request: &StreamRequest) -> Value {
    let user_content = match request.image {
        Some(ref image) => json!([
            { "type": "text", "text": request.user },
            { "type": "image_url", "image_url": { "url": data_url(image), "detail": "high" } },
        ]),
        None => json!(request.user),
    };
    json!({
        "model": request.model,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": user_content },
        ],
        "stream": true,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    })
}

/// Turn a non-2xx response into the matching [`UpstreamError`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    warn!("Upstream returned HTTP {}", status.as_u16());
    Err(UpstreamError::from_status(
        status.as_u16(),
        error_message(&body),
        retry_after,
    ))
}

/// Prefer `error.message` from an OpenAI error body; fall back to the raw text.
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("error").map(|e| match e.get("message").and_then(Value::as_str) {
            Some(m) => m.to_string(),
            None => e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()),
        })
    });
    let msg = from_json.unwrap_or_else(|| body.trim().to_string());
    if msg.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !msg.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}\u{2026}", &msg[..cut])
    } else {
        msg
    }
}

/// Map a reqwest failure; a timeout reports the bound that fired.
fn request_error(e: reqwest::Error, limit: Duration) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout {
            elapsed_ms: limit.as_millis() as u64,
        }
    } else if e.is_decode() {
        UpstreamError::Malformed(e.to_string())
    } else {
        UpstreamError::Network(e.to_string())
    }
}

fn event_error(e: EventStreamError<reqwest::Error>) -> UpstreamError {
    match e {
        EventStreamError::Transport(e) => request_error(e, CONNECT_TIMEOUT),
        other => UpstreamError::Malformed(format!("event stream: {other}")),
    }
}

fn chunk_stream(
    response: reqwest::Response,
) -> impl tokio_stream::Stream<Item = Result<String, UpstreamError>> + Send {
    async_stream::stream! {
        let mut events = Box::pin(response.bytes_stream().eventsource());
        let mut finished = false;
        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    yield Err(event_error(e));
                    return;
                }
            };
            match parse_chunk(&event.data) {
                Ok(ChunkOutcome::Delta { text, finish_reason }) => {
                    if let Some(reason) = finish_reason {
                        debug!("Chat stream finish_reason={}", reason);
                        finished = true;
                    }
                    if !text.is_empty() {
                        yield Ok(text);
                    }
                }
                Ok(ChunkOutcome::Done) => return,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if !finished {
            yield Err(UpstreamError::Malformed(
                "stream ended without a completion signal".into(),
            ));
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ChunkOutcome {
    Delta {
        text: String,
        finish_reason: Option<String>,
    },
    Done,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<DeltaContent>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeltaContent {
    Text(String),
    Parts(Vec<DeltaPart>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeltaPart {
    Text(String),
    Object {
        #[serde(default)]
        text: Option<String>,
    },
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageItem>,
}

#[derive(Deserialize)]
struct ImageItem {
    #[serde(default)]
    url: Option<String>,
}

fn parse_chunk(payload: &str) -> Result<ChunkOutcome, UpstreamError> {
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(ChunkOutcome::Done);
    }
    if payload.is_empty() {
        return Ok(ChunkOutcome::Delta {
            text: String::new(),
            finish_reason: None,
        });
    }

    let chunk: ChatChunk = serde_json::from_str(payload)
        .map_err(|e| UpstreamError::Malformed(format!("unparseable chunk: {e}")))?;
    if let Some(err) = chunk.error {
        let msg = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(UpstreamError::Provider(msg));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        // Usage-only or keep-alive chunk.
        return Ok(ChunkOutcome::Delta {
            text: String::new(),
            finish_reason: None,
        });
    };
    let text = match choice.delta.and_then(|d| d.content) {
        Some(DeltaContent::Text(s)) => s,
        Some(DeltaContent::Parts(parts)) => parts
            .into_iter()
            .filter_map(|p| match p {
                DeltaPart::Text(s) => Some(s),
                DeltaPart::Object { text } => text,
            })
            .collect(),
        None => String::new(),
    };
    Ok(ChunkOutcome::Delta {
        text,
        finish_reason: choice.finish_reason,
    })
}
