//! HTTP client for a running dishcovery server.
//!
//! Drives a [`StreamConsumer`] from a live `/api/analyze-menu` response:
//! every chunk read off the socket is fed to the consumer as-is, and the
//! response is dropped (closing the connection) as soon as the consumer
//! reaches a terminal state.

use crate::consumer::{ConsumerState, Flow, StreamConsumer, UploadTicket};
use crate::error::{DishcoveryError, UpstreamError};
use crate::pipeline::input::UploadedImage;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Serialize)]
struct ImageRequestBody<'a> {
    image_prompt: &'a str,
}

#[derive(Deserialize)]
struct ImageResponseBody {
    image_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for the dishcovery HTTP API.
#[derive(Debug, Clone)]
pub struct DishcoveryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DishcoveryClient {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:8000`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, DishcoveryError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DishcoveryError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self::with_http_client(http, base_url))
    }

    pub fn with_http_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload a menu photo and feed the response into `consumer` until it
    /// reaches `Completed` or `Error`. Transport failures and non-2xx
    /// responses end up in the consumer's error, not in a return value.
    pub async fn analyze_menu(
        &self,
        consumer: &mut StreamConsumer,
        upload: UploadedImage,
    ) -> ConsumerState {
        let ticket = consumer.begin_upload();
        if let Err(e) = self.stream_into(consumer, ticket, upload).await {
            consumer.fail(ticket, e.to_string());
        }
        consumer.state()
    }

    async fn stream_into(
        &self,
        consumer: &mut StreamConsumer,
        ticket: UploadTicket,
        upload: UploadedImage,
    ) -> Result<(), DishcoveryError> {
        let url = format!("{}/api/analyze-menu", self.base_url);
        let file_name = upload.file_name.unwrap_or_else(|| "menu".to_string());
        let mut part = Part::bytes(upload.bytes).file_name(file_name);
        if let Some(ct) = upload.content_type {
            part = part
                .mime_str(&ct)
                .map_err(|e| DishcoveryError::InvalidRequest(format!("content type '{ct}': {e}")))?;
        }
        let form = Form::new().part("file", part);

        info!("Uploading menu to {}", url);
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = server_message(&body)
                .unwrap_or_else(|| format!("server returned HTTP {}", status.as_u16()));
            consumer.fail(ticket, message);
            return Ok(());
        }

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(transport)?;
            if consumer.feed(ticket, &chunk) == Flow::Stop {
                debug!("Consumer reached {:?}; closing response", consumer.state());
                return Ok(());
            }
        }
        consumer.finish(ticket);
        Ok(())
    }

    /// Ask the server for one dish image; returns its URL.
    pub async fn generate_image(&self, image_prompt: &str) -> Result<String, DishcoveryError> {
        let url = format!("{}/api/generate-image", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&ImageRequestBody { image_prompt })
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = server_message(&body).unwrap_or(body);
            return Err(if status == reqwest::StatusCode::BAD_REQUEST {
                DishcoveryError::InvalidRequest(message)
            } else {
                DishcoveryError::ImageGeneration {
                    source: UpstreamError::from_status(status.as_u16(), message, None),
                }
            });
        }

        let parsed: ImageResponseBody = response
            .json()
            .await
            .map_err(|e| DishcoveryError::Transport(format!("image response: {e}")))?;
        Ok(parsed.image_url)
    }

    /// Run the per-dish image lifecycle for dish `index`. Returns `false`
    /// if the consumer refused to start (unknown index, empty prompt or a
    /// call already in flight).
    ///
    /// Holds the consumer for the duration of the call; to generate several
    /// images at once, drive [`StreamConsumer::begin_image`] and
    /// [`StreamConsumer::complete_image`] around [`Self::generate_image`]
    /// directly.
    pub async fn generate_dish_image(&self, consumer: &mut StreamConsumer, index: usize) -> bool {
        let Some(request) = consumer.begin_image(index) else {
            return false;
        };
        let result = self
            .generate_image(&request.prompt)
            .await
            .map_err(|e| e.to_string());
        consumer.complete_image(&request, result);
        true
    }
}

fn transport(e: reqwest::Error) -> DishcoveryError {
    DishcoveryError::Transport(e.to_string())
}

fn server_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error)
}
