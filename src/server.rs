//! HTTP server: upload endpoint streaming SSE, plus on-demand dish images.
//!
//! | Route | Method | Body | Response |
//! |-------|--------|------|----------|
//! | `/` | GET | - | `{"message": …}` |
//! | `/api/analyze-menu` | POST | multipart, field `file` | `text/event-stream` |
//! | `/api/generate-image` | POST | `{"image_prompt": …}` | `{"image_url": …}` |
//!
//! Upload errors are answered with a plain JSON `{"error": …}` before any
//! stream opens. Once the SSE response has started, failures travel as an
//! `error` event instead.

use crate::config::AnalysisConfig;
use crate::error::{DishcoveryError, InvalidImage};
use crate::images::generate_dish_image;
use crate::pipeline::input::UploadedImage;
use crate::stream::analyze_menu_stream;
use crate::transport::encode_payload;
use crate::upstream::Services;
use axum::extract::multipart::Multipart;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared per-server state. Only immutable config and `Arc` handles.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub config: Arc<AnalysisConfig>,
}

impl AppState {
    pub fn new(services: Services, config: AnalysisConfig) -> Self {
        Self {
            services,
            config: Arc::new(config),
        }
    }
}

/// JSON error response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<DishcoveryError> for ApiError {
    fn from(err: DishcoveryError) -> Self {
        let status = match &err {
            DishcoveryError::InvalidImage(InvalidImage::TooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            DishcoveryError::InvalidImage(InvalidImage::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            DishcoveryError::InvalidImage(_) | DishcoveryError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            DishcoveryError::ImageGeneration { .. }
            | DishcoveryError::UpstreamExtraction { .. }
            | DishcoveryError::UpstreamStructuring { .. } => StatusCode::BAD_GATEWAY,
            DishcoveryError::ProviderNotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DishcoveryError::EmptyTranscript
            | DishcoveryError::InvalidConfig(_)
            | DishcoveryError::Transport(_)
            | DishcoveryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

#[derive(Deserialize)]
struct GenerateImageRequest {
    #[serde(default)]
    image_prompt: String,
}

#[derive(Serialize)]
struct GenerateImageResponse {
    image_url: String,
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    // Leave room above the upload ceiling so oversize files reach the
    // handler and get a proper 413 with a JSON body.
    let body_limit = state.config.max_upload_bytes.saturating_mul(2);

    Router::new()
        .route("/", get(root))
        .route("/api/analyze-menu", post(analyze_menu))
        .route("/api/generate-image", post(generate_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Dishcovery API listening on http://{}", addr);
    }
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Dishcovery API is running" }))
}

async fn analyze_menu(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), format!("Invalid multipart payload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| {
            ApiError::new(e.status(), format!("Failed reading multipart 'file' field: {e}"))
        })?;
        upload = Some(UploadedImage {
            bytes: bytes.to_vec(),
            content_type,
            file_name,
        });
        break;
    }
    let upload =
        upload.ok_or_else(|| ApiError::bad_request("Missing multipart 'file' field"))?;

    let events = analyze_menu_stream(upload, &state.services, &state.config)
        .await
        .map_err(|e| {
            warn!("Rejected upload: {}", e);
            ApiError::from(e)
        })?;

    let frames =
        events.map(|event| Ok::<_, Infallible>(Event::default().data(encode_payload(&event))));

    Ok((
        [("x-accel-buffering", "no")],
        Sse::new(frames).keep_alive(KeepAlive::default()),
    )
        .into_response())
}

async fn generate_image(
    State(state): State<AppState>,
    payload: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<Json<GenerateImageResponse>, ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?;
    let image_url = generate_dish_image(&request.image_prompt, &state.services, &state.config).await?;
    Ok(Json(GenerateImageResponse { image_url }))
}
