//! Error types for the dishcovery library.
//!
//! Errors fall into tiers that match how far a failure is allowed to travel:
//!
//! * [`DishcoveryError`]: **Fatal** for the request: the upload is invalid,
//!   an upstream stage failed, or the provider is not configured. Before a
//!   stream is opened it is returned as `Err`; once the stream is running it
//!   is rendered into the single terminal `error` event.
//!
//! * [`UpstreamError`]: what an external generation service reported.
//!   Always wrapped into a stage-specific [`DishcoveryError`] before it
//!   reaches a caller so the message says *which* stage failed.
//!
//! * [`RecordError`]: **Non-fatal**: one NDJSON line from Stage 2 could not
//!   be parsed. The pipeline logs it and keeps going; it never becomes an
//!   event.

use thiserror::Error;

/// All request-fatal errors returned by the dishcovery library.
#[derive(Debug, Error)]
pub enum DishcoveryError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The upload failed the size/format check. Raised before any upstream
    /// call, so no stream is opened and no events are emitted.
    #[error("Invalid image: {0}")]
    InvalidImage(#[from] InvalidImage),

    /// A request body was well-formed but semantically unusable
    /// (missing multipart field, empty image prompt, …).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Stage 1 (image → markdown) failed. Stage 2 is never entered.
    #[error("Menu transcription failed: {source}")]
    UpstreamExtraction {
        #[source]
        source: UpstreamError,
    },

    /// Stage 1 finished but produced only whitespace.
    #[error("No menu text could be extracted from the image")]
    EmptyTranscript,

    /// Stage 2 (markdown → dish records) failed. Dishes already emitted stay
    /// valid.
    #[error("Dish structuring failed: {source}")]
    UpstreamStructuring {
        #[source]
        source: UpstreamError,
    },

    /// The image-generation call for one dish failed.
    #[error("Image generation failed: {source}")]
    ImageGeneration {
        #[source]
        source: UpstreamError,
    },

    // ── Provider / config errors ──────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Client-side errors ────────────────────────────────────────────────
    /// The HTTP client could not reach the server or lost the connection.
    #[error("Transport error: {0}")]
    Transport(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why an upload was rejected by the preprocessor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidImage {
    /// Zero-byte upload.
    #[error("the uploaded file is empty")]
    Empty,

    /// Upload exceeds the configured ceiling.
    #[error("image is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// Declared content type or sniffed magic bytes are not an accepted format.
    #[error("unsupported image format '{declared}' (accepted: JPEG, PNG, WebP)")]
    UnsupportedFormat { declared: String },

    /// Bytes look like an accepted format but fail to decode.
    #[error("image could not be decoded: {detail}")]
    Undecodable { detail: String },
}

/// An error reported by (or while talking to) an external generation service.
///
/// `Clone` so that scripted fakes can replay the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The call, or the wait for its next fragment, exceeded its time budget.
    #[error("upstream call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// HTTP 401/403: retrying will not help.
    #[error("authentication rejected (HTTP {status}): {detail}")]
    Auth { status: u16, detail: String },

    /// HTTP 429.
    #[error("rate limit exceeded{}", .retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure (DNS, TLS, reset, …).
    #[error("network error: {0}")]
    Network(String),

    /// The service answered, but not in the shape we expected.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The service reported an error in-band (error chunk, provider error).
    #[error("provider error: {0}")]
    Provider(String),

    /// No credentials/provider available for this capability.
    #[error("{0}")]
    NotConfigured(String),
}

impl UpstreamError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String, retry_after_secs: Option<u64>) -> Self {
        match status {
            401 | 403 => UpstreamError::Auth {
                status,
                detail: body,
            },
            429 => UpstreamError::RateLimited { retry_after_secs },
            _ => UpstreamError::Http { status, body },
        }
    }
}

/// A non-fatal error for a single Stage 2 output line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The line was not a JSON object.
    #[error("line {line}: not a JSON object ({detail}): {excerpt}")]
    Malformed {
        line: usize,
        detail: String,
        excerpt: String,
    },
}
