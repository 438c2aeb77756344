//! # dishcovery
//!
//! Turn a photographed restaurant menu into a live stream of structured,
//! bilingual dish records.
//!
//! ## Why two stages?
//!
//! Asking a vision model for structured JSON straight from a photo makes it
//! read and reason at the same time, and either failure loses the whole
//! answer. Here the work is split: Stage 1 only transcribes the menu into
//! Markdown (which the user can watch appear), and Stage 2 turns that frozen
//! transcript into one JSON object per line. A broken line costs one dish,
//! not the menu.
//!
//! ## Pipeline Overview
//!
//! ```text
//! photo
//!  │
//!  ├─ 1. Input      size/format gate (JPEG, PNG, WebP ≤ 10 MiB)
//!  ├─ 2. Encode     bound to 2000 px, re-encode JPEG (spawn_blocking)
//!  ├─ 3. Stage 1    vision model streams Markdown ──▶ markdown events
//!  ├─ 4. Freeze     transcript becomes immutable ──▶ markdown_done
//!  ├─ 5. Stage 2    text model streams NDJSON ─────▶ dish events
//!  └─ 6. Terminal   exactly one of ────────────────▶ done | error
//! ```
//!
//! Events travel to the browser (or [`DishcoveryClient`]) as server-sent
//! events, where a [`StreamConsumer`] rebuilds the state. Dish images are
//! generated on demand, one call per dish, outside the stream.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dishcovery::{analyze_menu_stream, AnalysisConfig, Services, StreamEvent, UploadedImage};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider resolved from OPENAI_API_KEY unless configured otherwise
//!     let config = AnalysisConfig::default();
//!     let services = Services::from_config(&config)?;
//!
//!     let upload = UploadedImage::new(std::fs::read("menu.jpg")?, Some("image/jpeg".into()));
//!     let mut events = analyze_menu_stream(upload, &services, &config).await?;
//!     while let Some(event) = events.next().await {
//!         match event {
//!             StreamEvent::Markdown { content } => eprint!("{content}"),
//!             StreamEvent::Dish { dish } => println!("{} ({})", dish.name_en, dish.name_zh),
//!             StreamEvent::Error { error } => eprintln!("failed: {error}"),
//!             StreamEvent::MarkdownDone | StreamEvent::Done => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `dishcovery` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! dishcovery = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod images;
pub mod lines;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod server;
pub mod stream;
pub mod transport;
pub mod upstream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::DishcoveryClient;
pub use config::{AnalysisConfig, AnalysisConfigBuilder};
pub use consumer::{
    ClientDishState, ConsumerState, Flow, ImageRequest, StreamConsumer, UploadTicket,
};
pub use error::{DishcoveryError, InvalidImage, RecordError, UpstreamError};
pub use event::{DishRecord, StreamEvent};
pub use images::generate_dish_image;
pub use pipeline::input::UploadedImage;
pub use progress::{AnalysisObserver, AnalysisStats, NoopObserver};
pub use server::{create_router, serve, AppState};
pub use stream::{analyze_menu_stream, EventStream};
pub use upstream::{ImageGenerator, Services, StreamRequest, TextStreamer};
