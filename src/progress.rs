//! Progress-observer trait for per-request pipeline events.
//!
//! Inject an [`Arc<dyn AnalysisObserver>`] via
//! [`crate::config::AnalysisConfigBuilder::observer`] to watch a request
//! progress through both stages. Unlike the event stream, the observer also
//! hears about things that never reach the client, such as malformed Stage 2
//! lines that were dropped.
//!
//! # Example
//!
//! ```rust
//! use dishcovery::{AnalysisConfig, AnalysisObserver, DishRecord};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct DishCounter(AtomicUsize);
//!
//! impl AnalysisObserver for DishCounter {
//!     fn on_dish(&self, index: usize, dish: &DishRecord) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("dish #{index}: {}", dish.name_en);
//!     }
//! }
//!
//! let config = AnalysisConfig::builder()
//!     .observer(Arc::new(DishCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::event::DishRecord;
use std::sync::Arc;

/// Per-request counters reported when a stream finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisStats {
    /// Characters in the frozen transcript.
    pub markdown_chars: usize,
    /// Markdown fragments forwarded.
    pub markdown_fragments: usize,
    /// Dish events emitted.
    pub dishes: usize,
    /// Stage 2 lines dropped as malformed.
    pub malformed_lines: usize,
    /// Wall-clock time since the request started.
    pub duration_ms: u64,
}

/// Called by the pipeline as a request moves through its stages.
///
/// Requests run concurrently, so one observer may be called from several
/// tasks at once; implementations protect shared state themselves. All
/// methods default to no-ops.
pub trait AnalysisObserver: Send + Sync {
    /// Upload accepted and normalised; Stage 1 is about to open.
    fn on_analysis_start(&self, image_bytes: usize) {
        let _ = image_bytes;
    }

    /// One Stage 1 fragment was forwarded.
    fn on_markdown_fragment(&self, fragment: &str) {
        let _ = fragment;
    }

    /// Stage 1 finished; the transcript is frozen.
    fn on_transcript_complete(&self, markdown_chars: usize) {
        let _ = markdown_chars;
    }

    /// A dish was emitted. `index` is 0-based arrival order.
    fn on_dish(&self, index: usize, dish: &DishRecord) {
        let _ = (index, dish);
    }

    /// A Stage 2 line was dropped.
    fn on_malformed_line(&self, line: usize, detail: &str) {
        let _ = (line, detail);
    }

    /// The stream ended with `done`.
    fn on_analysis_complete(&self, stats: &AnalysisStats) {
        let _ = stats;
    }

    /// The stream ended with `error`.
    fn on_analysis_error(&self, message: &str, stats: &AnalysisStats) {
        let _ = (message, stats);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopObserver;

impl AnalysisObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type Observer = Arc<dyn AnalysisObserver>;
