//! Pipeline stages for menu analysis.
//!
//! Each submodule implements one step; the orchestration that strings them
//! together into an event stream lives in [`crate::stream`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ extract ──▶ (frozen) ──▶ structure
//! (check)   (JPEG)    (Stage 1)               (Stage 2)
//! ```
//!
//! 1. [`input`]    : size/format gate; runs before any upstream call
//! 2. [`encode`]   : decode, bound to 2000 px, re-encode as JPEG, base64;
//!    CPU-bound, run via `spawn_blocking`
//! 3. [`extract`]  : Stage 1 request and the write-once transcript
//! 4. [`structure`]: Stage 2 request and the incremental NDJSON parser

pub mod encode;
pub mod extract;
pub mod input;
pub mod structure;
