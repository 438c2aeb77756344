//! Stage 1: menu photo → Markdown transcript.
//!
//! The transcript is modelled as a typestate. [`MarkdownDocument`] can only
//! grow; [`MarkdownDocument::freeze`] consumes it and returns a
//! [`FrozenMarkdown`] with no mutating methods at all, so Stage 2 cannot be
//! handed a document that is still changing.

use crate::config::AnalysisConfig;
use crate::pipeline::encode::NormalizedImage;
use crate::prompts::{EXTRACTION_SYSTEM_PROMPT, EXTRACTION_USER_INSTRUCTION};
use crate::upstream::StreamRequest;
use std::fmt;
use std::sync::Arc;

/// The append-only Stage 1 transcript.
#[derive(Debug, Default)]
pub struct MarkdownDocument {
    text: String,
    fragments: usize,
}

impl MarkdownDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one upstream fragment.
    pub fn append(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// End of Stage 1. After this the text can no longer change.
    pub fn freeze(self) -> FrozenMarkdown {
        FrozenMarkdown {
            text: Arc::from(self.text),
        }
    }
}

/// The completed, immutable transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrozenMarkdown {
    text: Arc<str>,
}

impl FrozenMarkdown {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Whitespace only.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

impl fmt::Display for FrozenMarkdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Build the Stage 1 vision request.
pub fn transcription_request(image: &NormalizedImage, config: &AnalysisConfig) -> StreamRequest {
    StreamRequest {
        model: config.extraction_model.clone(),
        system: config
            .extraction_prompt
            .clone()
            .unwrap_or_else(|| EXTRACTION_SYSTEM_PROMPT.to_string()),
        user: EXTRACTION_USER_INSTRUCTION.to_string(),
        image: Some(image.image.clone()),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}
