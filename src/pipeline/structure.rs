//! Stage 2: frozen transcript → NDJSON dish records.
//!
//! [`NdjsonDishParser`] is fed the upstream fragments as they arrive. Each
//! complete line is parsed on its own; a line that is not a JSON object is
//! reported as a [`RecordError`] and otherwise forgotten. Nothing about one
//! line can affect the next, so a single bad record never costs the rest of
//! the menu.

use crate::config::AnalysisConfig;
use crate::error::RecordError;
use crate::event::DishRecord;
use crate::lines::LineBuffer;
use crate::pipeline::extract::FrozenMarkdown;
use crate::prompts::{structuring_user_message, STRUCTURING_SYSTEM_PROMPT};
use crate::upstream::StreamRequest;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_-]*$").unwrap());

/// Longest excerpt of a bad line kept for logging.
const EXCERPT_CHARS: usize = 80;

/// Incremental NDJSON → [`DishRecord`] parser.
#[derive(Debug, Default)]
pub struct NdjsonDishParser {
    lines: LineBuffer,
    line_no: usize,
    malformed: usize,
}

impl NdjsonDishParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns a result for every line it completed.
    /// Blank and code-fence lines are skipped without a result.
    pub fn push(&mut self, fragment: &str) -> Vec<Result<DishRecord, RecordError>> {
        self.lines.push_str(fragment);
        let mut out = Vec::new();
        while let Some(line) = self.lines.next_line() {
            self.line_no += 1;
            if let Some(result) = self.parse_line(&line) {
                out.push(result);
            }
        }
        out
    }

    /// Upstream finished: the last line may lack a terminator.
    pub fn finish(&mut self) -> Vec<Result<DishRecord, RecordError>> {
        match self.lines.take_remainder() {
            Some(rest) => {
                self.line_no += 1;
                self.parse_line(&rest).into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Lines rejected so far.
    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    fn parse_line(&mut self, raw: &str) -> Option<Result<DishRecord, RecordError>> {
        let line = raw.trim();
        if line.is_empty() {
            return None;
        }
        if RE_FENCE.is_match(line) {
            debug!("Skipping code fence on line {}", self.line_no);
            return None;
        }

        let parsed = serde_json::from_str::<Value>(line);
        let result = match parsed {
            Ok(Value::Object(obj)) => Ok(DishRecord::from_json_object(&obj)),
            Ok(other) => Err(self.malformed(line, format!("found {}", json_kind(&other)))),
            Err(e) => Err(self.malformed(line, e.to_string())),
        };
        Some(result)
    }

    fn malformed(&mut self, line: &str, detail: String) -> RecordError {
        self.malformed += 1;
        RecordError::Malformed {
            line: self.line_no,
            detail,
            excerpt: excerpt(line),
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn excerpt(line: &str) -> String {
    if line.chars().count() <= EXCERPT_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(EXCERPT_CHARS - 1).collect();
        format!("{cut}\u{2026}")
    }
}

/// Build the Stage 2 request around the frozen transcript.
pub fn structuring_request(transcript: &FrozenMarkdown, config: &AnalysisConfig) -> StreamRequest {
    StreamRequest {
        model: config.structuring_model.clone(),
        system: config
            .structuring_prompt
            .clone()
            .unwrap_or_else(|| STRUCTURING_SYSTEM_PROMPT.to_string()),
        user: structuring_user_message(transcript.as_str()),
        image: None,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}
