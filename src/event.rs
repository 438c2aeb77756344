//! Wire-level data model: [`DishRecord`] and the [`StreamEvent`] union.
//!
//! The JSON shapes here are the contract between server and client:
//!
//! ```text
//! {"type":"markdown","content":"## Salads\n"}
//! {"type":"markdown_done"}
//! {"type":"dish","dish":{"section":"Salads","name_en":"Chop Salad",…}}
//! {"type":"done"}
//! {"type":"error","error":"Menu transcription failed: …"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One menu item, as structured by Stage 2.
///
/// Every field is a plain string and every field may be empty; a record is
/// never rejected for missing data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DishRecord {
    pub section: String,
    pub name_en: String,
    pub name_zh: String,
    pub ingredients_en: String,
    pub ingredients_zh: String,
    pub description_zh: String,
    pub image_prompt: String,
}

impl DishRecord {
    /// Build a record from one parsed NDJSON object.
    ///
    /// Models are not perfectly obedient about types, so each field is
    /// coerced: missing or `null` → empty, an array of strings → joined with
    /// `", "`, any other non-string → its JSON text. Unknown keys are ignored.
    pub fn from_json_object(obj: &Map<String, Value>) -> Self {
        let field = |key: &str| obj.get(key).map(coerce_field).unwrap_or_default();
        Self {
            section: field("section"),
            name_en: field("name_en"),
            name_zh: field("name_zh"),
            ingredients_en: field("ingredients_en"),
            ingredients_zh: field("ingredients_zh"),
            description_zh: field("description_zh"),
            image_prompt: field("image_prompt"),
        }
    }
}

fn coerce_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// One event of the analysis stream.
///
/// Emitted strictly in the order `markdown* markdown_done dish* (done|error)`,
/// with `error` also allowed straight after the markdown fragments when
/// Stage 1 fails. Exactly one terminal event per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A raw Stage 1 text fragment, forwarded as received.
    Markdown { content: String },
    /// Stage 1 finished; the transcript is frozen.
    MarkdownDone,
    /// One structured dish from Stage 2.
    Dish { dish: DishRecord },
    /// Successful end of stream.
    Done,
    /// Failed end of stream.
    Error { error: String },
}

impl StreamEvent {
    pub fn markdown(content: impl Into<String>) -> Self {
        StreamEvent::Markdown {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            error: message.into(),
        }
    }

    /// `true` for `done` and `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }

    /// The wire tag, handy for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Markdown { .. } => "markdown",
            StreamEvent::MarkdownDone => "markdown_done",
            StreamEvent::Dish { .. } => "dish",
            StreamEvent::Done => "done",
            StreamEvent::Error { .. } => "error",
        }
    }
}
