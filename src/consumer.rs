//! Client-side stream consumer.
//!
//! [`StreamConsumer`] turns the raw bytes of an analysis response back into
//! application state: the live Markdown text, the frozen transcript, the dish
//! list and a terminal status. It is transport-agnostic. Bytes go in through
//! [`StreamConsumer::feed`] exactly as they came off the socket, split
//! wherever the network split them.
//!
//! ```text
//! Idle ─begin_upload─▶ Uploading ─markdown─▶ ReceivingMarkdown
//!                          │                        │
//!                          └──── markdown_done ─────┴─▶ ReceivingDishes ─done─▶ Completed
//!
//! any non-Idle state ── error / protocol violation / early EOF ──▶ Error
//! ```
//!
//! Each upload gets an [`UploadTicket`]. Bytes fed with an older ticket are
//! ignored, so a slow response from a superseded upload can never leak into
//! the current one.

use crate::event::{DishRecord, StreamEvent};
use crate::transport::{decode_event, SseDecoder};
use tracing::{debug, warn};

/// Where the consumer is in the stream grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Uploading,
    ReceivingMarkdown,
    ReceivingDishes,
    Completed,
    Error,
}

impl ConsumerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConsumerState::Completed | ConsumerState::Error)
    }
}

/// Generation token for one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadTicket(u64);

/// An image call started by [`StreamConsumer::begin_image`]. Hand it back
/// to [`StreamConsumer::complete_image`] with the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    ticket: UploadTicket,
    pub index: usize,
    pub prompt: String,
}

/// Whether the caller should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// A dish as the client holds it: the record plus UI-only fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientDishState {
    pub dish: DishRecord,
    pub image_url: Option<String>,
    pub expanded: bool,
    pub generating_image: bool,
    pub image_error: Option<String>,
}

impl ClientDishState {
    fn new(dish: DishRecord) -> Self {
        Self {
            dish,
            ..Self::default()
        }
    }
}

/// Rebuilds analysis state from a byte stream.
#[derive(Debug)]
pub struct StreamConsumer {
    state: ConsumerState,
    generation: u64,
    decoder: SseDecoder,
    markdown: String,
    transcript: Option<String>,
    dishes: Vec<ClientDishState>,
    error: Option<String>,
}

impl Default for StreamConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self {
            state: ConsumerState::Idle,
            generation: 0,
            decoder: SseDecoder::new(),
            markdown: String::new(),
            transcript: None,
            dishes: Vec::new(),
            error: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Markdown received so far (grows fragment by fragment).
    pub fn markdown(&self) -> &str {
        &self.markdown
    }

    /// The transcript, once `markdown_done` arrived.
    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    pub fn dishes(&self) -> &[ClientDishState] {
        &self.dishes
    }

    pub fn dish(&self, index: usize) -> Option<&ClientDishState> {
        self.dishes.get(index)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    // ── Stream lifecycle ─────────────────────────────────────────────────

    /// Start a new upload. All state from the previous one is cleared here,
    /// before any byte of the new response can be fed.
    pub fn begin_upload(&mut self) -> UploadTicket {
        self.generation += 1;
        self.state = ConsumerState::Uploading;
        self.decoder.reset();
        self.markdown.clear();
        self.transcript = None;
        self.dishes.clear();
        self.error = None;
        debug!("Upload #{} started", self.generation);
        UploadTicket(self.generation)
    }

    fn is_current(&self, ticket: UploadTicket) -> bool {
        if ticket.0 != self.generation {
            debug!(
                "Ignoring input for stale upload #{} (current #{})",
                ticket.0, self.generation
            );
            return false;
        }
        true
    }

    /// Feed raw response bytes.
    pub fn feed(&mut self, ticket: UploadTicket, bytes: &[u8]) -> Flow {
        if !self.is_current(ticket) || self.is_terminal() {
            return Flow::Stop;
        }
        for payload in self.decoder.push(bytes) {
            let flow = match decode_event(&payload) {
                Ok(event) => self.apply(event),
                Err(e) => self.violation(format!("undecodable event payload: {e}")),
            };
            if flow == Flow::Stop {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Apply an already-decoded event, e.g. from an in-process stream.
    pub fn apply_event(&mut self, ticket: UploadTicket, event: StreamEvent) -> Flow {
        if !self.is_current(ticket) || self.is_terminal() {
            return Flow::Stop;
        }
        self.apply(event)
    }

    /// The byte stream ended. Without a terminal event that is an error.
    pub fn finish(&mut self, ticket: UploadTicket) {
        if !self.is_current(ticket) || self.is_terminal() {
            return;
        }
        self.decoder.reset();
        self.fail_with("stream ended before completion".to_string());
    }

    /// The transport failed (connection refused, non-2xx, read error).
    pub fn fail(&mut self, ticket: UploadTicket, message: impl Into<String>) {
        if !self.is_current(ticket) || self.is_terminal() {
            return;
        }
        self.fail_with(message.into());
    }

    fn apply(&mut self, event: StreamEvent) -> Flow {
        use ConsumerState::*;
        let kind = event.kind();
        match (self.state, event) {
            (Uploading | ReceivingMarkdown, StreamEvent::Markdown { content }) => {
                self.markdown.push_str(&content);
                self.state = ReceivingMarkdown;
                Flow::Continue
            }
            (Uploading | ReceivingMarkdown, StreamEvent::MarkdownDone) => {
                self.transcript = Some(self.markdown.clone());
                self.state = ReceivingDishes;
                Flow::Continue
            }
            (ReceivingDishes, StreamEvent::Dish { dish }) => {
                self.dishes.push(ClientDishState::new(dish));
                Flow::Continue
            }
            (ReceivingDishes, StreamEvent::Done) => {
                self.state = Completed;
                debug!("Stream completed with {} dishes", self.dishes.len());
                Flow::Stop
            }
            (_, StreamEvent::Error { error }) => {
                self.fail_with(error);
                Flow::Stop
            }
            (state, StreamEvent::Markdown { .. })
            | (state, StreamEvent::MarkdownDone)
            | (state, StreamEvent::Dish { .. })
            | (state, StreamEvent::Done) => {
                self.violation(format!("unexpected '{kind}' event while {state:?}"))
            }
        }
    }

    fn violation(&mut self, message: String) -> Flow {
        warn!("Protocol violation: {}", message);
        self.fail_with(format!("protocol violation: {message}"));
        Flow::Stop
    }

    fn fail_with(&mut self, message: String) {
        self.error = Some(message);
        self.state = ConsumerState::Error;
    }

    // ── Per-dish image lifecycle ─────────────────────────────────────────

    /// Flip the expansion flag; returns the new value, or `None` for an
    /// unknown index.
    pub fn toggle_expanded(&mut self, index: usize) -> Option<bool> {
        let dish = self.dishes.get_mut(index)?;
        dish.expanded = !dish.expanded;
        Some(dish.expanded)
    }

    /// Mark an image as in progress and return the request to send. Refused
    /// for an unknown index, an empty prompt, or while a call is running.
    pub fn begin_image(&mut self, index: usize) -> Option<ImageRequest> {
        let dish = self.dishes.get_mut(index)?;
        if dish.generating_image || dish.dish.image_prompt.trim().is_empty() {
            return None;
        }
        dish.generating_image = true;
        dish.image_error = None;
        Some(ImageRequest {
            ticket: UploadTicket(self.generation),
            index,
            prompt: dish.dish.image_prompt.clone(),
        })
    }

    /// Record the outcome of an image call. A request issued before the
    /// latest `begin_upload` is dropped, even if the new dish at the same
    /// index has its own call running.
    pub fn complete_image(&mut self, request: &ImageRequest, result: Result<String, String>) {
        if !self.is_current(request.ticket) {
            return;
        }
        let Some(dish) = self.dishes.get_mut(request.index) else {
            return;
        };
        if !dish.generating_image {
            return;
        }
        dish.generating_image = false;
        match result {
            Ok(url) => {
                dish.image_url = Some(url);
                dish.image_error = None;
            }
            Err(message) => dish.image_error = Some(message),
        }
    }
}
