//! Deterministic upstream fakes.
//!
//! Used by the test suites and by anyone embedding the pipeline who wants to
//! exercise a client without network access. Both fakes record what they
//! were asked so tests can assert on the requests.

use crate::error::UpstreamError;
use crate::upstream::{FragmentStream, ImageGenerator, StreamRequest, TextStreamer};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

/// One scripted stream item.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Fragment(String),
    /// Yield this error and end the stream.
    Fail(UpstreamError),
    /// Never yield again.
    Stall,
}

/// A [`TextStreamer`] that replays a fixed script on every call.
#[derive(Debug)]
pub struct ScriptedStreamer {
    open_error: Option<UpstreamError>,
    steps: Vec<ScriptStep>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedStreamer {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            open_error: None,
            steps,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Stream these fragments, then complete.
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            fragments
                .into_iter()
                .map(|f| ScriptStep::Fragment(f.into()))
                .collect(),
        )
    }

    /// Fail when the call is opened, before any fragment.
    pub fn failing_open(error: UpstreamError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl TextStreamer for ScriptedStreamer {
    async fn open_stream(&self, request: StreamRequest) -> Result<FragmentStream, UpstreamError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        if let Some(ref err) = self.open_error {
            return Err(err.clone());
        }

        let steps = self.steps.clone();
        Ok(Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Fragment(text) => yield Ok(text),
                    ScriptStep::Fail(err) => {
                        yield Err(err);
                        return;
                    }
                    ScriptStep::Stall => futures::future::pending::<()>().await,
                }
            }
        }))
    }
}

type ImageFn = dyn Fn(&str) -> Result<String, UpstreamError> + Send + Sync;

/// An [`ImageGenerator`] that answers from a closure.
pub struct ScriptedImageGenerator {
    respond: Box<ImageFn>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedImageGenerator {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str) -> Result<String, UpstreamError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer every prompt with `{base}/{n}.png`, counting from 1.
    pub fn succeeding(base: impl Into<String>) -> Self {
        let base = base.into();
        let counter = std::sync::atomic::AtomicUsize::new(0);
        Self::new(move |_| {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            Ok(format!("{base}/{n}.png"))
        })
    }

    pub fn failing(error: UpstreamError) -> Self {
        Self::new(move |_| Err(error.clone()))
    }

    /// Every prompt received so far, after decoration.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ImageGenerator for ScriptedImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        (self.respond)(prompt)
    }
}
