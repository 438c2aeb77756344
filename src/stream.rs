//! Streaming analysis API: one upload in, one ordered event stream out.
//!
//! [`analyze_menu_stream`] does the synchronous part of a request up front
//! (validation and image normalisation) and returns `Err` if that fails, so
//! a bad upload never opens a stream. Everything after that is delivered as
//! [`StreamEvent`]s:
//!
//! ```text
//! markdown* markdown_done dish* done
//!                             └──── error      (Stage 2 failure)
//!                 └──────────────── error      (blank transcript)
//! markdown* ─────────────────────── error      (Stage 1 failure)
//! ```
//!
//! The stream is a pull-based generator. Nothing runs between polls, so a
//! client that disconnects simply stops polling; dropping the stream drops
//! the in-flight upstream call with it.

use crate::config::AnalysisConfig;
use crate::error::{DishcoveryError, RecordError, UpstreamError};
use crate::event::StreamEvent;
use crate::pipeline::encode::{self, NormalizedImage};
use crate::pipeline::extract::{self, MarkdownDocument};
use crate::pipeline::input::{self, UploadedImage};
use crate::pipeline::structure::{self, NdjsonDishParser};
use crate::progress::{AnalysisStats, Observer};
use crate::upstream::{FragmentStream, Services, StreamRequest, TextStreamer};
use futures::StreamExt;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// A boxed stream of analysis events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Analyse a menu photo, streaming events as they are produced.
///
/// # Returns
/// - `Ok(EventStream)`: always ends with exactly one `done` or `error`
/// - `Err(DishcoveryError::InvalidImage)`: the upload was rejected; no
///   upstream call was made
///
/// # Example
/// ```rust,no_run
/// use dishcovery::{analyze_menu_stream, AnalysisConfig, Services, StreamEvent, UploadedImage};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AnalysisConfig::default();
/// let services = Services::from_config(&config)?;
/// let upload = UploadedImage::new(std::fs::read("menu.jpg")?, Some("image/jpeg".into()));
/// let mut events = analyze_menu_stream(upload, &services, &config).await?;
/// while let Some(event) = events.next().await {
///     if let StreamEvent::Dish { dish } = event {
///         println!("{} / {}", dish.name_en, dish.name_zh);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn analyze_menu_stream(
    upload: UploadedImage,
    services: &Services,
    config: &AnalysisConfig,
) -> Result<EventStream, DishcoveryError> {
    let format = input::validate_upload(&upload, config.max_upload_bytes)?;
    info!(
        "Accepted upload: {} bytes, {:?}{}",
        upload.bytes.len(),
        format,
        upload
            .file_name
            .as_deref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default()
    );

    let max_dimension = config.max_image_dimension;
    let quality = config.jpeg_quality;
    let bytes = upload.bytes;
    let upload_len = bytes.len();
    let image = tokio::task::spawn_blocking(move || {
        encode::normalize_image(&bytes, format, max_dimension, quality)
    })
    .await
    .map_err(|e| DishcoveryError::Internal(format!("image normalisation task: {e}")))??;

    if let Some(ref ob) = config.observer {
        ob.on_analysis_start(upload_len);
    }

    Ok(run_pipeline(image, services.clone(), config.clone()))
}

/// The two-stage generator. Stage 2 only opens after Stage 1's stream has
/// ended and the transcript is frozen.
fn run_pipeline(image: NormalizedImage, services: Services, config: AnalysisConfig) -> EventStream {
    Box::pin(async_stream::stream! {
        let mut run = RunGuard::new(config.observer.clone());
        let open_limit = Duration::from_secs(config.api_timeout_secs);
        let fragment_limit = Duration::from_millis(config.fragment_timeout_ms);

        // ── Stage 1: image → markdown ────────────────────────────────────
        info!(
            "Stage 1: transcribing {}x{} menu image with {}",
            image.dimensions.0, image.dimensions.1, config.extraction_model
        );
        let request = extract::transcription_request(&image, &config);
        drop(image);

        let mut fragments = match open_stage(&*services.transcriber, request, open_limit).await {
            Ok(s) => s,
            Err(source) => {
                yield run.fail(DishcoveryError::UpstreamExtraction { source });
                return;
            }
        };

        let mut document = MarkdownDocument::new();
        loop {
            match next_fragment(&mut fragments, fragment_limit).await {
                Ok(Some(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    document.append(&fragment);
                    if let Some(ref ob) = run.observer {
                        ob.on_markdown_fragment(&fragment);
                    }
                    run.events += 1;
                    yield StreamEvent::Markdown { content: fragment };
                }
                Ok(None) => break,
                Err(source) => {
                    yield run.fail(DishcoveryError::UpstreamExtraction { source });
                    return;
                }
            }
        }
        drop(fragments);

        run.stats.markdown_fragments = document.fragments();
        let transcript = document.freeze();
        run.stats.markdown_chars = transcript.char_count();
        info!(
            "Stage 1 complete: {} chars in {} fragments",
            run.stats.markdown_chars, run.stats.markdown_fragments
        );
        if let Some(ref ob) = run.observer {
            ob.on_transcript_complete(run.stats.markdown_chars);
        }
        run.events += 1;
        yield StreamEvent::MarkdownDone;

        if transcript.is_blank() {
            yield run.fail(DishcoveryError::EmptyTranscript);
            return;
        }

        // ── Stage 2: markdown → dishes ───────────────────────────────────
        info!("Stage 2: structuring dishes with {}", config.structuring_model);
        let request = structure::structuring_request(&transcript, &config);
        let mut fragments = match open_stage(&*services.structurer, request, open_limit).await {
            Ok(s) => s,
            Err(source) => {
                yield run.fail(DishcoveryError::UpstreamStructuring { source });
                return;
            }
        };

        let mut parser = NdjsonDishParser::new();
        loop {
            let (results, last) = match next_fragment(&mut fragments, fragment_limit).await {
                Ok(Some(fragment)) => (parser.push(&fragment), false),
                Ok(None) => (parser.finish(), true),
                Err(source) => {
                    run.stats.malformed_lines = parser.malformed_count();
                    yield run.fail(DishcoveryError::UpstreamStructuring { source });
                    return;
                }
            };
            for result in results {
                match result {
                    Ok(dish) => {
                        debug!("Dish {}: {}", run.stats.dishes + 1, dish.name_en);
                        if let Some(ref ob) = run.observer {
                            ob.on_dish(run.stats.dishes, &dish);
                        }
                        run.stats.dishes += 1;
                        run.events += 1;
                        yield StreamEvent::Dish { dish };
                    }
                    Err(err) => run.malformed(&err),
                }
            }
            if last {
                break;
            }
        }

        run.stats.malformed_lines = parser.malformed_count();
        yield run.complete();
    })
}

/// Open one stage's upstream call within `limit`.
async fn open_stage(
    streamer: &dyn TextStreamer,
    request: StreamRequest,
    limit: Duration,
) -> Result<FragmentStream, UpstreamError> {
    match tokio::time::timeout(limit, streamer.open_stream(request)).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout {
            elapsed_ms: limit.as_millis() as u64,
        }),
    }
}

/// Wait for the next fragment; a quiet upstream is a timeout.
async fn next_fragment(
    stream: &mut FragmentStream,
    limit: Duration,
) -> Result<Option<String>, UpstreamError> {
    match tokio::time::timeout(limit, stream.next()).await {
        Ok(Some(item)) => item.map(Some),
        Ok(None) => Ok(None),
        Err(_) => Err(UpstreamError::Timeout {
            elapsed_ms: limit.as_millis() as u64,
        }),
    }
}

/// Per-request bookkeeping. Dropped without reaching a terminal event means
/// the consumer went away mid-stream.
struct RunGuard {
    observer: Option<Observer>,
    stats: AnalysisStats,
    started: Instant,
    events: usize,
    finished: bool,
}

impl RunGuard {
    fn new(observer: Option<Observer>) -> Self {
        Self {
            observer,
            stats: AnalysisStats::default(),
            started: Instant::now(),
            events: 0,
            finished: false,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn malformed(&mut self, err: &RecordError) {
        let RecordError::Malformed {
            line,
            detail,
            excerpt,
        } = err;
        warn!("Dropping malformed dish line {}: {} [{}]", line, detail, excerpt);
        if let Some(ref ob) = self.observer {
            ob.on_malformed_line(*line, detail);
        }
    }

    fn complete(&mut self) -> StreamEvent {
        self.finished = true;
        self.stats.duration_ms = self.elapsed_ms();
        info!(
            "Analysis complete: {} dishes, {} malformed lines dropped, {}ms",
            self.stats.dishes, self.stats.malformed_lines, self.stats.duration_ms
        );
        if let Some(ref ob) = self.observer {
            ob.on_analysis_complete(&self.stats);
        }
        StreamEvent::Done
    }

    fn fail(&mut self, err: DishcoveryError) -> StreamEvent {
        self.finished = true;
        self.stats.duration_ms = self.elapsed_ms();
        let message = err.to_string();
        warn!("Analysis failed after {}ms: {}", self.stats.duration_ms, message);
        if let Some(ref ob) = self.observer {
            ob.on_analysis_error(&message, &self.stats);
        }
        StreamEvent::error(message)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                "Event stream dropped after {} events ({}ms); upstream call cancelled",
                self.events,
                self.elapsed_ms()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{ScriptStep, ScriptedImageGenerator, ScriptedStreamer};
    use std::io::Cursor;
    use std::sync::Arc;

    fn png_upload() -> UploadedImage {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 30, 30]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        UploadedImage::new(buf.into_inner(), Some("image/png".into()))
    }

    fn services(stage1: ScriptedStreamer, stage2: ScriptedStreamer) -> Services {
        Services::new(
            Arc::new(stage1),
            Arc::new(stage2),
            Arc::new(ScriptedImageGenerator::succeeding("https://img.test")),
        )
    }

    async fn collect(services: &Services, config: &AnalysisConfig) -> Vec<StreamEvent> {
        analyze_menu_stream(png_upload(), services, config)
            .await
            .unwrap()
            .collect()
            .await
    }

    #[tokio::test]
    async fn blank_transcript_stops_before_stage_two() {
        let stage2 = Arc::new(ScriptedStreamer::fragments(["{}\n"]));
        let svc = Services::new(
            Arc::new(ScriptedStreamer::fragments(["  ", "\n"])),
            stage2.clone(),
            Arc::new(ScriptedImageGenerator::succeeding("x")),
        );
        let events = collect(&svc, &AnalysisConfig::default()).await;
        let kinds: Vec<_> = events.iter().map(StreamEvent::kind).collect();
        assert_eq!(kinds, vec!["markdown", "markdown", "markdown_done", "error"]);
        assert_eq!(stage2.calls(), 0);
    }

    #[tokio::test]
    async fn empty_fragments_are_not_forwarded() {
        let svc = services(
            ScriptedStreamer::fragments(["", "# Menu", ""]),
            ScriptedStreamer::fragments(Vec::<String>::new()),
        );
        let events = collect(&svc, &AnalysisConfig::default()).await;
        let kinds: Vec<_> = events.iter().map(StreamEvent::kind).collect();
        assert_eq!(kinds, vec!["markdown", "markdown_done", "done"]);
    }

    #[tokio::test]
    async fn stalled_fragment_times_out() {
        let svc = services(
            ScriptedStreamer::new(vec![
                ScriptStep::Fragment("# Menu".into()),
                ScriptStep::Stall,
            ]),
            ScriptedStreamer::fragments(Vec::<String>::new()),
        );
        let config = AnalysisConfig::builder()
            .fragment_timeout_ms(100)
            .build()
            .unwrap();
        let events = collect(&svc, &config).await;
        assert_eq!(events.len(), 2);
        match &events[1] {
            StreamEvent::Error { error } => assert!(error.contains("timed out"), "{error}"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn observer_sees_malformed_lines() {
        use crate::progress::AnalysisObserver;
        use std::sync::Mutex;

        #[derive(Default)]
        struct Recorder {
            malformed: Mutex<Vec<usize>>,
            stats: Mutex<Option<AnalysisStats>>,
        }
        impl AnalysisObserver for Recorder {
            fn on_malformed_line(&self, line: usize, _detail: &str) {
                self.malformed.lock().unwrap().push(line);
            }
            fn on_analysis_complete(&self, stats: &AnalysisStats) {
                *self.stats.lock().unwrap() = Some(*stats);
            }
        }

        let recorder = Arc::new(Recorder::default());
        let config = AnalysisConfig::builder()
            .observer(recorder.clone())
            .build()
            .unwrap();
        let svc = services(
            ScriptedStreamer::fragments(["## Mains\n- Steak"]),
            ScriptedStreamer::fragments([
                "{\"name_en\":\"Steak\"}\n",
                "not json\n",
                "{\"name_en\":\"Fish\"}",
            ]),
        );
        let events = collect(&svc, &config).await;
        let dishes = events.iter().filter(|e| e.kind() == "dish").count();
        assert_eq!(dishes, 2);
        assert_eq!(*recorder.malformed.lock().unwrap(), vec![2]);
        let stats = recorder.stats.lock().unwrap().unwrap();
        assert_eq!(stats.dishes, 2);
        assert_eq!(stats.malformed_lines, 1);
        assert_eq!(stats.markdown_fragments, 1);
    }
}
