//! Integration tests for the two-stage pipeline.
//!
//! Every upstream is a scripted fake, so these run offline and
//! deterministically:
//!   cargo test --test pipeline

use dishcovery::upstream::{ScriptStep, ScriptedImageGenerator, ScriptedStreamer};
use dishcovery::{
    analyze_menu_stream, AnalysisConfig, ConsumerState, DishcoveryError, InvalidImage, Services,
    StreamConsumer, StreamEvent, UploadedImage, UpstreamError,
};
use futures::StreamExt;
use std::io::Cursor;
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// `RUST_LOG=dishcovery=debug cargo test --test pipeline -- --nocapture`
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn menu_png() -> UploadedImage {
    let img = image::RgbImage::from_fn(64, 48, |x, y| image::Rgb([(x * 4) as u8, (y * 5) as u8, 90]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    UploadedImage::new(buf.into_inner(), Some("image/png".into())).with_file_name("menu.png")
}

fn dish_line(section: &str, en: &str, zh: &str) -> String {
    format!(
        "{{\"section\":\"{section}\",\"name_en\":\"{en}\",\"name_zh\":\"{zh}\",\
         \"ingredients_en\":\"\",\"ingredients_zh\":\"\",\"description_zh\":\"\",\
         \"image_prompt\":\"{en}, plated\"}}\n"
    )
}

struct Harness {
    stage1: Arc<ScriptedStreamer>,
    stage2: Arc<ScriptedStreamer>,
    services: Services,
}

fn harness(stage1: ScriptedStreamer, stage2: ScriptedStreamer) -> Harness {
    let stage1 = Arc::new(stage1);
    let stage2 = Arc::new(stage2);
    let services = Services::new(
        stage1.clone(),
        stage2.clone(),
        Arc::new(ScriptedImageGenerator::succeeding("https://img.test")),
    );
    Harness {
        stage1,
        stage2,
        services,
    }
}

async fn run(h: &Harness, config: &AnalysisConfig) -> Vec<StreamEvent> {
    init_tracing();
    analyze_menu_stream(menu_png(), &h.services, config)
        .await
        .expect("upload accepted")
        .collect()
        .await
}

fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::kind).collect()
}

/// Check `markdown* markdown_done dish* (done|error)` or `markdown* error`.
fn assert_grammar(events: &[StreamEvent]) {
    let terminal = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal, 1, "exactly one terminal event: {:?}", kinds(events));
    assert!(events.last().unwrap().is_terminal(), "terminal event must be last");

    let mut phase = 0; // 0 markdown, 1 dishes
    for e in &events[..events.len() - 1] {
        match e {
            StreamEvent::Markdown { .. } => assert_eq!(phase, 0, "markdown after markdown_done"),
            StreamEvent::MarkdownDone => {
                assert_eq!(phase, 0, "second markdown_done");
                phase = 1;
            }
            StreamEvent::Dish { .. } => assert_eq!(phase, 1, "dish before markdown_done"),
            StreamEvent::Done | StreamEvent::Error { .. } => unreachable!(),
        }
    }
    if matches!(events.last(), Some(StreamEvent::Done)) {
        assert_eq!(phase, 1, "done without markdown_done");
    }
}

fn consume(events: &[StreamEvent]) -> StreamConsumer {
    let mut consumer = StreamConsumer::new();
    let ticket = consumer.begin_upload();
    for e in events {
        consumer.apply_event(ticket, e.clone());
    }
    consumer.finish(ticket);
    consumer
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scenario_a_invalid_first_line_is_dropped() {
    let stage2_lines = [
        "{\"section\": \"Salads\", \"name_en\": \"Caesar\n".to_string(),
        dish_line("Salads", "Caesar Salad", "凯撒沙拉"),
        dish_line("Salads", "Chop Salad", "什锦沙拉"),
        dish_line("Pasta", "Carbonara", "培根蛋酱意面"),
        dish_line("Pasta", "Bolognese", "肉酱意面"),
        dish_line("Pasta", "Pesto Gnocchi", "青酱团子"),
    ];
    let h = harness(
        ScriptedStreamer::fragments(["## Salads\n- Caesar Salad\n- Chop Salad\n", "## Pasta\n- Carbonara\n- Bolognese\n- Pesto Gnocchi\n"]),
        ScriptedStreamer::fragments(stage2_lines),
    );
    let events = run(&h, &AnalysisConfig::default()).await;
    assert_grammar(&events);
    assert_eq!(
        kinds(&events),
        vec!["markdown", "markdown", "markdown_done", "dish", "dish", "dish", "dish", "dish", "done"]
    );

    let names: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Dish { dish } => Some(dish.name_en.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        names,
        vec!["Caesar Salad", "Chop Salad", "Carbonara", "Bolognese", "Pesto Gnocchi"]
    );

    let consumer = consume(&events);
    assert_eq!(consumer.state(), ConsumerState::Completed);
    assert_eq!(consumer.dishes().len(), 5);
    assert_eq!(consumer.dishes()[2].dish.section, "Pasta");
}

#[tokio::test]
async fn test_scenario_b_stage1_timeout_after_three_fragments() {
    let h = harness(
        ScriptedStreamer::new(vec![
            ScriptStep::Fragment("# Trattoria\n".into()),
            ScriptStep::Fragment("## Antipasti\n".into()),
            ScriptStep::Fragment("- Bruschetta".into()),
            ScriptStep::Stall,
        ]),
        ScriptedStreamer::fragments([dish_line("X", "Never", "")]),
    );
    let config = AnalysisConfig::builder()
        .fragment_timeout_ms(150)
        .build()
        .unwrap();
    let events = run(&h, &config).await;
    assert_grammar(&events);
    assert_eq!(kinds(&events), vec!["markdown", "markdown", "markdown", "error"]);
    assert_eq!(h.stage2.calls(), 0, "Stage 2 must not start after a Stage 1 failure");

    let consumer = consume(&events);
    assert_eq!(consumer.state(), ConsumerState::Error);
    assert_eq!(consumer.markdown(), "# Trattoria\n## Antipasti\n- Bruschetta");
    assert!(consumer.dishes().is_empty());
    assert!(consumer.error().unwrap().contains("timed out"));
}

// ── Grammar and stage boundaries ─────────────────────────────────────────────

#[tokio::test]
async fn test_stage1_open_failure_is_single_error() {
    let h = harness(
        ScriptedStreamer::failing_open(UpstreamError::Auth {
            status: 401,
            detail: "bad key".into(),
        }),
        ScriptedStreamer::fragments(Vec::<String>::new()),
    );
    let events = run(&h, &AnalysisConfig::default()).await;
    assert_eq!(kinds(&events), vec!["error"]);
    assert_eq!(h.stage2.calls(), 0);
}

#[tokio::test]
async fn test_stage2_failure_keeps_emitted_dishes() {
    let h = harness(
        ScriptedStreamer::fragments(["## Soups\n- Pho\n- Ramen"]),
        ScriptedStreamer::new(vec![
            ScriptStep::Fragment(dish_line("Soups", "Pho", "河粉")),
            ScriptStep::Fail(UpstreamError::Network("connection reset".into())),
        ]),
    );
    let events = run(&h, &AnalysisConfig::default()).await;
    assert_grammar(&events);
    assert_eq!(kinds(&events), vec!["markdown", "markdown_done", "dish", "error"]);
    match events.last().unwrap() {
        StreamEvent::Error { error } => assert!(error.contains("connection reset")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stage2_receives_exactly_the_frozen_transcript() {
    let fragments = ["# Café\n", "## 甜点\n", "- Crème brûlée  $9\n", "* 10% service"];
    let h = harness(
        ScriptedStreamer::fragments(fragments),
        ScriptedStreamer::fragments(Vec::<String>::new()),
    );
    let events = run(&h, &AnalysisConfig::default()).await;
    assert_eq!(events.last(), Some(&StreamEvent::Done));

    let transcript: String = fragments.concat();
    let requests = h.stage2.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].image.is_none());
    assert!(requests[0].user.ends_with(&transcript));

    let stage1 = h.stage1.requests();
    assert!(stage1[0].image.is_some(), "Stage 1 must carry the photo");
    assert_eq!(stage1[0].image.as_ref().unwrap().mime_type, "image/jpeg");
}

#[tokio::test]
async fn test_blank_transcript_is_markdown_done_then_error() {
    let h = harness(
        ScriptedStreamer::fragments(["\n\n", "   "]),
        ScriptedStreamer::fragments([dish_line("X", "Never", "")]),
    );
    let events = run(&h, &AnalysisConfig::default()).await;
    assert_grammar(&events);
    assert_eq!(kinds(&events), vec!["markdown", "markdown", "markdown_done", "error"]);
    assert_eq!(h.stage2.calls(), 0);
}

#[tokio::test]
async fn test_one_malformed_line_anywhere_costs_one_dish() {
    const N: usize = 4;
    for bad_at in 0..=N {
        let mut lines: Vec<String> = (0..N)
            .map(|i| dish_line("S", &format!("Dish {i}"), ""))
            .collect();
        lines.insert(bad_at, "{\"name_en\": oops}\n".to_string());
        let h = harness(
            ScriptedStreamer::fragments(["- menu"]),
            ScriptedStreamer::fragments([lines.concat()]),
        );
        let events = run(&h, &AnalysisConfig::default()).await;
        assert_grammar(&events);
        let dishes = events.iter().filter(|e| e.kind() == "dish").count();
        assert_eq!(dishes, N, "bad line at {bad_at}");
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }
}

#[tokio::test]
async fn test_trailing_record_without_newline_is_emitted() {
    let last = dish_line("Desserts", "Tiramisu", "提拉米苏");
    let h = harness(
        ScriptedStreamer::fragments(["## Desserts\n- Tiramisu"]),
        ScriptedStreamer::fragments([last.trim_end().to_string()]),
    );
    let events = run(&h, &AnalysisConfig::default()).await;
    assert_eq!(kinds(&events), vec!["markdown", "markdown_done", "dish", "done"]);
}

#[tokio::test]
async fn test_dish_records_split_across_many_fragments() {
    let all = [
        dish_line("Mains", "Kung Pao Chicken", "宫保鸡丁"),
        dish_line("Mains", "Mapo Tofu", "麻婆豆腐"),
    ]
    .concat();
    // Fragment every 7 characters, respecting char boundaries.
    let chars: Vec<char> = all.chars().collect();
    let pieces: Vec<String> = chars.chunks(7).map(|c| c.iter().collect()).collect();
    let h = harness(
        ScriptedStreamer::fragments(["- menu"]),
        ScriptedStreamer::fragments(pieces),
    );
    let events = run(&h, &AnalysisConfig::default()).await;
    let names: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Dish { dish } => Some(dish.name_zh.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["宫保鸡丁", "麻婆豆腐"]);
}

// ── Upload boundary ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_eleven_mib_upload_is_rejected_without_upstream_calls() {
    let h = harness(
        ScriptedStreamer::fragments(["x"]),
        ScriptedStreamer::fragments(["x"]),
    );
    let mut bytes = menu_png().bytes;
    bytes.resize(11 * 1024 * 1024, 0);
    let upload = UploadedImage::new(bytes, Some("image/png".into()));

    let result = analyze_menu_stream(upload, &h.services, &AnalysisConfig::default()).await;
    match result {
        Err(DishcoveryError::InvalidImage(InvalidImage::TooLarge { size, limit })) => {
            assert_eq!(size, 11 * 1024 * 1024);
            assert_eq!(limit, 10 * 1024 * 1024);
        }
        Err(other) => panic!("expected TooLarge, got {other:?}"),
        Ok(_) => panic!("expected TooLarge, got a stream"),
    }
    assert_eq!(h.stage1.calls(), 0);
    assert_eq!(h.stage2.calls(), 0);
}

#[tokio::test]
async fn test_non_image_upload_is_rejected() {
    let h = harness(
        ScriptedStreamer::fragments(["x"]),
        ScriptedStreamer::fragments(["x"]),
    );
    let upload = UploadedImage::new(b"%PDF-1.7 not a photo".to_vec(), None);
    let result = analyze_menu_stream(upload, &h.services, &AnalysisConfig::default()).await;
    assert!(matches!(
        result,
        Err(DishcoveryError::InvalidImage(InvalidImage::UnsupportedFormat { .. }))
    ));
    assert_eq!(h.stage1.calls(), 0);
}

// ── Disconnect ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dropping_the_stream_stops_the_pipeline() {
    let h = harness(
        ScriptedStreamer::fragments(["a", "b", "c"]),
        ScriptedStreamer::fragments([dish_line("S", "Never", "")]),
    );
    let mut events = analyze_menu_stream(menu_png(), &h.services, &AnalysisConfig::default())
        .await
        .unwrap();
    assert_eq!(events.next().await, Some(StreamEvent::markdown("a")));
    drop(events);
    assert_eq!(h.stage1.calls(), 1);
    assert_eq!(h.stage2.calls(), 0);
}
