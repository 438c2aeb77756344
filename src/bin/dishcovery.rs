//! CLI binary for dishcovery.
//!
//! A thin shim over the library crate: maps flags onto `AnalysisConfig`,
//! then either serves the HTTP API, analyses one photo (locally or through
//! a running server) or generates one dish image.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dishcovery::transport::{encode_frame, encode_payload};
use dishcovery::{
    analyze_menu_stream, generate_dish_image, serve, AnalysisConfig, AnalysisObserver,
    AnalysisStats, AppState, ConsumerState, DishRecord, DishcoveryClient, Services,
    StreamConsumer, StreamEvent, UploadedImage,
};
use futures::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Spinner that follows the request through both stages.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Checking image…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl AnalysisObserver for CliObserver {
    fn on_analysis_start(&self, image_bytes: usize) {
        self.bar.set_prefix("Transcribing");
        self.bar
            .set_message(format!("{:.1} KiB image", image_bytes as f64 / 1024.0));
    }

    fn on_transcript_complete(&self, markdown_chars: usize) {
        self.bar.set_prefix("Structuring");
        self.bar
            .set_message(format!("{markdown_chars} chars of menu text"));
    }

    fn on_dish(&self, index: usize, dish: &DishRecord) {
        self.bar
            .set_message(format!("{} dishes, last: {}", index + 1, dish.name_en));
    }

    fn on_malformed_line(&self, line: usize, detail: &str) {
        self.bar.println(format!(
            "  {} skipped malformed line {}  {}",
            yellow("⚠"),
            line,
            dim(detail)
        ));
    }

    fn on_analysis_complete(&self, stats: &AnalysisStats) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} dishes from {} chars  {}",
            green("✔"),
            bold(&stats.dishes.to_string()),
            stats.markdown_chars,
            dim(&format!(
                "{} malformed lines dropped, {:.1}s",
                stats.malformed_lines,
                stats.duration_ms as f64 / 1000.0
            )),
        );
    }

    fn on_analysis_error(&self, message: &str, _stats: &AnalysisStats) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), message);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP API
  dishcovery serve --addr 0.0.0.0:8000

  # Analyse a photo locally, watching the transcript appear
  dishcovery analyze menu.jpg

  # One JSON event per line, for piping into jq
  dishcovery analyze --format ndjson menu.jpg | jq 'select(.type=="dish").dish.name_en'

  # Go through a running server instead of calling the model directly
  dishcovery analyze --server http://127.0.0.1:8000 menu.jpg

  # Generate one dish image
  dishcovery image "a bowl of beef noodle soup with scallions"

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY           OpenAI (or compatible) API key; also used for images
  OPENAI_BASE_URL          OpenAI-compatible endpoint
  DISHCOVERY_PROVIDER      openai (default), anthropic, gemini, ollama, …
  ANTHROPIC_API_KEY        Needed when --provider anthropic
  GEMINI_API_KEY           Needed when --provider gemini
  RUST_LOG                 Overrides the log filter
"#;

/// Stream structured dishes out of a menu photo.
#[derive(Parser, Debug)]
#[command(
    name = "dishcovery",
    version,
    about = "Stream structured, bilingual dish records out of a menu photo",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Provider for both stages: openai, anthropic, gemini, ollama.
    #[arg(long, global = true, env = "DISHCOVERY_PROVIDER")]
    provider: Option<String>,

    /// Vision model for Stage 1.
    #[arg(long, global = true, env = "DISHCOVERY_EXTRACTION_MODEL")]
    extraction_model: Option<String>,

    /// Text model for Stage 2.
    #[arg(long, global = true, env = "DISHCOVERY_STRUCTURING_MODEL")]
    structuring_model: Option<String>,

    /// Image-generation model.
    #[arg(long, global = true, env = "DISHCOVERY_IMAGE_MODEL")]
    image_model: Option<String>,

    /// API key for the OpenAI-compatible endpoint.
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint.
    #[arg(long, global = true, env = "OPENAI_BASE_URL")]
    api_base_url: Option<String>,

    /// Path to a text file with a custom Stage 1 system prompt.
    #[arg(long, global = true, env = "DISHCOVERY_EXTRACTION_PROMPT")]
    extraction_prompt: Option<PathBuf>,

    /// Path to a text file with a custom Stage 2 system prompt.
    #[arg(long, global = true, env = "DISHCOVERY_STRUCTURING_PROMPT")]
    structuring_prompt: Option<PathBuf>,

    /// Max output tokens per stage.
    #[arg(long, global = true, env = "DISHCOVERY_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "DISHCOVERY_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Timeout for opening an upstream call or generating an image, seconds.
    #[arg(long, global = true, env = "DISHCOVERY_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Longest silence allowed between two upstream fragments, milliseconds.
    #[arg(long, global = true, env = "DISHCOVERY_FRAGMENT_TIMEOUT", default_value_t = 60_000)]
    fragment_timeout: u64,

    /// Maximum upload size in bytes.
    #[arg(long, global = true, env = "DISHCOVERY_MAX_UPLOAD_BYTES")]
    max_upload_bytes: Option<usize>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DISHCOVERY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DISHCOVERY_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "DISHCOVERY_ADDR", default_value = "127.0.0.1:8000")]
        addr: String,
    },
    /// Analyse one menu photo.
    Analyze {
        /// JPEG, PNG or WebP file.
        image: PathBuf,

        /// Output format.
        #[arg(long, value_enum, default_value = "pretty")]
        format: OutputFormat,

        /// Send the photo to a running dishcovery server instead.
        #[arg(long, env = "DISHCOVERY_SERVER")]
        server: Option<String>,

        /// Disable the spinner.
        #[arg(long)]
        no_progress: bool,
    },
    /// Generate an image for one dish and print its URL.
    Image {
        /// The dish's image prompt.
        prompt: String,

        /// Ask a running dishcovery server instead.
        #[arg(long, env = "DISHCOVERY_SERVER")]
        server: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Transcript on stderr, dishes on stdout.
    Pretty,
    /// One event JSON per line.
    Ndjson,
    /// The exact SSE frames the server would send.
    Sse,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters in pretty mode, so
    // INFO library logs are reserved for the server and --verbose.
    let spinner_mode = matches!(
        cli.command,
        Command::Analyze { format: OutputFormat::Pretty, no_progress: false, .. }
    ) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || spinner_mode {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve { ref addr } => {
            let config = build_config(&cli, None).await?;
            let services = Services::from_config(&config).context("Failed to set up providers")?;
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;
            serve(listener, AppState::new(services, config), shutdown_signal())
                .await
                .context("Server error")?;
        }
        Command::Analyze {
            ref image,
            format,
            ref server,
            ..
        } => {
            let upload = read_upload(image).await?;
            match server {
                Some(url) => analyze_remote(url, upload, format, cli.quiet).await?,
                None => {
                    let observer = spinner_mode.then(CliObserver::new);
                    let config = build_config(&cli, observer.clone()).await?;
                    let services =
                        Services::from_config(&config).context("Failed to set up providers")?;
                    let events = match analyze_menu_stream(upload, &services, &config).await {
                        Ok(events) => events,
                        Err(e) => {
                            if let Some(ob) = observer {
                                ob.bar.finish_and_clear();
                            }
                            return Err(e).context("Image rejected");
                        }
                    };
                    let bar = observer.as_ref().map(|o| o.bar.clone());
                    render(events, format, bar, cli.quiet).await?;
                }
            }
        }
        Command::Image {
            ref prompt,
            ref server,
        } => {
            let url = match server {
                Some(base) => DishcoveryClient::new(base.as_str())?
                    .generate_image(prompt)
                    .await
                    .context("Image generation failed")?,
                None => {
                    let config = build_config(&cli, None).await?;
                    let services =
                        Services::from_config(&config).context("Failed to set up providers")?;
                    generate_dish_image(prompt, &services, &config)
                        .await
                        .context("Image generation failed")?
                }
            };
            println!("{url}");
        }
    }

    Ok(())
}

/// Print events as they arrive. Returns an error if the stream ended with one.
async fn render<S>(
    mut events: S,
    format: OutputFormat,
    bar: Option<ProgressBar>,
    quiet: bool,
) -> Result<()>
where
    S: Stream<Item = StreamEvent> + Unpin,
{
    let mut dishes = 0usize;
    let mut failure = None;

    while let Some(event) = events.next().await {
        match format {
            OutputFormat::Ndjson => println!("{}", encode_payload(&event)),
            OutputFormat::Sse => print!("{}", encode_frame(&event)),
            OutputFormat::Pretty => match event {
                StreamEvent::Markdown { ref content } if !quiet => {
                    let text = dim(content);
                    match bar {
                        Some(ref b) => b.suspend(|| eprint!("{text}")),
                        None => eprint!("{text}"),
                    }
                }
                StreamEvent::MarkdownDone if !quiet => match bar {
                    Some(ref b) => b.suspend(|| eprintln!()),
                    None => eprintln!(),
                },
                StreamEvent::Dish { ref dish } => {
                    dishes += 1;
                    let block = format_dish(dishes, dish);
                    match bar {
                        Some(ref b) => b.suspend(|| println!("{block}")),
                        None => println!("{block}"),
                    }
                }
                _ => {}
            },
        }
        if let StreamEvent::Error { error } = event {
            failure = Some(error);
        }
    }

    if let Some(error) = failure {
        bail!("Analysis failed: {error}");
    }
    if format == OutputFormat::Pretty && bar.is_none() && !quiet {
        eprintln!("{} {} dishes", green("✔"), bold(&dishes.to_string()));
    }
    Ok(())
}

fn format_dish(n: usize, dish: &DishRecord) -> String {
    let mut out = format!(
        "{:>3}. {}  {}",
        n,
        bold(&dish.name_en),
        cyan(&dish.name_zh)
    );
    if !dish.section.is_empty() {
        out.push_str(&format!("  {}", dim(&format!("[{}]", dish.section))));
    }
    for line in [&dish.ingredients_en, &dish.ingredients_zh, &dish.description_zh] {
        if !line.is_empty() {
            out.push_str(&format!("\n     {line}"));
        }
    }
    out
}

/// Run the upload through a server and print the reconstructed result.
async fn analyze_remote(
    base_url: &str,
    upload: UploadedImage,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let client = DishcoveryClient::new(base_url)?;
    let mut consumer = StreamConsumer::new();
    let state = client.analyze_menu(&mut consumer, upload).await;

    let mut events = Vec::new();
    if !consumer.markdown().is_empty() {
        events.push(StreamEvent::markdown(consumer.markdown()));
    }
    if consumer.transcript().is_some() {
        events.push(StreamEvent::MarkdownDone);
    }
    events.extend(consumer.dishes().iter().map(|d| StreamEvent::Dish {
        dish: d.dish.clone(),
    }));
    events.push(match state {
        ConsumerState::Completed => StreamEvent::Done,
        _ => StreamEvent::error(consumer.error().unwrap_or("analysis did not complete")),
    });

    render(futures::stream::iter(events), format, None, quiet).await
}

async fn read_upload(path: &Path) -> Result<UploadedImage> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut upload = UploadedImage::new(bytes, UploadedImage::content_type_for_path(path));
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        upload = upload.with_file_name(name);
    }
    Ok(upload)
}

/// Map CLI args to `AnalysisConfig`.
async fn build_config(
    cli: &Cli,
    observer: Option<Arc<CliObserver>>,
) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .fragment_timeout_ms(cli.fragment_timeout);

    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p);
    }
    if let Some(ref m) = cli.extraction_model {
        builder = builder.extraction_model(m);
    }
    if let Some(ref m) = cli.structuring_model {
        builder = builder.structuring_model(m);
    }
    if let Some(ref m) = cli.image_model {
        builder = builder.image_model(m);
    }
    if let Some(ref k) = cli.api_key {
        builder = builder.api_key(k);
    }
    if let Some(ref u) = cli.api_base_url {
        builder = builder.api_base_url(u);
    }
    if let Some(n) = cli.max_upload_bytes {
        builder = builder.max_upload_bytes(n);
    }
    if let Some(ref path) = cli.extraction_prompt {
        builder = builder.extraction_prompt(read_prompt(path).await?);
    }
    if let Some(ref path) = cli.structuring_prompt {
        builder = builder.structuring_prompt(read_prompt(path).await?);
    }
    if let Some(ob) = observer {
        builder = builder.observer(ob);
    }

    builder.build().context("Invalid configuration")
}

async fn read_prompt(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read prompt from {:?}", path))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("{} shutting down", dim("·"));
    }
}
