//! CLI binary for pdf-digest.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `DigestConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_digest::graph::{CacheMode, StageStatus};
use pdf_digest::{digest, inspect, DigestConfig, WorkflowObserver};
use std::io;
use std::path::PathBuf;
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Stage progress using indicatif ───────────────────────────────────────────

/// Renders a stage progress bar and one log line per finished stage.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:30.green/238}] {pos}/{len} stages  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Digesting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl WorkflowObserver for CliObserver {
    fn on_run_start(&self, total_stages: usize) {
        self.bar.set_length(total_stages as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Running {total_stages} stages…"))
        ));
    }

    fn on_stage_start(&self, stage: &str) {
        self.bar.set_message(stage.to_string());
    }

    fn on_stage_complete(&self, stage: &str, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<10}  {}",
            green("✓"),
            stage,
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_stage_replayed(&self, stage: &str) {
        self.bar
            .println(format!("  {} {:<10}  {}", cyan("↺"), stage, dim("from cache")));
        self.bar.inc(1);
    }

    fn on_stage_degraded(&self, stage: &str, error: &str) {
        self.bar.println(format!(
            "  {} {:<10}  {}",
            yellow("⚠"),
            stage,
            yellow(&truncate(error, 80)),
        ));
        self.bar.inc(1);
    }

    fn on_stage_failed(&self, stage: &str, error: &str) {
        self.bar.println(format!(
            "  {} {:<10}  {}",
            red("✗"),
            stage,
            red(&truncate(error, 80)),
        ));
        self.bar.abandon();
    }

    fn on_run_complete(&self, total_stages: usize, degraded: usize) {
        self.bar.finish_and_clear();
        if degraded == 0 {
            eprintln!("{} {} stages completed", green("✔"), bold(&total_stages.to_string()));
        } else {
            eprintln!(
                "{} {} stages completed ({} degraded)",
                yellow("⚠"),
                bold(&total_stages.to_string()),
                yellow(&degraded.to_string()),
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\u{2026}", &s[..idx]),
        None => s.to_string(),
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF report next to the current directory (report.pdf)
  pdfdigest paper.pdf

  # Markdown report
  pdfdigest paper.pdf -o notes/attention.md

  # From URL, with a custom title
  pdfdigest https://arxiv.org/pdf/1706.03762 --title "Attention Is All You Need"

  # Record stage outputs, then re-render without calling the LLM again
  pdfdigest paper.pdf --cache-dir temp --cache record
  pdfdigest paper.pdf --cache-dir temp --cache replay -o report.md

  # Replay only the expensive stages
  pdfdigest paper.pdf --cache-dir temp --cache-stage split=replay --cache-stage summarize=replay

  # Long papers: split in overlapping chunks
  pdfdigest book.pdf --chunk-chars 7000 --chunk-overlap 2000

  # Custom prompts (split.txt, summary.txt, glossary.txt, insights.txt, questions.txt)
  pdfdigest paper.pdf --prompt-dir prompts/

  # Inspect PDF metadata (no API key needed)
  pdfdigest --inspect-only paper.pdf

STAGES:
  load → split → summarize → {glossary, insights, questions} → export
  load and split abort the run on failure; the others degrade to placeholder
  output unless --strict is given.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to the pdfium shared library
"#;

/// Digest PDF papers into reading reports with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pdfdigest",
    version,
    about = "Digest PDF papers into reading reports with an LLM",
    long_about = "Split a PDF paper into sections, summarize each one, and extract a glossary, \
key insights and review questions into a Markdown or PDF report. Supports OpenAI, Anthropic, \
Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Report path. `.md` writes Markdown, anything else a PDF.
    #[arg(short, long, env = "PDFDIGEST_OUTPUT", default_value = "report.pdf")]
    output: PathBuf,

    /// Report title. Default: the input file name without extension.
    #[arg(long, env = "PDFDIGEST_TITLE")]
    title: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Concurrent LLM calls per stage.
    #[arg(short, long, env = "PDFDIGEST_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Directory with prompt template overrides.
    #[arg(long, env = "PDFDIGEST_PROMPT_DIR")]
    prompt_dir: Option<PathBuf>,

    /// Directory for recorded stage outputs.
    #[arg(long, env = "PDFDIGEST_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Cache mode for every stage.
    #[arg(long, env = "PDFDIGEST_CACHE", value_enum, default_value = "off")]
    cache: CacheArg,

    /// Per-stage cache mode, e.g. `summarize=replay`. Repeatable.
    #[arg(long = "cache-stage", value_name = "STAGE=MODE", value_parser = parse_stage_cache)]
    cache_stages: Vec<(String, CacheMode)>,

    /// Abort the run on any stage failure instead of degrading.
    #[arg(long, env = "PDFDIGEST_STRICT")]
    strict: bool,

    /// Split in overlapping chunks of this many characters.
    #[arg(long, env = "PDFDIGEST_CHUNK_CHARS")]
    chunk_chars: Option<usize>,

    /// Characters shared by consecutive chunks.
    #[arg(long, env = "PDFDIGEST_CHUNK_OVERLAP", default_value_t = 2000)]
    chunk_overlap: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFDIGEST_PASSWORD")]
    password: Option<String>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "PDFDIGEST_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDFDIGEST_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Retries per LLM call.
    #[arg(long, env = "PDFDIGEST_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Print the run result as JSON on stdout.
    #[arg(long, env = "PDFDIGEST_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFDIGEST_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no LLM calls.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFDIGEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFDIGEST_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDFDIGEST_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDFDIGEST_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CacheArg {
    Off,
    Record,
    Replay,
}

impl From<CacheArg> for CacheMode {
    fn from(v: CacheArg) -> Self {
        match v {
            CacheArg::Off => CacheMode::Disabled,
            CacheArg::Record => CacheMode::Record,
            CacheArg::Replay => CacheMode::Replay,
        }
    }
}

/// Parse `stage=mode` for `--cache-stage`.
fn parse_stage_cache(s: &str) -> Result<(String, CacheMode), String> {
    let (stage, mode) = s
        .split_once('=')
        .ok_or_else(|| format!("expected STAGE=MODE, got '{s}'"))?;
    let mode = match mode.trim().to_lowercase().as_str() {
        "off" | "disabled" => CacheMode::Disabled,
        "record" => CacheMode::Record,
        "replay" => CacheMode::Replay,
        other => return Err(format!("unknown cache mode '{other}' (off, record, replay)")),
    };
    Ok((stage.trim().to_string(), mode))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let mut builder = DigestConfig::builder().download_timeout_secs(cli.download_timeout);
        if let Some(ref password) = cli.password {
            builder = builder.password(password);
        }
        let config = builder.build().context("Invalid configuration")?;
        let meta = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            println!("File:         {}", cli.input);
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            if let Some(ref s) = meta.subject {
                println!("Subject:      {}", s);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(());
    }

    // ── Build config and run ─────────────────────────────────────────────
    let config = build_config(&cli, show_progress)?;
    let output = digest(&cli.input, &config).await.context("Digest failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
        return Ok(());
    }

    if !cli.quiet {
        if !show_progress {
            for record in &output.report.stages {
                let status = match &record.status {
                    StageStatus::Completed => "completed".to_string(),
                    StageStatus::Replayed => "replayed".to_string(),
                    StageStatus::Degraded { error } => format!("degraded: {error}"),
                };
                eprintln!("  {:<10} {:>6}ms  {}", record.stage, record.duration_ms, status);
            }
        }
        match &output.report_path {
            Some(path) => eprintln!(
                "{}  report  →  {}",
                green("✔"),
                bold(&path.display().to_string())
            ),
            None => eprintln!("{}  no report was written", red("✘")),
        }
        let state = &output.state;
        eprintln!(
            "   {} sections  /  {} glossary terms  /  {} insights  /  {} questions",
            state.summaries.as_ref().map_or(0, Vec::len),
            state.glossary.as_ref().map_or(0, Vec::len),
            state.insights.as_ref().map_or(0, Vec::len),
            state.questions.as_ref().map_or(0, Vec::len),
        );
        if let Some(usage) = output.usage {
            eprintln!(
                "   {} calls  /  {} tokens in  /  {} tokens out  /  {}ms total",
                dim(&usage.calls.to_string()),
                dim(&usage.input_tokens.to_string()),
                dim(&usage.output_tokens.to_string()),
                output.report.total_duration_ms,
            );
        }
    }

    Ok(())
}

/// Map CLI args to `DigestConfig`.
fn build_config(cli: &Cli, show_progress: bool) -> Result<DigestConfig> {
    let mut builder = DigestConfig::builder()
        .output_path(&cli.output)
        .concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .split_chunk_overlap(cli.chunk_overlap)
        .cache_mode(cli.cache.into());

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref title) = cli.title {
        builder = builder.title(title);
    }
    if let Some(ref dir) = cli.prompt_dir {
        builder = builder.prompt_dir(dir);
    }
    if let Some(ref dir) = cli.cache_dir {
        builder = builder.cache_dir(dir);
    }
    for (stage, mode) in &cli.cache_stages {
        builder = builder.stage_cache_mode(stage, *mode);
    }
    if let Some(chars) = cli.chunk_chars {
        builder = builder.split_chunk_chars(chars);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if cli.strict {
        builder = builder.strict();
    }
    if show_progress {
        builder = builder.observer(CliObserver::new() as Arc<dyn WorkflowObserver>);
    }

    builder.build().context("Invalid configuration")
}
