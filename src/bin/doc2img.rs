//! CLI binary for edgequake-doc2img.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `GenerationConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doc2img::{
    generate, CharacterSheet, GenerationConfig, GenerationProgressCallback, ImageSettings,
    ProgressCallback, Resolution, TaskState, WordTokenizer,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished chunk. Chunks finish out
/// of order, so start times are tracked per chunk.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Illustrating");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, chunk: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&chunk))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_chunks: usize) {
        self.activate_bar(total_chunks);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Illustrating {total_chunks} chunks…"))
        ));
    }

    fn on_chunk_state(&self, chunk: usize, _total: usize, state: TaskState) {
        if state == TaskState::Prompting {
            if let Ok(mut m) = self.start_times.lock() {
                m.insert(chunk, Instant::now());
            }
        }
        self.bar
            .set_message(dim(&format!("chunk {chunk}: {}", state.to_string().to_lowercase())));
    }

    fn on_chunk_complete(&self, chunk: usize, total: usize, image_path: &Path) {
        let secs = self.elapsed_secs(chunk);
        let name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {:<28}  {}",
            green("✓"),
            chunk,
            total,
            name,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, chunk: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(chunk);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            red("✗"),
            chunk,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_chunks: usize, success_count: usize) {
        let failed = total_chunks.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} chunks illustrated successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} chunks illustrated  ({} failed)",
                if failed == total_chunks {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_chunks,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Illustrate a novel with a local Stable Diffusion WebUI
  doc2img novel.md --sd-checkpoint anything-v5.safetensors

  # Keep characters consistent across images
  doc2img novel.md --characters characters.json --sd-checkpoint anything-v5.safetensors

  # Smaller chunks, more parallelism, more patience
  doc2img novel.md -c 4 --token-per-chunk 600 --retry-times 5 --sd-checkpoint m.safetensors

  # Landscape and portrait only
  doc2img novel.md --resolution 768x512,512x768 --sd-checkpoint m.safetensors

  # Machine-readable run report
  doc2img novel.md --json --sd-checkpoint m.safetensors > report.json

OUTPUTS (next to the input file):
  <stem>_copy.<ext>      the illustrated copy; the input is never modified
  <stem>_prompts.txt     every chunk's directive, in chunk order
  <stem>_chunk_<i>.png   one image per successful chunk

CHARACTER FILE:
  A JSON object mapping each character to appearance keywords:
    { "Lin Wanrou": "long black hair, almond eyes, red scarf",
      "Zhang Hao":  "short hair, single eyelid, grey coat" }

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  DOC2IMG_SD_URL          Stable Diffusion WebUI base URL
  DOC2IMG_SD_CHECKPOINT   Stable Diffusion checkpoint name
"#;

/// Illustrate Markdown documents with AI-generated images.
#[derive(Parser, Debug)]
#[command(
    name = "doc2img",
    version,
    about = "Illustrate Markdown documents with LLM-written prompts and Stable Diffusion images",
    long_about = "Split a Markdown document into token-bounded chunks, let an LLM write a \
Stable Diffusion prompt for each chunk, render it through a Stable Diffusion WebUI txt2img \
endpoint and insert every image into a copy of the document after the passage it illustrates.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown document to illustrate.
    input: PathBuf,

    /// JSON file mapping character names to appearance keywords.
    #[arg(long, env = "DOC2IMG_CHARACTERS")]
    characters: Option<PathBuf>,

    /// Upper bound on tokens per chunk.
    #[arg(long, env = "DOC2IMG_TOKEN_PER_CHUNK", default_value_t = 1000)]
    token_per_chunk: usize,

    /// Count word segments instead of gpt-3.5-turbo BPE tokens.
    #[arg(long, env = "DOC2IMG_WORD_TOKENS")]
    word_tokens: bool,

    /// Number of chunks processed in parallel.
    #[arg(short, long, env = "DOC2IMG_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Extra attempts for every LLM and txt2img call.
    #[arg(long, env = "DOC2IMG_RETRY_TIMES", default_value_t = 2)]
    retry_times: u32,

    /// Delay between attempts in milliseconds.
    #[arg(long, env = "DOC2IMG_RETRY_DELAY_MS", default_value_t = 1000)]
    retry_delay_ms: u64,

    /// LLM model ID (default: gpt-3.5-turbo).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOC2IMG_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Max LLM output tokens per directive.
    #[arg(long, env = "DOC2IMG_MAX_TOKENS", default_value_t = 1000)]
    max_tokens: usize,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "DOC2IMG_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Keywords every directive must start with.
    #[arg(long, env = "DOC2IMG_QUALITY_PREFIX")]
    quality_prefix: Option<String>,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "DOC2IMG_LLM_TIMEOUT", default_value_t = 130)]
    llm_timeout: u64,

    /// Per-call txt2img timeout in seconds.
    #[arg(long, env = "DOC2IMG_IMAGE_TIMEOUT", default_value_t = 130)]
    image_timeout: u64,

    /// Stable Diffusion WebUI base URL.
    #[arg(long, env = "DOC2IMG_SD_URL", default_value = "http://127.0.0.1:7860")]
    sd_url: String,

    /// Stable Diffusion checkpoint (required).
    #[arg(long, env = "DOC2IMG_SD_CHECKPOINT")]
    sd_checkpoint: Option<String>,

    /// Optional VAE override.
    #[arg(long, env = "DOC2IMG_SD_VAE")]
    sd_vae: Option<String>,

    /// Negative prompt sent with every image.
    #[arg(long, env = "DOC2IMG_NEGATIVE_PROMPT")]
    negative_prompt: Option<String>,

    /// Sampling steps.
    #[arg(long, env = "DOC2IMG_STEPS", default_value_t = 30)]
    steps: u32,

    /// Sampler name.
    #[arg(long, env = "DOC2IMG_SAMPLER", default_value = "Euler a")]
    sampler: String,

    /// Seed (-1 for random).
    #[arg(long, env = "DOC2IMG_SEED", default_value_t = 1, allow_hyphen_values = true)]
    seed: i64,

    /// CLIP layers to skip.
    #[arg(long, env = "DOC2IMG_CLIP_SKIP", default_value_t = 2)]
    clip_skip: u32,

    /// Enable face restoration.
    #[arg(long, env = "DOC2IMG_RESTORE_FACES")]
    restore_faces: bool,

    /// Candidate resolutions, e.g. 768x512,512x768. Sizes below 512 are dropped.
    #[arg(long, env = "DOC2IMG_RESOLUTIONS", value_delimiter = ',', value_parser = parse_resolution)]
    resolution: Vec<Resolution>,

    /// Display width of inserted images in pixels.
    #[arg(long, env = "DOC2IMG_DISPLAY_WIDTH", default_value_t = 576)]
    display_width: u32,

    /// Print a JSON run report on stdout.
    #[arg(long, env = "DOC2IMG_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOC2IMG_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2IMG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOC2IMG_QUIET")]
    quiet: bool,
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    s.parse::<Resolution>().map_err(|e| e.to_string())
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn GenerationProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Run ──────────────────────────────────────────────────────────────
    let output = generate(&cli.input, &config)
        .await
        .context("Illustration failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output.report())
            .context("Failed to serialise report")?;
        println!("{json}");
    }

    let stats = &output.stats;
    if !cli.quiet {
        eprintln!(
            "{}  {}/{} chunks  {}ms  →  {}",
            if stats.failed == 0 { green("✔") } else { cyan("⚠") },
            stats.succeeded,
            stats.total_chunks,
            stats.total_duration_ms,
            bold(&output.document_path.display().to_string()),
        );
        eprintln!(
            "   prompts  →  {}",
            dim(&output.prompt_log_path.display().to_string())
        );
        if stats.oversized_chunks > 0 {
            eprintln!(
                "   {} chunk(s) were a single paragraph above {} tokens",
                stats.oversized_chunks, config.token_per_chunk
            );
        }
    }

    if stats.total_chunks > 0 && stats.succeeded == 0 {
        anyhow::bail!("No chunk could be illustrated");
    }
    Ok(())
}

/// Map CLI args to `GenerationConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<GenerationConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let characters = match cli.characters {
        Some(ref path) => CharacterSheet::from_path(path)?,
        None => CharacterSheet::new(),
    };

    let mut image = ImageSettings::new(&cli.sd_url, cli.sd_checkpoint.clone().unwrap_or_default());
    image.vae = cli.sd_vae.clone();
    if let Some(ref negative) = cli.negative_prompt {
        image.negative_prompt = negative.clone();
    }
    image.steps = cli.steps;
    image.sampler_name = cli.sampler.clone();
    image.seed = cli.seed;
    image.clip_skip = cli.clip_skip;
    image.restore_faces = cli.restore_faces;

    let mut builder = GenerationConfig::builder()
        .token_per_chunk(cli.token_per_chunk)
        .concurrency(cli.concurrency)
        .retry_times(cli.retry_times)
        .retry_delay_ms(cli.retry_delay_ms)
        .llm_timeout_secs(cli.llm_timeout)
        .image_timeout_secs(cli.image_timeout)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .characters(characters)
        .display_width_px(cli.display_width)
        .image(image);

    if !cli.resolution.is_empty() {
        builder = builder.resolutions(cli.resolution.clone());
    }
    if cli.word_tokens {
        builder = builder.tokenizer(Arc::new(WordTokenizer));
    }
    if let Some(ref prefix) = cli.quality_prefix {
        builder = builder.quality_prefix(prefix);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
