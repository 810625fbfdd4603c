//! Top-level entry points: illustrate a document end to end.
//!
//! [`generate`] wires the production adapters (an `edgequake_llm` provider
//! and the Stable Diffusion WebUI client) into
//! [`generate_with_synthesizers`], which does the actual work and is also the
//! seam tests use to run the whole flow against in-process fakes.

use crate::config::GenerationConfig;
use crate::document::OutputDocument;
use crate::error::{ConfigError, Doc2ImgError, MutationError};
use crate::orchestrator::PipelineOrchestrator;
use crate::output::{GenerationOutput, GenerationStats};
use crate::pipeline::chunk::{default_tokenizer, Chunk, TokenChunker};
use crate::pipeline::image::{ImageSynthesizer, StableDiffusionClient};
use crate::pipeline::input::{self, OutputLayout};
use crate::pipeline::llm::{LlmPromptSynthesizer, PromptSynthesizer};
use crate::pipeline::mutate::{DocumentMutator, PromptLog};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Illustrate the document at `path`.
///
/// The source file is left untouched; the illustrated working copy, the
/// prompt log and one PNG per chunk are written next to it.
///
/// # Returns
/// `Ok(GenerationOutput)` once every chunk is DONE or FAILED, even if some
/// chunks failed (check `output.stats.failed`).
///
/// # Errors
/// Returns `Err(Doc2ImgError)` only for fatal errors, all raised before any
/// chunk is dispatched:
/// - invalid configuration (e.g. no resolution ≥ 512×512)
/// - no LLM provider could be configured
/// - source missing, unreadable, not UTF-8 or without text
/// - the working copy or prompt log could not be created
///
/// # Example
/// ```rust,no_run
/// use edgequake_doc2img::{generate, GenerationConfig, ImageSettings};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = GenerationConfig::builder()
///     .image(ImageSettings::new("http://127.0.0.1:7860", "v1-5-pruned.safetensors"))
///     .build()?;
/// let output = generate("novel.md", &config).await?;
/// println!("{} images → {}", output.stats.succeeded, output.document_path.display());
/// # Ok(())
/// # }
/// ```
pub async fn generate(
    path: impl AsRef<Path>,
    config: &GenerationConfig,
) -> Result<GenerationOutput, Doc2ImgError> {
    config.resolution_set()?;
    let provider = resolve_provider(config).await?;
    let prompts: Arc<dyn PromptSynthesizer> = Arc::new(LlmPromptSynthesizer::new(provider, config));
    let images: Arc<dyn ImageSynthesizer> = Arc::new(
        StableDiffusionClient::new(config.image.clone(), config.image_timeout_secs)
            .map_err(|e| Doc2ImgError::Internal(format!("HTTP client: {e}")))?,
    );
    generate_with_synthesizers(path, config, prompts, images).await
}

/// Illustrate the document at `path` with caller-supplied synthesizers.
pub async fn generate_with_synthesizers(
    path: impl AsRef<Path>,
    config: &GenerationConfig,
    prompts: Arc<dyn PromptSynthesizer>,
    images: Arc<dyn ImageSynthesizer>,
) -> Result<GenerationOutput, Doc2ImgError> {
    let total_start = Instant::now();
    let path = path.as_ref();
    info!("Starting illustration: {}", path.display());
    config.resolution_set()?;

    // ── Step 1: Resolve source ───────────────────────────────────────────
    let source = input::resolve_source(path).await?;
    let document = source.parse();

    // ── Step 2: Chunk ────────────────────────────────────────────────────
    let chunks = prepare_chunks(&document, config).map_err(|e| match e {
        ConfigError::NoContent => Doc2ImgError::EmptyDocument {
            path: path.to_path_buf(),
        },
        other => other.into(),
    })?;
    let oversized_chunks = chunks.iter().filter(|c| c.oversized()).count();
    info!(
        "{} text blocks → {} chunks ({} over the {}-token limit)",
        document.text_blocks().len(),
        chunks.len(),
        oversized_chunks,
        config.token_per_chunk
    );

    // ── Step 3: Prepare outputs ──────────────────────────────────────────
    let layout = OutputLayout::for_source(path);
    let copy_path = input::prepare_working_copy(&source, &layout).await?;
    let prompt_log = PromptLog::open(layout.prompt_log_path())
        .await
        .map_err(output_error)?;
    let prompt_log_path = prompt_log.path().to_path_buf();
    let mutator = DocumentMutator::new(document, &copy_path, config.display_width_px);

    // ── Step 4: Run the pipeline ─────────────────────────────────────────
    let orchestrator = PipelineOrchestrator::new(
        prompts,
        images,
        Arc::new(mutator),
        Arc::new(prompt_log),
        layout,
        config,
    )?;
    let outcomes = orchestrator.run(chunks).await;

    // ── Step 5: Stats ────────────────────────────────────────────────────
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    let stats = GenerationStats {
        total_chunks: outcomes.len(),
        succeeded,
        failed: outcomes.len() - succeeded,
        oversized_chunks,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    if stats.failed > 0 {
        warn!("{} of {} chunks failed", stats.failed, stats.total_chunks);
    }
    info!(
        "Illustrated {} chunks in {}ms → {}",
        stats.succeeded,
        stats.total_duration_ms,
        copy_path.display()
    );

    Ok(GenerationOutput {
        document_path: copy_path,
        prompt_log_path,
        outcomes,
        stats,
    })
}

/// Synchronous wrapper around [`generate`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_sync(
    path: impl AsRef<Path>,
    config: &GenerationConfig,
) -> Result<GenerationOutput, Doc2ImgError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Doc2ImgError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(generate(path, config))
}

/// Extract the text blocks of `document` and chunk them.
pub fn prepare_chunks(
    document: &OutputDocument,
    config: &GenerationConfig,
) -> Result<Vec<Chunk>, ConfigError> {
    let blocks = document.text_blocks();
    debug!("Extracted {} text blocks", blocks.len());
    let tokenizer = config.tokenizer.clone().unwrap_or_else(default_tokenizer);
    TokenChunker::with_tokenizer(config.token_per_chunk, tokenizer)?.split(&blocks)
}

fn output_error(e: MutationError) -> Doc2ImgError {
    match e {
        MutationError::PromptLog { path, source } | MutationError::Write { path, source } => {
            Doc2ImgError::OutputWriteFailed { path, source }
        }
        other => Doc2ImgError::Internal(other.to_string()),
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Doc2ImgError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Doc2ImgError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **`OPENAI_API_KEY`** present → OpenAI with the configured model.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
async fn resolve_provider(config: &GenerationConfig) -> Result<Arc<dyn LLMProvider>, Doc2ImgError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Doc2ImgError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
