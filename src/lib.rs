//! # edgequake-doc2img
//!
//! Illustrate long text documents with AI-generated images.
//!
//! The document is sliced into token-bounded chunks that never split a
//! paragraph. For every chunk an LLM writes a Stable Diffusion directive
//! (keeping recurring characters' looks consistent through a shared character
//! sheet), a txt2img backend renders it, and the image is spliced back into a
//! copy of the document right after the chunk's last paragraph.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Markdown document
//!  │
//!  ├─ 1. Input    validate source, make `<stem>_copy.md`
//!  ├─ 2. Chunk    greedy, block-preserving, ≤ token_per_chunk tokens
//!  ├─ 3. Prompt   chunk + character corpus → directive (LLM, retried)
//!  ├─ 4. Image    directive + random resolution → PNG (txt2img, retried)
//!  └─ 5. Mutate   insert image after the chunk's anchor (serialised)
//! ```
//!
//! Steps 3 to 5 run in parallel across chunks on a bounded worker pool; a
//! chunk that fails after its retries is reported and skipped while the
//! others complete.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2img::{generate, CharacterSheet, GenerationConfig, ImageSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // LLM provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = GenerationConfig::builder()
//!         .token_per_chunk(1000)
//!         .concurrency(2)
//!         .characters(CharacterSheet::new().with("Lin", "long black hair, red scarf"))
//!         .image(ImageSettings::new("http://127.0.0.1:7860", "anything-v5.safetensors"))
//!         .build()?;
//!     let output = generate("novel.md", &config).await?;
//!     eprintln!("{}/{} chunks illustrated → {}",
//!         output.stats.succeeded,
//!         output.stats.total_chunks,
//!         output.document_path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2img` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-doc2img = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod generate;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    CharacterSheet, GenerationConfig, GenerationConfigBuilder, ImageSettings, Resolution,
    ResolutionSet, MIN_DIMENSION,
};
pub use document::{BlockId, OutputDocument, TextBlock};
pub use error::{ChunkError, ConfigError, Doc2ImgError, MutationError, RetryExhausted, ServiceError};
pub use generate::{generate, generate_sync, generate_with_synthesizers, prepare_chunks};
pub use orchestrator::PipelineOrchestrator;
pub use output::{
    ChunkArtifact, ChunkOutcome, ChunkReport, GeneratedAsset, GenerationOutput, GenerationReport,
    GenerationStats, TaskState,
};
pub use pipeline::chunk::{BpeTokenizer, Chunk, TokenChunker, Tokenizer, WordTokenizer};
pub use pipeline::image::{ImageSynthesizer, StableDiffusionClient};
pub use pipeline::llm::{LlmPromptSynthesizer, PromptSynthesizer};
pub use pipeline::retry::RetryPolicy;
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
