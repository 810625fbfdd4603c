//! Error types for the edgequake-doc2img library.
//!
//! Errors are split by how far they are allowed to travel:
//!
//! * [`Doc2ImgError`] is **fatal**: the run cannot start at all (bad
//!   configuration, missing credentials, empty source document). Returned as
//!   `Err(Doc2ImgError)` from the top-level `generate*` functions.
//!
//! * [`ServiceError`] is **transient**: a timeout, a dropped connection or an
//!   empty/malformed reply from the LLM or the txt2img endpoint. It is only
//!   ever seen by [`crate::pipeline::retry::RetryPolicy`], which retries it.
//!
//! * [`RetryExhausted`] is what a [`ServiceError`] becomes once the retry
//!   budget is spent. It keeps the last cause as its `source`.
//!
//! * [`ChunkError`] is **terminal for one chunk only**. It is stored in the
//!   chunk's [`crate::output::ChunkOutcome`] and never crosses the task
//!   boundary, so sibling chunks keep running.

use crate::config::Resolution;
use std::error::Error as StdError;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration rejected at construction time, before any task runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Every resolution candidate was below the 512×512 minimum.
    #[error("No usable resolution: every candidate is below 512x512 (rejected: {rejected:?})")]
    EmptyResolutionSet { rejected: Vec<Resolution> },

    /// The Stable Diffusion checkpoint name is required.
    #[error("Stable Diffusion model checkpoint must not be empty.\nSet --sd-checkpoint or DOC2IMG_SD_CHECKPOINT.")]
    MissingCheckpoint,

    /// The txt2img endpoint URL is required.
    #[error("Stable Diffusion API URL must not be empty")]
    MissingImageEndpoint,

    /// The chunker was given no text blocks.
    #[error("No content to process: the document has no non-empty text blocks")]
    NoContent,

    /// A numeric or textual setting is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}

/// All fatal errors returned by the edgequake-doc2img library.
///
/// Chunk-level failures use [`ChunkError`] and are stored in
/// [`crate::output::ChunkOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Doc2ImgError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The LLM provider could not be initialised (missing API key, model etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The character sheet file could not be read or parsed.
    #[error("Failed to load character sheet '{path}': {detail}")]
    CharacterSheet { path: PathBuf, detail: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Source document was not found at the given path.
    #[error("Source document not found: '{path}'\nCheck the path exists and is readable.")]
    SourceNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The source document is not valid UTF-8 text.
    #[error("Source document '{path}' is not valid UTF-8 text")]
    NotUtf8 { path: PathBuf },

    /// The source document has no non-empty text block.
    #[error("Source document '{path}' has no text to illustrate")]
    EmptyDocument { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the working copy or another output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A transient failure of one call to an external synthesizer.
///
/// `service` is `"llm"` for prompt synthesis and `"txt2img"` for image
/// synthesis. Every variant is retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The call did not finish within its per-call timeout.
    #[error("{service} call timed out after {secs}s")]
    Timeout { service: &'static str, secs: u64 },

    /// The endpoint could not be reached.
    #[error("{service} connection failed: {detail}")]
    Connection { service: &'static str, detail: String },

    /// The endpoint answered with a non-success HTTP status.
    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The reply contained no usable payload (no choice text, no image).
    #[error("{service} returned an empty response")]
    EmptyResponse { service: &'static str },

    /// The reply could not be decoded.
    #[error("{service} returned a malformed response: {detail}")]
    MalformedResponse { service: &'static str, detail: String },

    /// Any other error reported by the upstream client library.
    #[error("{service} error: {detail}")]
    Upstream { service: &'static str, detail: String },
}

/// Terminal failure of a retried operation.
///
/// The message embeds the retry budget and the total number of attempts. The
/// last underlying [`ServiceError`] is only reachable as the error source.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed after {retries} retries ({attempts} attempts)")]
pub struct RetryExhausted {
    /// Human-readable name of the operation, e.g. `"prompt synthesis"`.
    pub operation: String,
    /// The configured retry budget.
    pub retries: u32,
    /// Total attempts made (`retries + 1`).
    pub attempts: u32,
    /// The error returned by the final attempt.
    #[source]
    pub source: ServiceError,
}

/// Failure while editing or persisting the shared output document.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The anchor block no longer exists in the document.
    #[error("Anchor {anchor} not found in document")]
    AnchorNotFound { anchor: crate::document::BlockId },

    /// Writing the mutated document to disk failed.
    #[error("Failed to persist document '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Appending to the prompt sidecar file failed.
    #[error("Failed to append to prompt log '{path}': {source}")]
    PromptLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A non-fatal error for a single chunk.
///
/// The overall run continues; the orchestrator records this against the
/// chunk index and moves on.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Prompt synthesis failed after all retries.
    #[error("Chunk {chunk}: prompt synthesis failed")]
    Prompt {
        chunk: usize,
        #[source]
        source: RetryExhausted,
    },

    /// Image synthesis failed after all retries.
    #[error("Chunk {chunk}: image synthesis failed")]
    Image {
        chunk: usize,
        #[source]
        source: RetryExhausted,
    },

    /// The generated image could not be decoded or saved.
    #[error("Chunk {chunk}: failed to save image '{path}': {detail}")]
    PersistImage {
        chunk: usize,
        path: PathBuf,
        detail: String,
    },

    /// Inserting the image into the document failed.
    #[error("Chunk {chunk}: document update failed")]
    Mutation {
        chunk: usize,
        #[source]
        source: MutationError,
    },

    /// The worker task ended abnormally (panic or cancellation).
    #[error("Chunk {chunk}: worker aborted: {detail}")]
    Aborted { chunk: usize, detail: String },
}

impl ChunkError {
    /// Index of the chunk this error belongs to.
    pub fn chunk(&self) -> usize {
        match self {
            ChunkError::Prompt { chunk, .. }
            | ChunkError::Image { chunk, .. }
            | ChunkError::PersistImage { chunk, .. }
            | ChunkError::Mutation { chunk, .. }
            | ChunkError::Aborted { chunk, .. } => *chunk,
        }
    }

    /// The error message followed by every cause in its source chain,
    /// joined with `": "`.
    pub fn chain_message(&self) -> String {
        let mut msg = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            msg.push_str(": ");
            msg.push_str(&err.to_string());
            cause = err.source();
        }
        msg
    }
}
