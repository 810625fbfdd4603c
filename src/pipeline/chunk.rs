//! Token-bounded, block-preserving chunking.
//!
//! [`TokenChunker::split`] walks the text blocks in document order and greedily
//! packs them into chunks whose token count stays within the configured
//! limit. A block is never split: a block that is larger than the limit on its
//! own becomes a chunk by itself and is flagged [`Chunk::oversized`].
//!
//! Token counts come from a [`Tokenizer`]. The default is [`BpeTokenizer`]
//! with OpenAI's `cl100k_base` encoding, the one gpt-3.5-turbo bills in, so
//! `token_per_chunk` means model tokens. [`WordTokenizer`] counts Unicode
//! word-boundary segments (UAX #29) instead; it is the fallback if the BPE
//! tables cannot be loaded.

use crate::document::{BlockId, TextBlock};
use crate::error::ConfigError;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

/// Deterministic token counter.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Counts words and punctuation marks as separate tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn count(&self, text: &str) -> usize {
        text.split_word_bounds()
            .filter(|seg| !seg.chars().all(char::is_whitespace))
            .count()
    }
}

/// Byte-pair-encoding token counts.
pub struct BpeTokenizer {
    bpe: CoreBPE,
}

impl BpeTokenizer {
    /// The `cl100k_base` encoding used by gpt-3.5-turbo and gpt-4.
    pub fn cl100k() -> Result<Self, ConfigError> {
        tiktoken_rs::cl100k_base()
            .map(|bpe| Self { bpe })
            .map_err(|e| ConfigError::InvalidValue(format!("cannot load cl100k_base: {e}")))
    }
}

impl Tokenizer for BpeTokenizer {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

static DEFAULT_TOKENIZER: Lazy<Arc<dyn Tokenizer>> = Lazy::new(|| match BpeTokenizer::cl100k() {
    Ok(bpe) => Arc::new(bpe),
    Err(e) => {
        warn!("{e}; counting word segments instead");
        Arc::new(WordTokenizer)
    }
});

/// The shared default tokenizer, built on first use.
pub fn default_tokenizer() -> Arc<dyn Tokenizer> {
    Arc::clone(&DEFAULT_TOKENIZER)
}

/// A contiguous, non-empty run of text blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    blocks: Vec<TextBlock>,
    token_count: usize,
    oversized: bool,
}

impl Chunk {
    pub fn blocks(&self) -> &[TextBlock] {
        &self.blocks
    }

    /// Sum of the token counts of every block.
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// True when the chunk is a single block that alone exceeds the limit.
    pub fn oversized(&self) -> bool {
        self.oversized
    }

    /// Block texts joined with newlines; this is what the LLM sees.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn start_anchor(&self) -> &BlockId {
        &self.blocks[0].id
    }

    /// The image for this chunk goes after this block.
    pub fn end_anchor(&self) -> &BlockId {
        &self.blocks[self.blocks.len() - 1].id
    }
}

/// Greedy chunker with a fixed token limit.
#[derive(Clone)]
pub struct TokenChunker {
    limit: usize,
    tokenizer: Arc<dyn Tokenizer>,
}

impl std::fmt::Debug for TokenChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenChunker")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl TokenChunker {
    /// Chunker with the [`default_tokenizer`].
    pub fn new(limit: usize) -> Result<Self, ConfigError> {
        Self::with_tokenizer(limit, default_tokenizer())
    }

    pub fn with_tokenizer(limit: usize, tokenizer: Arc<dyn Tokenizer>) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidValue(
                "token_per_chunk must be ≥ 1".into(),
            ));
        }
        Ok(Self { limit, tokenizer })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Split `blocks` into ordered chunks.
    ///
    /// The concatenation of every chunk's blocks is exactly `blocks`. Every
    /// chunk stays within the limit except a chunk holding a single block
    /// that exceeds it on its own.
    pub fn split(&self, blocks: &[TextBlock]) -> Result<Vec<Chunk>, ConfigError> {
        if blocks.is_empty() {
            return Err(ConfigError::NoContent);
        }

        let mut chunks = Vec::new();
        let mut current: Vec<TextBlock> = Vec::new();
        let mut running = 0usize;

        for block in blocks {
            let tokens = self.tokenizer.count(&block.text);
            if !current.is_empty() && running + tokens > self.limit {
                chunks.push(self.close(std::mem::take(&mut current), running));
                running = 0;
            }
            current.push(block.clone());
            running += tokens;
        }
        chunks.push(self.close(current, running));

        debug!(
            "Split {} blocks into {} chunks (limit {})",
            blocks.len(),
            chunks.len(),
            self.limit
        );
        Ok(chunks)
    }

    fn close(&self, blocks: Vec<TextBlock>, token_count: usize) -> Chunk {
        let oversized = token_count > self.limit;
        if oversized {
            warn!(
                "{} has {} tokens, above the {}-token limit; kept whole",
                blocks[0].id, token_count, self.limit
            );
        }
        Chunk {
            blocks,
            token_count,
            oversized,
        }
    }
}
