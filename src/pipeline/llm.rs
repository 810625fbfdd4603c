//! Prompt synthesis: turn one chunk of prose into a txt2img directive.
//!
//! [`PromptSynthesizer`] is the seam the orchestrator depends on; the
//! production implementation [`LlmPromptSynthesizer`] wraps any
//! `edgequake_llm` provider. The adapter makes exactly one chat call per
//! invocation. Retrying is the caller's job ([`super::retry::RetryPolicy`]),
//! so the provider, and its connection pool, are created once and reused by
//! every attempt of every chunk.
//!
//! ## Message Layout
//!
//! 1. **System message**: the directive-writing rules (or a user override)
//! 2. **User message**: the chunk text, the full character appearance corpus
//!    and the quality prefix the directive must start with

use crate::config::GenerationConfig;
use crate::error::ServiceError;
use crate::pipeline::postprocess::clean_directive;
use crate::prompts::{build_user_prompt, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const SERVICE: &str = "llm";

/// Converts chunk text plus the character corpus into a directive.
#[async_trait]
pub trait PromptSynthesizer: Send + Sync {
    /// One attempt. Must return non-empty text or a [`ServiceError`].
    async fn synthesize(
        &self,
        chunk_text: &str,
        character_corpus: &str,
    ) -> Result<String, ServiceError>;
}

/// [`PromptSynthesizer`] backed by a chat-completion provider.
pub struct LlmPromptSynthesizer {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    system_prompt: String,
    quality_prefix: String,
    timeout: Duration,
}

impl LlmPromptSynthesizer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &GenerationConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            quality_prefix: config.quality_prefix.clone(),
            timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }

    fn messages(&self, chunk_text: &str, character_corpus: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user(build_user_prompt(
                chunk_text,
                character_corpus,
                &self.quality_prefix,
            )),
        ]
    }
}

#[async_trait]
impl PromptSynthesizer for LlmPromptSynthesizer {
    async fn synthesize(
        &self,
        chunk_text: &str,
        character_corpus: &str,
    ) -> Result<String, ServiceError> {
        let start = Instant::now();
        let messages = self.messages(chunk_text, character_corpus);

        let response = tokio::time::timeout(
            self.timeout,
            self.provider.chat(&messages, Some(&self.options)),
        )
        .await
        .map_err(|_| ServiceError::Timeout {
            service: SERVICE,
            secs: self.timeout.as_secs(),
        })?
        .map_err(|e| ServiceError::Upstream {
            service: SERVICE,
            detail: e.to_string(),
        })?;

        debug!(
            "Directive: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        if clean_directive(&response.content).is_empty() {
            return Err(ServiceError::EmptyResponse { service: SERVICE });
        }
        Ok(response.content)
    }
}

/// Build `CompletionOptions` from the generation config.
fn build_options(config: &GenerationConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
