//! Pipeline stages for document illustration.
//!
//! Each submodule implements one step. The two external services sit behind
//! the [`llm::PromptSynthesizer`] and [`image::ImageSynthesizer`] traits.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ chunk ──▶ llm ──▶ postprocess ──▶ image ──▶ decode ──▶ mutate
//! (source)  (tokens)  (LLM)   (directive)     (txt2img) (PNG)     (document)
//! ```
//!
//! 1. [`input`]: validate the source, make the working copy, name outputs
//! 2. [`chunk`]: token-bounded, block-preserving chunking
//! 3. [`llm`]: chunk text → directive; network I/O
//! 4. [`postprocess`]: directive cleanup and the quality-prefix invariant
//! 5. [`image`]: directive → image bytes via txt2img; network I/O
//! 6. [`decode`]: base64 payload validation and PNG persistence
//! 7. [`mutate`]: serialised document insertion and the prompt log
//!
//! [`retry`] wraps steps 3 and 5.

pub mod chunk;
pub mod decode;
pub mod image;
pub mod input;
pub mod llm;
pub mod mutate;
pub mod postprocess;
pub mod retry;
