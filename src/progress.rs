//! Progress-callback trait for per-chunk pipeline events.
//!
//! Inject an [`Arc<dyn GenerationProgressCallback>`] via
//! [`crate::config::GenerationConfigBuilder::progress_callback`] to receive
//! events as each chunk moves through PROMPTING → IMAGING → WRITING.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2img::{GenerationProgressCallback, TaskState};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountImaging(AtomicUsize);
//!
//! impl GenerationProgressCallback for CountImaging {
//!     fn on_chunk_state(&self, _chunk: usize, _total: usize, state: TaskState) {
//!         if state == TaskState::Imaging {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//! ```

use crate::output::TaskState;
use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as it processes each chunk.
///
/// Chunks run on several workers at once, so every method may be called
/// concurrently from different threads. All methods default to no-ops.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called once before any chunk is dispatched.
    fn on_run_start(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// Called on every non-terminal state change of a chunk
    /// (`Prompting`, `Imaging`, `Writing`). `chunk` is 0-indexed.
    fn on_chunk_state(&self, chunk: usize, total_chunks: usize, state: TaskState) {
        let _ = (chunk, total_chunks, state);
    }

    /// Called when a chunk's image has been inserted into the document.
    fn on_chunk_complete(&self, chunk: usize, total_chunks: usize, image_path: &Path) {
        let _ = (chunk, total_chunks, image_path);
    }

    /// Called when a chunk ends FAILED.
    fn on_chunk_error(&self, chunk: usize, total_chunks: usize, error: &str) {
        let _ = (chunk, total_chunks, error);
    }

    /// Called once after every chunk reached a terminal state.
    fn on_run_complete(&self, total_chunks: usize, success_count: usize) {
        let _ = (total_chunks, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::GenerationConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;
