//! Result types produced by an illustration run.
//!
//! [`ChunkOutcome`] is the authoritative per-chunk record: whatever order the
//! workers finished in, [`GenerationOutput::outcomes`] is sorted by chunk
//! index and holds exactly one entry per chunk.

use crate::config::Resolution;
use crate::document::BlockId;
use crate::error::ChunkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of one chunk's task.
///
/// `Pending → Prompting → Imaging → Writing → Done`, or `Failed` from any
/// non-terminal state. `Failed` only ever affects its own chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Prompting,
    Imaging,
    Writing,
    Done,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::Prompting => "PROMPTING",
            TaskState::Imaging => "IMAGING",
            TaskState::Writing => "WRITING",
            TaskState::Done => "DONE",
            TaskState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Everything produced for one chunk before it is written into the document.
///
/// Created once per successful IMAGING step; `image_path` is already on disk
/// when the asset reaches the mutator.
#[derive(Debug, Clone)]
pub struct GeneratedAsset {
    pub directive: String,
    pub resolution: Resolution,
    pub image_bytes: Vec<u8>,
    pub image_path: PathBuf,
}

impl GeneratedAsset {
    /// Drop the raw bytes, keeping what callers need after the run.
    pub fn into_artifact(self) -> ChunkArtifact {
        ChunkArtifact {
            directive: self.directive,
            resolution: self.resolution,
            image_path: self.image_path,
        }
    }
}

/// A successfully illustrated chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkArtifact {
    pub directive: String,
    pub resolution: Resolution,
    pub image_path: PathBuf,
}

/// Terminal record for one chunk.
#[derive(Debug)]
pub struct ChunkOutcome {
    /// 0-indexed chunk position.
    pub index: usize,
    /// Anchor the image was (or would have been) inserted at.
    pub anchor: BlockId,
    pub token_count: usize,
    pub duration_ms: u64,
    pub result: Result<ChunkArtifact, ChunkError>,
}

impl ChunkOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn state(&self) -> TaskState {
        if self.result.is_ok() {
            TaskState::Done
        } else {
            TaskState::Failed
        }
    }

    pub fn artifact(&self) -> Option<&ChunkArtifact> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ChunkError> {
        self.result.as_ref().err()
    }

    /// Serialisable view of this outcome.
    pub fn report(&self) -> ChunkReport {
        ChunkReport {
            index: self.index,
            anchor: self.anchor.clone(),
            state: self.state(),
            image_path: self.artifact().map(|a| a.image_path.clone()),
            resolution: self.artifact().map(|a| a.resolution),
            directive: self.artifact().map(|a| a.directive.clone()),
            error: self.error().map(ChunkError::chain_message),
        }
    }
}

/// Aggregate statistics for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub total_chunks: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Chunks made of a single block larger than the token limit.
    pub oversized_chunks: usize,
    pub total_duration_ms: u64,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct GenerationOutput {
    /// The illustrated working copy.
    pub document_path: PathBuf,
    /// Sidecar file with one directive record per successful chunk.
    pub prompt_log_path: PathBuf,
    /// One outcome per chunk, sorted by index.
    pub outcomes: Vec<ChunkOutcome>,
    pub stats: GenerationStats,
}

impl GenerationOutput {
    /// Serialisable summary, used by the CLI's `--json` mode.
    pub fn report(&self) -> GenerationReport {
        GenerationReport {
            document_path: self.document_path.clone(),
            prompt_log_path: self.prompt_log_path.clone(),
            chunks: self.outcomes.iter().map(ChunkOutcome::report).collect(),
            stats: self.stats.clone(),
        }
    }
}

/// Serialisable per-chunk report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReport {
    pub index: usize,
    pub anchor: BlockId,
    pub state: TaskState,
    pub image_path: Option<PathBuf>,
    pub resolution: Option<Resolution>,
    pub directive: Option<String>,
    pub error: Option<String>,
}

/// Serialisable run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub document_path: PathBuf,
    pub prompt_log_path: PathBuf,
    pub chunks: Vec<ChunkReport>,
    pub stats: GenerationStats,
}
