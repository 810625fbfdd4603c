//! Mutation of the shared output document and the prompt sidecar log.
//!
//! [`DocumentMutator`] is the only owner of the [`OutputDocument`]. Every
//! insertion takes its lock, places the image relative to the anchor in the
//! document's *current* state, and rewrites the working copy on disk before
//! releasing the lock. The lock is never held across a network call, so
//! workers only serialise on the short insert-and-write step.
//!
//! [`PromptLog`] has its own lock. Workers finish in any order, but records
//! reach the file in chunk-index order: a record that arrives early is parked
//! until every lower index has either been written or skipped.

use crate::document::{BlockId, ImageRef, OutputDocument, Placement};
use crate::error::MutationError;
use crate::output::GeneratedAsset;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Serialised access to the output document.
pub struct DocumentMutator {
    document: Mutex<OutputDocument>,
    path: PathBuf,
    display_width: u32,
}

impl DocumentMutator {
    /// `path` is the working copy the document is persisted to after every
    /// insertion.
    pub fn new(document: OutputDocument, path: impl Into<PathBuf>, display_width: u32) -> Self {
        Self {
            document: Mutex::new(document),
            path: path.into(),
            display_width,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert the image of `asset` after `anchor` and persist the document.
    ///
    /// If the write fails the insertion is undone, so the in-memory document
    /// never drifts from what is on disk.
    pub async fn insert(
        &self,
        chunk_index: usize,
        asset: &GeneratedAsset,
        anchor: &BlockId,
    ) -> Result<Placement, MutationError> {
        let image = ImageRef {
            src: self.relative_src(&asset.image_path),
            alt: format!("chunk {chunk_index}"),
            width: self.display_width,
        };

        let mut doc = self.document.lock().await;
        let placement = doc.insert_image(anchor, image)?;
        if let Placement::Appended(_) = placement {
            debug!("Chunk {chunk_index}: anchor {anchor} is a table cell, image appended");
        }
        let rendered = doc.to_markdown();
        if let Err(source) = write_atomic(&self.path, &rendered).await {
            doc.revert(placement);
            return Err(MutationError::Write {
                path: self.path.clone(),
                source,
            });
        }
        debug!(
            "Chunk {chunk_index}: inserted {} after {anchor} ({} images total)",
            asset.image_path.display(),
            doc.image_count()
        );
        Ok(placement)
    }

    /// A copy of the document as it is now.
    pub async fn snapshot(&self) -> OutputDocument {
        self.document.lock().await.clone()
    }

    /// Image paths next to the document are written as bare file names.
    fn relative_src(&self, image_path: &Path) -> String {
        let rel = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                image_path.strip_prefix(dir).unwrap_or(image_path)
            }
            _ => image_path,
        };
        rel.to_string_lossy().replace('\\', "/")
    }
}

/// Write `contents` to a sibling temp file, then rename over `path`.
async fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await
}

// ── Prompt log ───────────────────────────────────────────────────────────────

/// Format of one sidecar record.
pub fn format_record(chunk_index: usize, directive: &str) -> String {
    format!("===== chunk {chunk_index} directive =====\n{directive}\n\n")
}

struct LogState {
    file: File,
    /// Lowest chunk index not yet written or skipped.
    next: usize,
    /// Early arrivals. `None` marks a chunk that produced no directive.
    pending: BTreeMap<usize, Option<String>>,
}

/// Append-only sidecar collecting every chunk's directive in index order.
pub struct PromptLog {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl PromptLog {
    /// Open `path` for appending, creating it if needed. Existing content is
    /// kept.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, MutationError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| MutationError::PromptLog {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            state: Mutex::new(LogState {
                file,
                next: 0,
                pending: BTreeMap::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the directive of `chunk_index`.
    pub async fn record(&self, chunk_index: usize, directive: &str) -> Result<(), MutationError> {
        self.settle(chunk_index, Some(directive.to_string())).await
    }

    /// Release the slot of a chunk that will never record a directive.
    pub async fn skip(&self, chunk_index: usize) -> Result<(), MutationError> {
        self.settle(chunk_index, None).await
    }

    /// Flush whatever is still parked, in index order, and sync the file.
    ///
    /// Only has work to do if some chunk neither recorded nor skipped.
    pub async fn close(&self) -> Result<(), MutationError> {
        let mut state = self.state.lock().await;
        let parked = std::mem::take(&mut state.pending);
        for (index, entry) in parked {
            if index > state.next {
                warn!("Prompt log: chunks {}..{index} never reported", state.next);
            }
            if let Some(directive) = entry {
                self.append(&mut state.file, index, &directive).await?;
            }
            state.next = index + 1;
        }
        state.file.flush().await.map_err(|source| self.error(source))?;
        state.file.sync_all().await.map_err(|source| self.error(source))
    }

    async fn settle(&self, chunk_index: usize, entry: Option<String>) -> Result<(), MutationError> {
        let mut state = self.state.lock().await;
        if chunk_index < state.next {
            warn!("Prompt log: chunk {chunk_index} reported twice, ignored");
            return Ok(());
        }
        state.pending.insert(chunk_index, entry);

        loop {
            let next = state.next;
            let Some(entry) = state.pending.remove(&next) else {
                break;
            };
            if let Some(directive) = entry {
                self.append(&mut state.file, next, &directive).await?;
            }
            state.next += 1;
        }
        Ok(())
    }

    async fn append(&self, file: &mut File, index: usize, directive: &str) -> Result<(), MutationError> {
        file.write_all(format_record(index, directive).as_bytes())
            .await
            .map_err(|source| self.error(source))?;
        file.flush().await.map_err(|source| self.error(source))
    }

    fn error(&self, source: std::io::Error) -> MutationError {
        MutationError::PromptLog {
            path: self.path.clone(),
            source,
        }
    }
}
