//! Input resolution: validate the source document and lay out the outputs.
//!
//! The source document is never modified. It is copied to a working copy
//! next to it, and every output of a run lands in the source directory with
//! names derived from the source stem:
//!
//! ```text
//! story.md              source (read only)
//! story_copy.md         working copy, receives the images
//! story_prompts.txt     directive of every chunk, in chunk order
//! story_chunk_0.png     one image per successful chunk
//! ```

use crate::document::OutputDocument;
use crate::error::Doc2ImgError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A readable UTF-8 source document.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub text: String,
}

impl SourceDocument {
    pub fn parse(&self) -> OutputDocument {
        OutputDocument::from_markdown(&self.text)
    }
}

/// Read and validate the source document.
pub async fn resolve_source(path: &Path) -> Result<SourceDocument, Doc2ImgError> {
    if !path.is_file() {
        return Err(Doc2ImgError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }

    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Doc2ImgError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(Doc2ImgError::SourceNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    let text = String::from_utf8(bytes).map_err(|_| Doc2ImgError::NotUtf8 {
        path: path.to_path_buf(),
    })?;

    debug!("Resolved source document: {} ({} bytes)", path.display(), text.len());
    Ok(SourceDocument {
        path: path.to_path_buf(),
        text,
    })
}

/// Output file names for one source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    dir: PathBuf,
    stem: String,
    ext: Option<String>,
}

impl OutputLayout {
    pub fn for_source(source: &Path) -> Self {
        let dir = source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned());
        Self { dir, stem, ext }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<stem>_copy.<ext>`
    pub fn copy_path(&self) -> PathBuf {
        let name = match &self.ext {
            Some(ext) => format!("{}_copy.{ext}", self.stem),
            None => format!("{}_copy", self.stem),
        };
        self.dir.join(name)
    }

    /// `<stem>_prompts.txt`
    pub fn prompt_log_path(&self) -> PathBuf {
        self.dir.join(format!("{}_prompts.txt", self.stem))
    }

    /// `<stem>_chunk_<index>.png`
    pub fn image_path(&self, chunk_index: usize) -> PathBuf {
        self.dir
            .join(format!("{}_chunk_{chunk_index}.png", self.stem))
    }
}

/// Copy the source to its working copy, replacing any earlier copy.
pub async fn prepare_working_copy(
    source: &SourceDocument,
    layout: &OutputLayout,
) -> Result<PathBuf, Doc2ImgError> {
    let copy = layout.copy_path();
    tokio::fs::copy(&source.path, &copy)
        .await
        .map_err(|e| Doc2ImgError::OutputWriteFailed {
            path: copy.clone(),
            source: e,
        })?;
    info!("Working copy: {}", copy.display());
    Ok(copy)
}
