//! The shared output document and its text blocks.
//!
//! A document is an ordered list of [`Node`]s. Text-bearing nodes carry the
//! identity they had when the document was parsed ([`BlockId`]); that
//! identity never changes, however many images are inserted later. This is
//! what lets concurrent workers find "the paragraph after which my image
//! goes" even though earlier insertions have shifted every raw index.
//!
//! The on-disk format is Markdown, see [`markdown`].

pub mod markdown;

use crate::error::MutationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable position key of a text block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockId {
    /// Ordinal of the paragraph among all paragraphs of the source.
    Paragraph(usize),
    /// A table cell, addressed by table ordinal, row and column.
    Cell { table: usize, row: usize, cell: usize },
}

impl BlockId {
    pub fn is_cell(&self) -> bool {
        matches!(self, BlockId::Cell { .. })
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Paragraph(i) => write!(f, "paragraph {i}"),
            BlockId::Cell { table, row, cell } => {
                write!(f, "table {table} row {row} cell {cell}")
            }
        }
    }
}

/// One unit of extractable text. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    pub id: BlockId,
    pub text: String,
}

impl TextBlock {
    pub fn new(id: BlockId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// A centred image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Path as written into the document (relative to the document).
    pub src: String,
    pub alt: String,
    /// Display width in pixels.
    pub width: u32,
}

/// A GFM table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Ordinal of the table among all tables of the source.
    pub index: usize,
    /// Source text, re-emitted verbatim.
    pub raw: String,
    /// Cell text per row, separator rows excluded.
    pub rows: Vec<Vec<String>>,
}

/// One top-level element of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Paragraph { index: usize, text: String },
    Table(Table),
    Image(ImageRef),
}

/// Where [`OutputDocument::insert_image`] put an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Directly after the anchor paragraph, at this node position.
    AfterAnchor(usize),
    /// Appended at the end of the document, at this node position.
    Appended(usize),
}

/// The single mutable artifact shared by all workers.
///
/// Besides its nodes the document keeps the exact text found before the
/// first node and after each node (blank lines, line endings), so an
/// unmodified document renders back to its source unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDocument {
    leading: String,
    nodes: Vec<Node>,
    /// `separators[i]` follows `nodes[i]`; always the same length as `nodes`.
    separators: Vec<String>,
    eol: &'static str,
}

impl Default for OutputDocument {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl OutputDocument {
    /// Nodes separated by blank lines, ending with a newline.
    pub fn new(nodes: Vec<Node>) -> Self {
        let mut separators = vec!["\n\n".to_string(); nodes.len()];
        if let Some(last) = separators.last_mut() {
            *last = "\n".to_string();
        }
        Self::from_parts(String::new(), nodes, separators, "\n")
    }

    pub(crate) fn from_parts(
        leading: String,
        nodes: Vec<Node>,
        separators: Vec<String>,
        eol: &'static str,
    ) -> Self {
        debug_assert_eq!(nodes.len(), separators.len());
        Self {
            leading,
            nodes,
            separators,
            eol,
        }
    }

    /// Parse Markdown text.
    pub fn from_markdown(text: &str) -> Self {
        markdown::parse(text)
    }

    /// Render back to Markdown.
    pub fn to_markdown(&self) -> String {
        markdown::render(self)
    }

    /// Text before the first node.
    pub fn leading(&self) -> &str {
        &self.leading
    }

    /// Text following each node, parallel to [`Self::nodes`].
    pub fn separators(&self) -> &[String] {
        &self.separators
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn image_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Image(_)))
            .count()
    }

    /// All non-empty text blocks in document order.
    ///
    /// Line endings become `\n`, trailing whitespace is dropped from every
    /// line and the text is trimmed; blocks left empty are skipped.
    pub fn text_blocks(&self) -> Vec<TextBlock> {
        let mut blocks = Vec::new();
        for node in &self.nodes {
            match node {
                Node::Paragraph { index, text } => {
                    let text = normalise_text(text);
                    if !text.is_empty() {
                        blocks.push(TextBlock::new(BlockId::Paragraph(*index), text));
                    }
                }
                Node::Table(table) => {
                    for (row, cells) in table.rows.iter().enumerate() {
                        for (cell, text) in cells.iter().enumerate() {
                            let text = text.trim();
                            if !text.is_empty() {
                                let id = BlockId::Cell {
                                    table: table.index,
                                    row,
                                    cell,
                                };
                                blocks.push(TextBlock::new(id, text));
                            }
                        }
                    }
                }
                Node::Image(_) => {}
            }
        }
        blocks
    }

    /// Node position of the paragraph with the given stable index.
    pub fn position_of_paragraph(&self, paragraph: usize) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| matches!(n, Node::Paragraph { index, .. } if *index == paragraph))
    }

    /// Insert `image` relative to `anchor` in the document's current state.
    ///
    /// Paragraph anchors are resolved by identity, never by a stored numeric
    /// position, so insertions made by other chunks do not move the target.
    /// Cell anchors have no reliable in-place position and are appended.
    pub fn insert_image(
        &mut self,
        anchor: &BlockId,
        image: ImageRef,
    ) -> Result<Placement, MutationError> {
        match anchor {
            BlockId::Paragraph(p) => {
                let pos = self
                    .position_of_paragraph(*p)
                    .ok_or_else(|| MutationError::AnchorNotFound {
                        anchor: anchor.clone(),
                    })?;
                Ok(Placement::AfterAnchor(self.splice_after(pos, image)))
            }
            BlockId::Cell { .. } => Ok(Placement::Appended(self.append(image))),
        }
    }

    fn append(&mut self, image: ImageRef) -> usize {
        match self.nodes.len().checked_sub(1) {
            Some(last) => self.splice_after(last, image),
            None => {
                self.nodes.push(Node::Image(image));
                self.separators.push(self.eol.to_string());
                0
            }
        }
    }

    /// Put `image` right after node `pos`, separated from it by one blank
    /// line. The image inherits whatever followed the node before.
    fn splice_after(&mut self, pos: usize, image: ImageRef) -> usize {
        let blank_line = format!("{0}{0}", self.eol);
        let trailing = std::mem::replace(&mut self.separators[pos], blank_line);
        self.nodes.insert(pos + 1, Node::Image(image));
        self.separators.insert(pos + 1, trailing);
        pos + 1
    }

    /// Undo an insertion made by [`Self::insert_image`].
    pub(crate) fn revert(&mut self, placement: Placement) {
        let (Placement::AfterAnchor(pos) | Placement::Appended(pos)) = placement;
        if matches!(self.nodes.get(pos), Some(Node::Image(_))) {
            self.nodes.remove(pos);
            let trailing = self.separators.remove(pos);
            if let Some(previous) = pos.checked_sub(1) {
                self.separators[previous] = trailing;
            }
        }
    }
}

fn normalise_text(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
