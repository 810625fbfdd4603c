//! Markdown ⇄ [`OutputDocument`].
//!
//! Blocks are separated by blank lines; fenced code blocks are kept whole
//! even when they contain blank lines. A block whose every line starts with
//! `|` is a GFM table. A block that is exactly an image reference written by
//! [`render`] is read back as [`Node::Image`], so running the tool on its own
//! output does not feed image markup to the LLM. Everything else is a
//! paragraph, kept verbatim.
//!
//! Nothing outside an inserted image is rewritten: blank-line runs, CRLF line
//! endings, hard breaks and a missing final newline all survive a
//! parse/render cycle, and inserted images use the document's line ending.

use super::{ImageRef, Node, OutputDocument, Table};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_TABLE_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\|?\s*:?-+:?\s*(\|\s*:?-+:?\s*)*\|?$").unwrap());

static RE_CENTRED_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^<p align="center"><img src="([^"]*)" alt="([^"]*)" width="(\d+)"></p>$"#)
        .unwrap()
});

/// Parse Markdown into a document.
///
/// The text between blocks is kept verbatim, so [`render`] reproduces the
/// input byte for byte until an image is inserted.
pub fn parse(input: &str) -> OutputDocument {
    let eol = if input.contains("\r\n") { "\r\n" } else { "\n" };
    let spans = split_blocks(input);
    let leading = spans.first().map_or(input, |s| &input[..s.start]);

    let mut nodes = Vec::with_capacity(spans.len());
    let mut separators = Vec::with_capacity(spans.len());
    let mut paragraphs = 0usize;
    let mut tables = 0usize;

    for (i, span) in spans.iter().enumerate() {
        let block = &input[span.start..span.end];
        let next = spans.get(i + 1).map_or(input.len(), |s| s.start);
        separators.push(input[span.end..next].to_string());

        if let Some(image) = parse_image(block) {
            nodes.push(Node::Image(image));
        } else if is_table(block) {
            nodes.push(Node::Table(Table {
                index: tables,
                rows: parse_table_rows(block),
                raw: block.to_string(),
            }));
            tables += 1;
        } else {
            nodes.push(Node::Paragraph {
                index: paragraphs,
                text: block.to_string(),
            });
            paragraphs += 1;
        }
    }

    OutputDocument::from_parts(leading.to_string(), nodes, separators, eol)
}

/// Render a document back to Markdown.
pub fn render(doc: &OutputDocument) -> String {
    let mut out = String::from(doc.leading());
    for (node, separator) in doc.nodes().iter().zip(doc.separators()) {
        match node {
            Node::Paragraph { text, .. } => out.push_str(text),
            Node::Table(table) => out.push_str(&table.raw),
            Node::Image(image) => out.push_str(&render_image(image)),
        }
        out.push_str(separator);
    }
    out
}

/// Centred HTML image reference with a fixed display width.
pub fn render_image(image: &ImageRef) -> String {
    format!(
        r#"<p align="center"><img src="{}" alt="{}" width="{}"></p>"#,
        escape_attr(&image.src),
        escape_attr(&image.alt),
        image.width
    )
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

fn unescape_attr(s: &str) -> String {
    s.replace("&quot;", "\"").replace("&amp;", "&")
}

/// Byte range of one block, without its final line terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

/// Split on blank (or whitespace-only) lines outside code fences.
///
/// A leading byte-order mark belongs to the text before the first block.
fn split_blocks(input: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut current: Option<Span> = None;
    let mut in_fence = false;
    let mut offset = if input.starts_with('\u{FEFF}') {
        '\u{FEFF}'.len_utf8()
    } else {
        0
    };

    for line in input[offset..].split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        let trimmed = content.trim();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        if trimmed.is_empty() && !in_fence {
            if let Some(span) = current.take() {
                spans.push(span);
            }
        } else {
            let end = offset + content.len();
            match current.as_mut() {
                Some(span) => span.end = end,
                None => current = Some(Span { start: offset, end }),
            }
        }
        offset += line.len();
    }
    if let Some(span) = current {
        spans.push(span);
    }
    spans
}

/// Only markup exactly as [`render_image`] writes it is read back as an
/// image; anything else stays a paragraph.
fn parse_image(block: &str) -> Option<ImageRef> {
    let caps = RE_CENTRED_IMAGE.captures(block)?;
    let image = ImageRef {
        src: unescape_attr(&caps[1]),
        alt: unescape_attr(&caps[2]),
        width: caps[3].parse().ok()?,
    };
    (render_image(&image) == block).then_some(image)
}

fn is_table(block: &str) -> bool {
    block.lines().all(|l| l.trim_start().starts_with('|'))
}

fn parse_table_rows(block: &str) -> Vec<Vec<String>> {
    block
        .lines()
        .map(str::trim)
        .filter(|l| !RE_TABLE_SEPARATOR.is_match(l))
        .map(|l| {
            let inner = l.strip_prefix('|').unwrap_or(l);
            let inner = inner.strip_suffix('|').unwrap_or(inner);
            inner.split('|').map(|c| c.trim().to_string()).collect()
        })
        .collect()
}
