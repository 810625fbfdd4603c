//! Post-processing: deterministic cleanup of LLM-generated directives.
//!
//! Chat models wrap prompts in code fences, quote them, prefix them with
//! `Prompt:` or break them over several lines. txt2img wants a single line of
//! comma-separated keywords, so each rule below is a pure `&str → String`
//! pass that removes one such quirk without touching the keywords themselves.
//!
//! ## Rule Order
//!
//! Fences are stripped before line endings are normalised (the fence regex is
//! anchored on `\n`); labels and quotes are removed before lines are joined so
//! a `Prompt:` on its own line does not end up inside the text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to the raw LLM reply.
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip a leading `Prompt:` / `Positive prompt:` label
/// 4. Strip surrounding quotes
/// 5. Join lines into one, separated by `", "` where needed
/// 6. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 7. Collapse runs of spaces and duplicate commas
///
/// An empty return value means the reply carried no directive at all.
pub fn clean_directive(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = strip_label(&s);
    let s = strip_quotes(&s);
    let s = join_lines(&s);
    let s = remove_invisible_chars(&s);
    collapse_separators(&s)
}

/// Prepend `prefix` unless `directive` already starts with it.
///
/// An empty prefix leaves the directive untouched.
pub fn ensure_quality_prefix(directive: &str, prefix: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() || directive.starts_with(prefix) {
        directive.to_string()
    } else if directive.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}, {directive}")
    }
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Strip a leading label ────────────────────────────────────────────

static RE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:positive\s+)?prompt\s*:\s*").unwrap());

fn strip_label(input: &str) -> String {
    RE_LABEL.replace(input, "").to_string()
}

// ── Rule 4: Strip surrounding quotes ─────────────────────────────────────────

fn strip_quotes(input: &str) -> String {
    let t = input.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”'), ('`', '`')] {
        if t.len() >= 2 && t.starts_with(open) && t.ends_with(close) {
            let inner = &t[open.len_utf8()..t.len() - close.len_utf8()];
            return inner.trim().to_string();
        }
    }
    t.to_string()
}

// ── Rule 5: Join lines ───────────────────────────────────────────────────────

fn join_lines(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !out.is_empty() {
            out.push_str(if out.ends_with(',') { " " } else { ", " });
        }
        out.push_str(line);
    }
    out
}

// ── Rule 6: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 7: Collapse separators ──────────────────────────────────────────────

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static RE_COMMAS: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*,)+").unwrap());

fn collapse_separators(input: &str) -> String {
    let s = RE_SPACES.replace_all(input, " ");
    let s = RE_COMMAS.replace_all(&s, ",");
    s.trim()
        .trim_start_matches(',')
        .trim_end_matches(',')
        .trim()
        .to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "(masterpiece, best quality)";

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_markdown_fences("```text\na, b\n```"), "a, b");
        assert_eq!(strip_markdown_fences("```\na, b\n```"), "a, b");
        assert_eq!(strip_markdown_fences("a, b"), "a, b");
    }

    #[test]
    fn test_strip_label() {
        assert_eq!(strip_label("Prompt: 1girl, rain"), "1girl, rain");
        assert_eq!(strip_label("positive prompt:1girl"), "1girl");
        assert_eq!(strip_label("1girl, prompt: x"), "1girl, prompt: x");
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"1girl, rain\""), "1girl, rain");
        assert_eq!(strip_quotes("“1girl”"), "1girl");
        assert_eq!(strip_quotes("\"unbalanced"), "\"unbalanced");
    }

    #[test]
    fn test_join_lines() {
        assert_eq!(join_lines("a, b,\nc\n\nd"), "a, b, c, d");
    }

    #[test]
    fn test_collapse_separators() {
        assert_eq!(collapse_separators(", a,,  b , , c,"), "a, b , c");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{FEFF}"), "ab");
    }

    #[test]
    fn test_clean_directive_full_pipeline() {
        let raw = "```\r\nPrompt: \"(masterpiece, best quality), 1girl,\r\nrain, night street\"\r\n```";
        assert_eq!(
            clean_directive(raw),
            "(masterpiece, best quality), 1girl, rain, night street"
        );
    }

    #[test]
    fn test_clean_directive_empty() {
        assert_eq!(clean_directive("  \n```\n\n```  "), "");
        assert_eq!(clean_directive(""), "");
    }

    #[test]
    fn test_prefix_added_when_missing() {
        assert_eq!(
            ensure_quality_prefix("1girl, rain", PREFIX),
            "(masterpiece, best quality), 1girl, rain"
        );
    }

    #[test]
    fn test_prefix_not_duplicated() {
        let d = "(masterpiece, best quality), 1girl";
        assert_eq!(ensure_quality_prefix(d, PREFIX), d);
    }

    #[test]
    fn test_empty_prefix_is_noop() {
        assert_eq!(ensure_quality_prefix("1girl", "  "), "1girl");
    }
}
