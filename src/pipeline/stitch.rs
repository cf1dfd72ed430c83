//! Text stitching: clean per-slice OCR output and merge it into one document.
//!
//! Vision models describe each slice independently, so the raw text of a
//! page arrives as N fragments that share content wherever slices overlap,
//! carry stray markup (an outer ```` ```markdown ```` fence, CRLF endings,
//! zero-width characters) and break sentences at the model's own line width.
//!
//! Stitching runs in two steps:
//!
//! 1. [`TextStitcher::clean`] turns one slice's raw text into paragraphs,
//!    one per line, deduplicated within the slice.
//! 2. [`TextStitcher::combine`] walks slices top to bottom and keeps each
//!    paragraph the first time its whitespace-insensitive key is seen.
//!
//! Both steps are pure and deterministic; `combine` is idempotent when its
//! output is fed back in as a single slice.

use crate::config::StitchPolicy;
use crate::output::{OcrResult, TextSource};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Cleans and merges OCR text according to a [`StitchPolicy`].
#[derive(Debug, Clone, Default)]
pub struct TextStitcher {
    policy: StitchPolicy,
}

impl TextStitcher {
    pub fn new(policy: StitchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &StitchPolicy {
        &self.policy
    }

    /// Clean one slice's raw OCR text.
    ///
    /// Returns paragraphs separated by `\n`. Blank lines and lines made only
    /// of punctuation or symbols are dropped. Consecutive lines are grouped
    /// until one ends with a terminal mark or is longer than
    /// `max_line_chars`.
    pub fn clean(&self, raw: &str) -> String {
        let s = normalise_line_endings(raw);
        let s = strip_markdown_fences(&s);
        let s = remove_invisible_chars(&s);

        let lines: Vec<&str> = s
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !is_noise_line(l))
            .collect();

        let mut paragraphs: Vec<String> = Vec::new();
        let mut buffer = String::new();
        for line in lines {
            join_line(&mut buffer, line);
            if self.closes_paragraph(line) {
                paragraphs.push(std::mem::take(&mut buffer));
            }
        }
        if !buffer.is_empty() {
            paragraphs.push(buffer);
        }

        let mut seen = HashSet::new();
        paragraphs
            .into_iter()
            .filter(|p| seen.insert(dedup_key(p)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Merge the cleaned text of `results` in slice order, dropping
    /// paragraphs already seen in an earlier slice. Paragraphs are joined
    /// with a blank line.
    pub fn combine(&self, results: &[OcrResult]) -> String {
        let mut ordered: Vec<&OcrResult> = results.iter().collect();
        ordered.sort_by_key(|r| r.index);
        combine_texts(ordered.iter().map(|r| r.clean_text.as_str()))
    }

    /// Like [`combine`](Self::combine), but falls back to the page's own
    /// text when no slice produced any.
    pub fn combine_or_fallback(
        &self,
        results: &[OcrResult],
        page_text: Option<&str>,
    ) -> (String, TextSource) {
        let combined = self.combine(results);
        if !combined.is_empty() {
            return (combined, TextSource::Ocr);
        }
        match page_text.map(str::trim) {
            Some(text) if !text.is_empty() => (text.to_string(), TextSource::PageText),
            _ => (String::new(), TextSource::Empty),
        }
    }

    fn closes_paragraph(&self, line: &str) -> bool {
        let terminal = line
            .chars()
            .last()
            .is_some_and(|c| self.policy.terminal_marks.contains(&c));
        terminal || line.chars().count() > self.policy.max_line_chars
    }
}

/// Merge already-cleaned texts, first occurrence wins.
pub fn combine_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> String {
    let mut seen = HashSet::new();
    let mut combined: Vec<&str> = Vec::new();
    for text in texts {
        for paragraph in text.lines().map(str::trim).filter(|p| !p.is_empty()) {
            if seen.insert(dedup_key(paragraph)) {
                combined.push(paragraph);
            }
        }
    }
    combined.join("\n\n")
}

// ── Pre-normalisation ────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

/// Zero-width space, BOM, soft hyphen, ZWNJ, ZWJ, word joiner.
fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{FEFF}' | '\u{00AD}' | '\u{200C}' | '\u{200D}' | '\u{2060}'
            )
        })
        .collect()
}

// ── Paragraph rules ──────────────────────────────────────────────────────

static RE_NOISE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\W_]+$").unwrap());

fn is_noise_line(line: &str) -> bool {
    RE_NOISE_LINE.is_match(line)
}

/// Lines of CJK copy join directly; two latin words get a space.
fn join_line(buffer: &mut String, line: &str) {
    let needs_space = matches!(
        (buffer.chars().last(), line.chars().next()),
        (Some(a), Some(b)) if is_ascii_word(a) && is_ascii_word(b)
    );
    if needs_space {
        buffer.push(' ');
    }
    buffer.push_str(line);
}

fn is_ascii_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn dedup_key(paragraph: &str) -> String {
    paragraph.chars().filter(|c| !c.is_whitespace()).collect()
}
