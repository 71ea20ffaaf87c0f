//! Highlighting of snippet annotations in plain-text pages.
//!
//! Snippets are matched with whitespace runs collapsed, so a phrase still
//! matches after the wrapper moved part of it onto the next line.

use bookclub_core::{Annotation, Locator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightSpan {
    /// Char index of the first highlighted character.
    pub start: usize,
    /// Char index one past the last highlighted character.
    pub end: usize,
    pub annotation_id: i64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSpan {
    pub line: usize,
    pub start: usize,
    pub end: usize,
    pub annotation_id: i64,
    pub color: String,
}

struct Normalized {
    chars: Vec<char>,
    /// Original char index of every normalized char.
    origin: Vec<usize>,
}

fn normalize(text: &str) -> Normalized {
    let mut chars = Vec::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len());
    let mut in_space = false;
    for (idx, ch) in text.chars().enumerate() {
        if ch.is_whitespace() {
            if !in_space && !chars.is_empty() {
                chars.push(' ');
                origin.push(idx);
            }
            in_space = true;
        } else {
            chars.push(ch);
            origin.push(idx);
            in_space = false;
        }
    }
    Normalized { chars, origin }
}

/// Spans of every snippet annotation occurring in `text`, ordered by start.
pub fn snippet_spans(text: &str, annotations: &[Annotation]) -> Vec<HighlightSpan> {
    let haystack = normalize(text);
    let mut spans = Vec::new();
    for annotation in annotations {
        let Locator::Snippet(snippet) = &annotation.locator else {
            continue;
        };
        let needle: Vec<char> = snippet
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .collect();
        if needle.is_empty() || needle.len() > haystack.chars.len() {
            continue;
        }

        let mut i = 0;
        while i + needle.len() <= haystack.chars.len() {
            if haystack.chars[i..i + needle.len()] == needle[..] {
                spans.push(HighlightSpan {
                    start: haystack.origin[i],
                    end: haystack.origin[i + needle.len() - 1] + 1,
                    annotation_id: annotation.id,
                    color: annotation.color.clone(),
                });
                i += needle.len();
            } else {
                i += 1;
            }
        }
    }
    spans.sort_by_key(|span| (span.start, span.end));
    spans
}

/// Splits snippet spans over `lines` (joined by newlines) into per-line
/// char ranges.
pub fn line_spans<S: AsRef<str>>(lines: &[S], annotations: &[Annotation]) -> Vec<LineSpan> {
    let text = lines
        .iter()
        .map(|line| line.as_ref())
        .collect::<Vec<_>>()
        .join("\n");
    let spans = snippet_spans(&text, annotations);
    if spans.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut line_start = 0;
    for (line_idx, line) in lines.iter().enumerate() {
        let line_len = line.as_ref().chars().count();
        let line_end = line_start + line_len;
        for span in &spans {
            let start = span.start.max(line_start);
            let end = span.end.min(line_end);
            if start < end {
                out.push(LineSpan {
                    line: line_idx,
                    start: start - line_start,
                    end: end - line_start,
                    annotation_id: span.annotation_id,
                    color: span.color.clone(),
                });
            }
        }
        line_start = line_end + 1;
    }
    out
}
