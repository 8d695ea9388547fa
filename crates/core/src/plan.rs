//! Span resolution.
//!
//! Structured and entity spans for a block are turned into a plan of two
//! passes, each sorted by descending start offset. Overlapping spans stay
//! separate unless merging is requested: masking is an overwrite, so applying
//! both halves of an overlap yields the same text as applying their union.

use crate::detect::Detection;
use crate::span::Span;
use serde::{Deserialize, Serialize};

/// Replacement character for redacted text.
pub const MASK_CHAR: char = '*';

/// Mask for `original`: one `*` per character.
pub fn mask_of(original: &str) -> String {
    std::iter::repeat(MASK_CHAR)
        .take(original.chars().count())
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveOptions {
    /// Merge overlapping spans of the same pass into maximal runs.
    pub merge_overlaps: bool,
}

/// Ordered, bounds-checked spans for one text block.
///
/// `structured` spans index the block text. `entities` index the text the
/// analyzer saw: the block text itself for PDF pages, the structured-masked
/// text for XML values. Masking preserves the character count, so both share
/// the same character length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedactionPlan {
    pub structured: Vec<Span>,
    pub entities: Vec<Span>,
}

impl RedactionPlan {
    pub fn resolve(text: &str, detection: Detection, options: ResolveOptions) -> Self {
        if text.is_empty() {
            return Self::default();
        }

        let entity_text = detection.entity_text.as_deref().unwrap_or(text);
        let structured = normalize(text, detection.structured, options.merge_overlaps);
        let entities = normalize(entity_text, detection.entities, options.merge_overlaps);

        Self {
            structured,
            entities,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.structured.is_empty() && self.entities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.structured.len() + self.entities.len()
    }

    /// All spans, structured pass first.
    pub fn passes(&self) -> impl Iterator<Item = &Span> {
        self.structured.iter().chain(self.entities.iter())
    }

    /// Masks `text` with the structured pass, then the entity pass.
    pub fn apply_to(&self, text: &str) -> String {
        let masked = mask_text(text, &self.structured);
        mask_text(&masked, &self.entities)
    }
}

/// Clamps, drops empty spans and orders by descending start (longer first on
/// ties).
fn normalize(text: &str, spans: Vec<Span>, merge: bool) -> Vec<Span> {
    let mut spans: Vec<Span> = spans
        .into_iter()
        .filter_map(|span| clamp(text, span))
        .collect();

    if merge {
        spans = merge_overlapping(spans);
    }

    spans.sort_by(|a, b| b.start.cmp(&a.start).then(b.end.cmp(&a.end)));
    spans
}

fn clamp(text: &str, mut span: Span) -> Option<Span> {
    let len = text.len();
    span.end = span.end.min(len);
    span.start = span.start.min(span.end);

    while !text.is_char_boundary(span.start) {
        span.start -= 1;
    }
    while !text.is_char_boundary(span.end) {
        span.end += 1;
    }

    if span.is_empty() {
        None
    } else {
        Some(span)
    }
}

fn merge_overlapping(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort_by_key(|s| (s.start, s.end));
    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());

    for span in spans {
        match merged.last_mut() {
            Some(last) if last.end > span.start => {
                last.end = last.end.max(span.end);
                last.score = last.score.max(span.score);
            }
            _ => merged.push(span),
        }
    }

    merged
}

/// Replaces every span of `text` with `*`, in the order given.
///
/// Replacement happens per character, so the character count never changes
/// and an earlier edit cannot move the offsets of a later one. Offsets past
/// the end of `text` are clamped.
pub fn mask_text(text: &str, spans: &[Span]) -> String {
    if spans.is_empty() {
        return text.to_string();
    }

    let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_index = |byte: usize| offsets.partition_point(|&o| o < byte);
    let mut chars: Vec<char> = text.chars().collect();

    for span in spans {
        let start = char_index(span.start.min(text.len()));
        let end = char_index(span.end.min(text.len()));
        for c in chars.iter_mut().take(end).skip(start) {
            *c = MASK_CHAR;
        }
    }

    chars.into_iter().collect()
}
