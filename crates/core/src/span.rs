//! Detected spans and entity labels.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Label carried by every structured pattern match.
pub const STRUCTURED_ID: &str = "STRUCTURED_ID";

/// Entity labels requested from the analyzer when nothing else is configured.
pub const DEFAULT_ENTITIES: &[&str] = &[
    "PERSON",
    "GPE",
    "LOCATION",
    "NORP",
    "EMAIL_ADDRESS",
    "PHONE_NUMBER",
    "CREDIT_CARD",
    "US_SSN",
    "IBAN",
    "IP_ADDRESS",
    "Account_number",
];

/// Which detector produced a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanOrigin {
    /// Deterministic postal/account code pattern, always applied.
    Structured,
    /// Entity analyzer result.
    Entity,
}

/// A half-open `[start, end)` range of UTF-8 byte offsets into a text block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub label: String,
    /// Confidence in `[0, 1]`. Structured matches are always `1.0`.
    pub score: f32,
    pub origin: SpanOrigin,
}

impl Span {
    pub fn structured(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            label: STRUCTURED_ID.to_string(),
            score: 1.0,
            origin: SpanOrigin::Structured,
        }
    }

    pub fn entity(start: usize, end: usize, label: impl Into<String>, score: f32) -> Self {
        Self {
            start,
            end,
            label: label.into(),
            score: score.clamp(0.0, 1.0),
            origin: SpanOrigin::Entity,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The covered substring, if the offsets are valid for `text`.
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.get(self.start..self.end)
    }
}

/// Allowlist of entity labels passed to the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(labels.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::new(DEFAULT_ENTITIES.iter().copied())
    }
}
