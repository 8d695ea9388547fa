//! Detection rules: the structured postal/account code matcher and the
//! built-in entity analyzer.

pub mod heuristics;
pub mod recognizers;
pub mod structured;

pub use recognizers::{PatternRecognizer, Recognizer, RecognizerRegistry};
pub use structured::PatternMatcher;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("invalid pattern for rule {name}: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("score for rule {name} must be within [0, 1], got {score}")]
    InvalidScore { name: String, score: f32 },
}

/// User-defined pattern recognizer, registered next to the built-in ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRule {
    pub name: String,
    /// Entity label reported for matches, e.g. `Account_number`.
    pub label: String,
    pub pattern: String,
    pub score: f32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PatternRule {
    pub fn new(name: &str, label: &str, pattern: &str, score: f32) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            pattern: pattern.to_string(),
            score,
            enabled: true,
        }
    }
}

/// Recognizers registered on top of the built-in set by default: street
/// names, a handful of cities, group affiliations and bare account numbers.
pub fn default_custom_rules() -> Vec<PatternRule> {
    vec![
        PatternRule::new(
            "road_location",
            "LOCATION",
            r"\b(?:[A-Z][a-z]+\s)+(?:Road|Street|Avenue|Lane|Boulevard)\b",
            0.6,
        ),
        PatternRule::new(
            "gpe",
            "GPE",
            r"\b(?:New York|London|Mumbai|Delhi|Paris|Tokyo)\b",
            0.6,
        ),
        PatternRule::new(
            "norp",
            "NORP",
            r"\b(?:Indian|American|Muslim|Christian|Democrat|Republican)\b",
            0.5,
        ),
        PatternRule::new("account", "Account_number", r"\b\d{6,16}\b", 0.8),
    ]
}
