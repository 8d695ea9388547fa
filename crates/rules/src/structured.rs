//! Structured identifier matcher.
//!
//! One alternation covers UK-style postcodes, US ZIP / ZIP+4 codes and
//! six-digit postal codes. Letters are matched case-sensitively and there is
//! no checksum: a false positive costs a few masked characters, a false
//! negative leaks the code.

use once_cell::sync::Lazy;
use regex::Regex;
use scrub_core::{mask_of, Span, StructuredMatcher};

const POSTAL_PATTERNS: [&str; 3] = [
    // UK: outward code, optional space, inward code
    r"\b[A-Z]{1,2}[0-9][A-Z0-9]?\s*[0-9][A-Z]{2}\b",
    // US ZIP and ZIP+4
    r"\b[0-9]{5}(?:-[0-9]{4})?\b",
    // six-digit postal codes
    r"\b[0-9]{6}\b",
];

static POSTAL_REGEX: Lazy<Regex> = Lazy::new(|| {
    let combined = POSTAL_PATTERNS
        .iter()
        .map(|p| format!("(?:{})", p))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&combined).expect("postal patterns must compile")
});

/// Stateless; cheap to clone and share across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternMatcher;

impl PatternMatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn regex(&self) -> &'static Regex {
        &POSTAL_REGEX
    }
}

impl StructuredMatcher for PatternMatcher {
    fn find(&self, text: &str) -> Vec<Span> {
        POSTAL_REGEX
            .find_iter(text)
            .map(|m| Span::structured(m.start(), m.end()))
            .collect()
    }

    fn mask(&self, text: &str) -> String {
        POSTAL_REGEX
            .replace_all(text, |caps: &regex::Captures| mask_of(&caps[0]))
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(text: &str) -> Vec<&str> {
        PatternMatcher
            .find(text)
            .iter()
            .map(|s| &text[s.start..s.end])
            .collect()
    }

    #[test]
    fn test_us_zip() {
        assert_eq!(matches("Beverly Hills, CA 90210"), vec!["90210"]);
        assert_eq!(matches("ZIP 90210-1234."), vec!["90210-1234"]);
    }

    #[test]
    fn test_six_digit_code() {
        assert_eq!(matches("Bengaluru 560001"), vec!["560001"]);
        assert!(matches("order 1234567").is_empty());
    }

    #[test]
    fn test_uk_postcode() {
        assert_eq!(matches("London SW1A 1AA"), vec!["SW1A 1AA"]);
        assert_eq!(matches("M11AE"), vec!["M11AE"]);
        assert!(matches("sw1a 1aa").is_empty());
    }

    #[test]
    fn test_labels_and_scores() {
        let spans = PatternMatcher.find("90210 and 560001");
        assert_eq!(spans.len(), 2);
        assert!(spans
            .iter()
            .all(|s| s.label == scrub_core::STRUCTURED_ID && s.score == 1.0));
    }

    #[test]
    fn test_mask_preserves_length() {
        let masked = PatternMatcher.mask("Contact John Smith at 123456");
        assert_eq!(masked, "Contact John Smith at ******");
        assert_eq!(PatternMatcher.mask("90210-1234"), "**********");
    }

    #[test]
    fn test_masked_text_has_no_matches() {
        let masked = PatternMatcher.mask("SW1A 1AA, 90210, 560001");
        assert!(PatternMatcher.find(&masked).is_empty());
    }
}
