//! Built-in entity analyzer.
//!
//! A [`RecognizerRegistry`] holds a list of recognizers, each reporting one
//! label. Pattern recognizers pair a regex with an optional checksum
//! validator; person names come from the dictionary heuristic.

use crate::heuristics;
use crate::{default_custom_rules, PatternRule, RulesError};
use regex::Regex;
use scrub_core::{DetectionError, EntityAnalyzer, LabelSet, Span};

/// Confirms a regex candidate before it is reported.
pub type Validator = fn(&str) -> bool;

pub trait Recognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Entity label attached to every span this recognizer reports.
    fn label(&self) -> &str;

    fn recognize(&self, text: &str) -> Vec<Span>;
}

pub struct PatternRecognizer {
    name: String,
    label: String,
    regex: Regex,
    score: f32,
    validator: Option<Validator>,
}

impl PatternRecognizer {
    pub fn new(name: &str, label: &str, pattern: &str, score: f32) -> Result<Self, RulesError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(RulesError::InvalidScore {
                name: name.to_string(),
                score,
            });
        }
        let regex = Regex::new(pattern).map_err(|source| RulesError::InvalidPattern {
            name: name.to_string(),
            source,
        })?;
        Ok(Self {
            name: name.to_string(),
            label: label.to_string(),
            regex,
            score,
            validator: None,
        })
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn from_rule(rule: &PatternRule) -> Result<Self, RulesError> {
        Self::new(&rule.name, &rule.label, &rule.pattern, rule.score)
    }
}

impl Recognizer for PatternRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn recognize(&self, text: &str) -> Vec<Span> {
        self.regex
            .find_iter(text)
            .filter(|m| self.validator.map_or(true, |valid| valid(m.as_str())))
            .map(|m| Span::entity(m.start(), m.end(), self.label.as_str(), self.score))
            .collect()
    }
}

/// Person names from the given-name dictionary and honorifics.
pub struct PersonNameRecognizer {
    score: f32,
}

impl Default for PersonNameRecognizer {
    fn default() -> Self {
        Self { score: 0.85 }
    }
}

impl Recognizer for PersonNameRecognizer {
    fn name(&self) -> &str {
        "person_name"
    }

    fn label(&self) -> &str {
        "PERSON"
    }

    fn recognize(&self, text: &str) -> Vec<Span> {
        heuristics::match_person_name(text)
            .into_iter()
            .map(|m| Span::entity(m.start, m.end, "PERSON", self.score))
            .collect()
    }
}

const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
const PHONE_PATTERN: &str =
    r"(?:\+[0-9]{1,3}[ .-]?)?(?:\([0-9]{3}\)[ ]?|\b[0-9]{3}[ .-])[0-9]{3}[ .-][0-9]{4}\b";
const CREDIT_CARD_PATTERN: &str = r"\b(?:[0-9]{4}[ -]?){3}[0-9]{1,7}\b";
const SSN_PATTERN: &str = r"\b[0-9]{3}-[0-9]{2}-[0-9]{4}\b";
const IBAN_PATTERN: &str = r"\b[A-Z]{2}[0-9]{2}(?:[ ]?[A-Z0-9]{4}){2,7}(?:[ ]?[A-Z0-9]{1,3})?\b";
const IPV4_PATTERN: &str = r"\b(?:(?:25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])\.){3}(?:25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])\b";
const IPV6_PATTERN: &str = r"(?i)\b[0-9a-f]{1,4}(?::{1,2}[0-9a-f]{1,4}){2,7}\b";

pub struct RecognizerRegistry {
    recognizers: Vec<Box<dyn Recognizer>>,
    score_threshold: f32,
    languages: Vec<String>,
}

impl RecognizerRegistry {
    /// Empty registry supporting English only.
    pub fn new() -> Self {
        Self {
            recognizers: Vec::new(),
            score_threshold: 0.0,
            languages: vec!["en".to_string()],
        }
    }

    /// Built-in recognizers plus [`default_custom_rules`].
    pub fn with_defaults() -> Result<Self, RulesError> {
        let mut registry = Self::new();
        registry.add_recognizer(Box::new(PersonNameRecognizer::default()));
        registry.add_recognizer(Box::new(PatternRecognizer::new(
            "email",
            "EMAIL_ADDRESS",
            EMAIL_PATTERN,
            1.0,
        )?));
        registry.add_recognizer(Box::new(PatternRecognizer::new(
            "phone",
            "PHONE_NUMBER",
            PHONE_PATTERN,
            0.4,
        )?));
        registry.add_recognizer(Box::new(
            PatternRecognizer::new("credit_card", "CREDIT_CARD", CREDIT_CARD_PATTERN, 1.0)?
                .with_validator(heuristics::luhn_valid),
        ));
        registry.add_recognizer(Box::new(
            PatternRecognizer::new("us_ssn", "US_SSN", SSN_PATTERN, 0.5)?
                .with_validator(heuristics::ssn_valid),
        ));
        registry.add_recognizer(Box::new(
            PatternRecognizer::new("iban", "IBAN", IBAN_PATTERN, 1.0)?
                .with_validator(heuristics::iban_valid),
        ));
        registry.add_recognizer(Box::new(PatternRecognizer::new(
            "ipv4",
            "IP_ADDRESS",
            IPV4_PATTERN,
            0.6,
        )?));
        registry.add_recognizer(Box::new(
            PatternRecognizer::new("ipv6", "IP_ADDRESS", IPV6_PATTERN, 0.6)?
                .with_validator(heuristics::ipv6_valid),
        ));

        for rule in default_custom_rules() {
            registry.add_rule(&rule)?;
        }
        Ok(registry)
    }

    pub fn add_recognizer(&mut self, recognizer: Box<dyn Recognizer>) {
        log::debug!(
            "[Rules] registered recognizer {} ({})",
            recognizer.name(),
            recognizer.label()
        );
        self.recognizers.push(recognizer);
    }

    /// Compiles and registers a pattern rule. Disabled rules are skipped.
    pub fn add_rule(&mut self, rule: &PatternRule) -> Result<(), RulesError> {
        if !rule.enabled {
            log::debug!("[Rules] skipping disabled rule {}", rule.name);
            return Ok(());
        }
        let recognizer = PatternRecognizer::from_rule(rule)?;
        self.add_recognizer(Box::new(recognizer));
        Ok(())
    }

    /// Spans scoring below the threshold are dropped.
    pub fn set_score_threshold(&mut self, threshold: f32) {
        self.score_threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn score_threshold(&self) -> f32 {
        self.score_threshold
    }

    pub fn supports_language(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l.eq_ignore_ascii_case(language))
    }

    pub fn len(&self) -> usize {
        self.recognizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recognizers.is_empty()
    }
}

impl Default for RecognizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityAnalyzer for RecognizerRegistry {
    fn analyze(
        &self,
        text: &str,
        labels: &LabelSet,
        language: &str,
    ) -> Result<Vec<Span>, DetectionError> {
        if !self.supports_language(language) {
            return Err(DetectionError::UnsupportedLanguage(language.to_string()));
        }

        let mut spans: Vec<Span> = self
            .recognizers
            .iter()
            .filter(|r| labels.contains(r.label()))
            .flat_map(|r| r.recognize(text))
            .filter(|s| s.score >= self.score_threshold && s.start < s.end && s.end <= text.len())
            .collect();

        spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        log::debug!("[Rules] {} entity spans", spans.len());
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(text: &str) -> Vec<(String, String)> {
        let registry = RecognizerRegistry::with_defaults().unwrap();
        registry
            .analyze(text, &LabelSet::default(), "en")
            .unwrap()
            .into_iter()
            .map(|s| (s.label.clone(), text[s.start..s.end].to_string()))
            .collect()
    }

    fn has(found: &[(String, String)], label: &str, value: &str) -> bool {
        found.iter().any(|(l, v)| l == label && v == value)
    }

    #[test]
    fn test_person_and_account_number() {
        let spans = found("Contact John Smith at 123456");
        assert!(has(&spans, "PERSON", "John Smith"));
        assert!(has(&spans, "Account_number", "123456"));
    }

    #[test]
    fn test_email_and_phone() {
        let spans = found("Mail jane.doe@example.com or call (555) 123-4567.");
        assert!(has(&spans, "EMAIL_ADDRESS", "jane.doe@example.com"));
        assert!(has(&spans, "PHONE_NUMBER", "(555) 123-4567"));
    }

    #[test]
    fn test_validated_patterns() {
        let spans = found("Card 4111 1111 1111 1111, SSN 123-45-6789");
        assert!(has(&spans, "CREDIT_CARD", "4111 1111 1111 1111"));
        assert!(has(&spans, "US_SSN", "123-45-6789"));

        let rejected = found("Card 4111 1111 1111 1112, SSN 000-45-6789");
        assert!(!rejected.iter().any(|(l, _)| l == "CREDIT_CARD" || l == "US_SSN"));
    }

    #[test]
    fn test_iban_and_ip() {
        let spans = found("IBAN GB82 WEST 1234 5698 7654 32 from 192.168.0.1 and 2001:db8::1");
        assert!(has(&spans, "IBAN", "GB82 WEST 1234 5698 7654 32"));
        assert!(has(&spans, "IP_ADDRESS", "192.168.0.1"));
        assert!(has(&spans, "IP_ADDRESS", "2001:db8::1"));
    }

    #[test]
    fn test_custom_defaults() {
        let spans = found("She moved from London to Baker Street");
        assert!(has(&spans, "GPE", "London"));
        assert!(has(&spans, "LOCATION", "Baker Street"));
    }

    #[test]
    fn test_label_filter() {
        let registry = RecognizerRegistry::with_defaults().unwrap();
        let labels = LabelSet::new(["EMAIL_ADDRESS"]);
        let spans = registry
            .analyze("John Smith <john@example.org> 123456", &labels, "en")
            .unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].label, "EMAIL_ADDRESS");
    }

    #[test]
    fn test_score_threshold() {
        let mut registry = RecognizerRegistry::with_defaults().unwrap();
        registry.set_score_threshold(0.5);
        let spans = registry
            .analyze("call 555-123-4567", &LabelSet::default(), "en")
            .unwrap();
        assert!(spans.iter().all(|s| s.label != "PHONE_NUMBER"));
    }

    #[test]
    fn test_unsupported_language() {
        let registry = RecognizerRegistry::with_defaults().unwrap();
        let err = registry
            .analyze("Hallo", &LabelSet::default(), "de")
            .unwrap_err();
        assert!(matches!(err, DetectionError::UnsupportedLanguage(ref l) if l == "de"));
    }

    #[test]
    fn test_add_rule() {
        let mut registry = RecognizerRegistry::new();
        registry
            .add_rule(&PatternRule::new("badge", "BADGE_ID", r"B-\d{4}", 0.7))
            .unwrap();
        let labels = LabelSet::new(["BADGE_ID"]);
        let spans = registry.analyze("badge B-1234", &labels, "en").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!((spans[0].start, spans[0].end), (6, 12));

        let mut disabled = PatternRule::new("off", "BADGE_ID", r"B-\d{4}", 0.7);
        disabled.enabled = false;
        let mut empty = RecognizerRegistry::new();
        empty.add_rule(&disabled).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_invalid_rule() {
        let err = PatternRecognizer::new("bad", "X", "(", 0.5).err().unwrap();
        assert!(matches!(err, RulesError::InvalidPattern { .. }));
        let err = PatternRecognizer::new("bad", "X", "x", 1.5).err().unwrap();
        assert!(matches!(err, RulesError::InvalidScore { .. }));
    }
}
