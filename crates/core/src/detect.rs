//! Detector capabilities.
//!
//! The structured matcher and the entity analyzer are built once per process
//! and shared across documents. A [`DetectionSession`] is opened per document
//! and carries that document's deadline.

use crate::plan::mask_text;
use crate::span::{LabelSet, Span};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("language not supported by analyzer: {0}")]
    UnsupportedLanguage(String),
    #[error("entity analysis exceeded {0:?}")]
    Timeout(Duration),
    #[error("analyzer error: {0}")]
    Analyzer(String),
}

/// Deterministic pattern detector for structured identifiers.
pub trait StructuredMatcher: Send + Sync {
    fn find(&self, text: &str) -> Vec<Span>;

    /// Replaces every match with `*` of equal length in one pass.
    fn mask(&self, text: &str) -> String {
        let mut spans = self.find(text);
        spans.sort_by(|a, b| b.start.cmp(&a.start));
        mask_text(text, &spans)
    }
}

/// Probabilistic entity detector.
///
/// Returned spans may overlap each other and structured matches, and satisfy
/// `start < end <= text.len()`.
pub trait EntityAnalyzer: Send + Sync {
    fn analyze(
        &self,
        text: &str,
        labels: &LabelSet,
        language: &str,
    ) -> Result<Vec<Span>, DetectionError>;
}

/// Raw detector output for one block, before resolution.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub structured: Vec<Span>,
    pub entities: Vec<Span>,
    /// Text the analyzer ran on when it differs from the block text.
    pub entity_text: Option<String>,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.structured.is_empty() && self.entities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.structured.len() + self.entities.len()
    }
}

/// Process-wide detector set.
#[derive(Clone)]
pub struct Detectors {
    structured: Arc<dyn StructuredMatcher>,
    analyzer: Arc<dyn EntityAnalyzer>,
    labels: LabelSet,
    language: String,
    timeout: Option<Duration>,
}

impl Detectors {
    pub fn new(structured: Arc<dyn StructuredMatcher>, analyzer: Arc<dyn EntityAnalyzer>) -> Self {
        Self {
            structured,
            analyzer,
            labels: LabelSet::default(),
            language: "en".to_string(),
            timeout: None,
        }
    }

    pub fn with_labels(mut self, labels: LabelSet) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Per-document budget for entity analysis.
    ///
    /// The deadline is checked before and after every analyzer call, never
    /// during one. An analyzer call is not interrupted: a call that overruns
    /// the deadline runs to completion, its spans are discarded and the
    /// session fails with [`DetectionError::Timeout`]. A document can
    /// therefore take longer than `timeout` by at most one analyzer call.
    /// Analyzers that may block for long should bound themselves.
    ///
    /// # Parameters
    /// - `timeout`: budget counted from [`Detectors::session`]; `None`
    ///   disables the check
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn structured_matcher(&self) -> &dyn StructuredMatcher {
        self.structured.as_ref()
    }

    /// Opens a session for one document; the timeout starts now.
    pub fn session(&self) -> DetectionSession<'_> {
        DetectionSession {
            detectors: self,
            deadline: self.timeout.map(|t| Instant::now() + t),
        }
    }
}

impl std::fmt::Debug for Detectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detectors")
            .field("labels", &self.labels)
            .field("language", &self.language)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub struct DetectionSession<'a> {
    detectors: &'a Detectors,
    deadline: Option<Instant>,
}

impl DetectionSession<'_> {
    pub fn structured(&self, text: &str) -> Vec<Span> {
        self.detectors.structured.find(text)
    }

    pub fn mask_structured(&self, text: &str) -> String {
        self.detectors.structured.mask(text)
    }

    /// Runs the analyzer, failing once the document's deadline has passed.
    ///
    /// A call that starts in time but returns after the deadline still fails;
    /// see [`Detectors::with_timeout`].
    pub fn entities(&self, text: &str) -> Result<Vec<Span>, DetectionError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.check_deadline()?;
        let spans = self
            .detectors
            .analyzer
            .analyze(text, &self.detectors.labels, &self.detectors.language)?;
        self.check_deadline()?;
        log::debug!("[Detection] {} entity span(s)", spans.len());
        Ok(spans)
    }

    /// Both detectors over the same text.
    pub fn detect(&self, text: &str) -> Result<Detection, DetectionError> {
        Ok(Detection {
            structured: self.structured(text),
            entities: self.entities(text)?,
            entity_text: None,
        })
    }

    /// Structured matches first; the analyzer then sees the masked text.
    pub fn detect_after_masking(&self, text: &str) -> Result<Detection, DetectionError> {
        let structured = self.structured(text);
        if structured.is_empty() {
            return self.detect(text);
        }
        let masked = self.mask_structured(text);
        let entities = self.entities(&masked)?;
        Ok(Detection {
            structured,
            entities,
            entity_text: Some(masked),
        })
    }

    fn check_deadline(&self) -> Result<(), DetectionError> {
        match (self.deadline, self.detectors.timeout) {
            (Some(deadline), Some(timeout)) if Instant::now() >= deadline => {
                log::warn!("[Detection] deadline of {:?} exceeded", timeout);
                Err(DetectionError::Timeout(timeout))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Digits;

    impl StructuredMatcher for Digits {
        fn find(&self, text: &str) -> Vec<Span> {
            let mut spans = Vec::new();
            let mut start = None;
            for (i, c) in text.char_indices() {
                match (c.is_ascii_digit(), start) {
                    (true, None) => start = Some(i),
                    (false, Some(s)) => {
                        spans.push(Span::structured(s, i));
                        start = None;
                    }
                    _ => {}
                }
            }
            if let Some(s) = start {
                spans.push(Span::structured(s, text.len()));
            }
            spans
        }
    }

    /// Flags every occurrence of "Smith" and records what it was shown.
    struct Surnames {
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl EntityAnalyzer for Surnames {
        fn analyze(
            &self,
            text: &str,
            labels: &LabelSet,
            _language: &str,
        ) -> Result<Vec<Span>, DetectionError> {
            self.seen.lock().unwrap().push(text.to_string());
            if !labels.contains("PERSON") {
                return Ok(Vec::new());
            }
            Ok(text
                .match_indices("Smith")
                .map(|(i, m)| Span::entity(i, i + m.len(), "PERSON", 0.85))
                .collect())
        }
    }

    struct Failing;

    impl EntityAnalyzer for Failing {
        fn analyze(&self, _: &str, _: &LabelSet, _: &str) -> Result<Vec<Span>, DetectionError> {
            Err(DetectionError::Analyzer("model unavailable".into()))
        }
    }

    struct Slow(Duration);

    impl EntityAnalyzer for Slow {
        fn analyze(&self, _: &str, _: &LabelSet, _: &str) -> Result<Vec<Span>, DetectionError> {
            std::thread::sleep(self.0);
            Ok(vec![Span::entity(0, 4, "PERSON", 0.9)])
        }
    }

    fn surnames() -> Arc<Surnames> {
        Arc::new(Surnames {
            seen: std::sync::Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_detect_after_masking_feeds_masked_text() {
        let analyzer = surnames();
        let detectors = Detectors::new(Arc::new(Digits), analyzer.clone());
        let detection = detectors
            .session()
            .detect_after_masking("Smith 42")
            .unwrap();
        assert_eq!(detection.structured.len(), 1);
        assert_eq!(detection.entities.len(), 1);
        assert_eq!(detection.entity_text.as_deref(), Some("Smith **"));
        assert_eq!(analyzer.seen.lock().unwrap().as_slice(), ["Smith **"]);
    }

    #[test]
    fn test_detect_uses_original_text() {
        let analyzer = surnames();
        let detectors = Detectors::new(Arc::new(Digits), analyzer.clone());
        let detection = detectors.session().detect("Smith 42").unwrap();
        assert!(detection.entity_text.is_none());
        assert_eq!(analyzer.seen.lock().unwrap().as_slice(), ["Smith 42"]);
    }

    #[test]
    fn test_blank_text_skips_analyzer() {
        let analyzer = surnames();
        let detectors = Detectors::new(Arc::new(Digits), analyzer.clone());
        assert!(detectors.session().entities("   \n").unwrap().is_empty());
        assert!(analyzer.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_labels_are_forwarded() {
        let detectors = Detectors::new(Arc::new(Digits), surnames())
            .with_labels(LabelSet::new(["EMAIL_ADDRESS"]));
        assert!(detectors.session().entities("Smith").unwrap().is_empty());
    }

    #[test]
    fn test_analyzer_error_propagates() {
        let detectors = Detectors::new(Arc::new(Digits), Arc::new(Failing));
        let err = detectors.session().detect("John Smith").unwrap_err();
        assert!(matches!(err, DetectionError::Analyzer(_)));
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let detectors = Detectors::new(Arc::new(Digits), surnames())
            .with_timeout(Some(Duration::from_millis(0)));
        let err = detectors.session().entities("John Smith").unwrap_err();
        assert!(matches!(err, DetectionError::Timeout(_)));
    }

    #[test]
    fn test_overrunning_call_discarded() {
        let detectors = Detectors::new(Arc::new(Digits), Arc::new(Slow(Duration::from_millis(50))))
            .with_timeout(Some(Duration::from_millis(10)));
        let session = detectors.session();
        let started = Instant::now();
        let err = session.entities("John Smith").unwrap_err();
        assert!(matches!(err, DetectionError::Timeout(t) if t == Duration::from_millis(10)));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_call_within_budget_succeeds() {
        let detectors = Detectors::new(Arc::new(Digits), Arc::new(Slow(Duration::from_millis(1))))
            .with_timeout(Some(Duration::from_secs(30)));
        assert_eq!(detectors.session().entities("John Smith").unwrap().len(), 1);
    }

    #[test]
    fn test_default_mask_uses_find() {
        assert_eq!(Digits.mask("a 12 b 345"), "a ** b ***");
    }
}
