//! Batch driver: documents are redacted independently and failures are
//! collected instead of aborting the batch.

use crate::pipeline::{InputDocument, RedactError, RedactedDocument, Redactor, Stage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A document left out of the batch output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedDocument {
    pub name: String,
    pub kind: String,
    pub stage: Stage,
    pub reason: String,
}

impl From<&RedactError> for SkippedDocument {
    fn from(err: &RedactError) -> Self {
        Self {
            name: err.name().to_string(),
            kind: err.kind().to_string(),
            stage: err.stage(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// Successful outputs, in input order.
    pub outputs: Vec<RedactedDocument>,
    pub skipped: Vec<SkippedDocument>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.outputs.len() + self.skipped.len()
    }
}

impl Redactor {
    /// Redacts every input. Runs on the rayon pool unless the configuration
    /// disables parallelism; the report follows input order either way.
    pub fn redact_batch(&self, inputs: &[InputDocument]) -> BatchReport {
        let results: Vec<Result<RedactedDocument, RedactError>> = if self.config().parallel {
            inputs.par_iter().map(|input| self.redact(input)).collect()
        } else {
            inputs.iter().map(|input| self.redact(input)).collect()
        };

        let mut report = BatchReport::default();
        for result in results {
            match result {
                Ok(doc) => report.outputs.push(doc),
                Err(e) => report.skipped.push(SkippedDocument::from(&e)),
            }
        }

        log::info!(
            "[Pipeline] batch finished: {} redacted, {} skipped",
            report.outputs.len(),
            report.skipped.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedactConfig;
    use scrub_core::{DetectionError, Detectors, EntityAnalyzer, LabelSet, Span};
    use scrub_pdf::fixture::text_pdf;
    use scrub_rules::{PatternMatcher, RecognizerRegistry};
    use std::sync::Arc;
    use std::time::Duration;

    /// The built-in analyzer, stalling on any text that mentions "stall".
    struct Stalling {
        inner: RecognizerRegistry,
        delay: Duration,
    }

    impl EntityAnalyzer for Stalling {
        fn analyze(
            &self,
            text: &str,
            labels: &LabelSet,
            language: &str,
        ) -> Result<Vec<Span>, DetectionError> {
            if text.contains("stall") {
                std::thread::sleep(self.delay);
            }
            self.inner.analyze(text, labels, language)
        }
    }

    fn stalling_redactor(parallel: bool) -> Redactor {
        let config = RedactConfig {
            parallel,
            detection_timeout_ms: Some(200),
            ..Default::default()
        };
        let analyzer = Stalling {
            inner: RecognizerRegistry::with_defaults().unwrap(),
            delay: Duration::from_millis(600),
        };
        let detectors = Detectors::new(Arc::new(PatternMatcher::new()), Arc::new(analyzer))
            .with_timeout(config.detection_timeout_ms.map(Duration::from_millis));
        Redactor::with_detectors(config, detectors)
    }

    fn inputs() -> Vec<InputDocument> {
        vec![
            InputDocument::new("one.xml", b"<r>Call John Smith</r>".to_vec()),
            InputDocument::new("two.pdf", b"%PDF-1.7 not a real file".to_vec()),
            InputDocument::new("three.pdf", text_pdf(&[&["ZIP 90210"]])),
        ]
    }

    #[test]
    fn test_corrupt_document_isolated() {
        for parallel in [true, false] {
            let config = RedactConfig {
                parallel,
                ..Default::default()
            };
            let report = Redactor::new(config).unwrap().redact_batch(&inputs());
            assert_eq!(report.total(), 3);
            let names: Vec<&str> = report.outputs.iter().map(|d| d.name.as_str()).collect();
            assert_eq!(names, ["one_Redacted.xml", "three_Redacted.pdf"]);
            assert_eq!(report.skipped.len(), 1);
            assert_eq!(report.skipped[0].name, "two.pdf");
            assert_eq!(report.skipped[0].kind, "extraction_failure");
            assert_eq!(report.skipped[0].stage, Stage::Extracted);
        }
    }

    #[test]
    fn test_detection_timeout_isolated() {
        let inputs = vec![
            InputDocument::new("one.xml", b"<r>Call John Smith</r>".to_vec()),
            InputDocument::new("slow.xml", b"<r>please stall for Jane Doe</r>".to_vec()),
            InputDocument::new("three.pdf", text_pdf(&[&["ZIP 90210"]])),
        ];
        for parallel in [true, false] {
            let report = stalling_redactor(parallel).redact_batch(&inputs);
            let names: Vec<&str> = report.outputs.iter().map(|d| d.name.as_str()).collect();
            assert_eq!(names, ["one_Redacted.xml", "three_Redacted.pdf"]);
            assert_eq!(report.skipped.len(), 1);
            assert_eq!(report.skipped[0].name, "slow.xml");
            assert_eq!(report.skipped[0].kind, "detection_failure");
            assert_eq!(report.skipped[0].stage, Stage::Detected);
            assert!(report.skipped[0].reason.contains("exceeded"), "{}", report.skipped[0].reason);
        }
    }

    #[test]
    fn test_unsupported_files_skipped() {
        let report = Redactor::new(RedactConfig::default())
            .unwrap()
            .redact_batch(&[InputDocument::new("a.docx", Vec::new())]);
        assert!(report.outputs.is_empty());
        assert_eq!(report.skipped[0].kind, "unsupported_format");
    }

    #[test]
    fn test_skipped_json_shape() {
        let skipped = SkippedDocument {
            name: "two.pdf".into(),
            kind: "extraction_failure".into(),
            stage: Stage::Extracted,
            reason: "bad xref".into(),
        };
        let json = serde_json::to_value(&skipped).unwrap();
        assert_eq!(json["stage"], "extracted");
        assert_eq!(json["kind"], "extraction_failure");
    }
}
