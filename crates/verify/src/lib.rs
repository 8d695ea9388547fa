//! Post-redaction verification.
//!
//! A redacted document is loaded again and run through the same detectors.
//! Anything still detected is reported as a residual; a clean output yields
//! none, which is what makes a second redaction pass a no-op.

use scrub_core::{Detectors, Document, DocumentKind, RedactionPlan, ResolveOptions, MASK_CHAR};
use scrub_pdf::PdfDocument;
use scrub_xml::XmlDocument;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOptions {
    /// Re-run detection over the output's extracted text.
    pub text_search: bool,
    /// Report residuals as failures instead of warnings.
    pub strict: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            text_search: true,
            strict: false,
        }
    }
}

/// A detection that survived redaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Residual {
    pub location: String,
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyResult {
    pub ok: bool,
    pub warnings: Vec<String>,
    pub residuals: Vec<Residual>,
}

/// Checks redacted `bytes` of the given format for remaining detections.
pub fn verify_output(
    kind: DocumentKind,
    bytes: &[u8],
    detectors: &Detectors,
    options: &VerifyOptions,
) -> VerifyResult {
    let checked = match kind {
        DocumentKind::Pdf => residuals::<PdfDocument>(bytes, detectors, options),
        DocumentKind::Xml => residuals::<XmlDocument>(bytes, detectors, options),
    };

    let mut result = VerifyResult {
        ok: true,
        ..Default::default()
    };
    match checked {
        Ok(residuals) => {
            for residual in &residuals {
                result.warnings.push(format!(
                    "{}: {} still present ({} chars)",
                    residual.location,
                    residual.label,
                    residual.text.chars().count()
                ));
            }
            result.ok = residuals.is_empty() || !options.strict;
            result.residuals = residuals;
        }
        Err(e) => {
            result.ok = false;
            result.warnings.push(format!("output could not be re-read: {}", e));
        }
    }

    if !result.residuals.is_empty() {
        log::warn!(
            "[Verify] {} residual detection(s) in {} output",
            result.residuals.len(),
            kind
        );
    }
    result
}

fn residuals<D: Document>(
    bytes: &[u8],
    detectors: &Detectors,
    options: &VerifyOptions,
) -> scrub_core::Result<Vec<Residual>> {
    let doc = D::load(bytes)?;
    let blocks = doc.text_blocks()?;
    if !options.text_search {
        return Ok(Vec::new());
    }

    let session = detectors.session();
    let mut found = Vec::new();
    for block in &blocks {
        let detection = doc.detect(block, &session)?;
        let entity_text = detection
            .entity_text
            .clone()
            .unwrap_or_else(|| block.text.clone());
        let plan = RedactionPlan::resolve(&block.text, detection, ResolveOptions::default());

        let structured = plan.structured.iter().map(|s| (s, block.text.as_str()));
        let entities = plan.entities.iter().map(|s| (s, entity_text.as_str()));
        for (span, text) in structured.chain(entities) {
            let value = match span.slice(text) {
                Some(v) => v,
                None => continue,
            };
            // a mask can never be a finding
            if value.chars().all(|c| c == MASK_CHAR || c.is_whitespace()) {
                continue;
            }
            found.push(Residual {
                location: block.location.to_string(),
                label: span.label.clone(),
                text: value.to_string(),
            });
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrub_core::BlockLocation;
    use scrub_rules::{PatternMatcher, RecognizerRegistry};
    use std::sync::Arc;

    fn detectors() -> Detectors {
        Detectors::new(
            Arc::new(PatternMatcher::new()),
            Arc::new(RecognizerRegistry::with_defaults().unwrap()),
        )
    }

    #[test]
    fn test_clean_xml_passes() {
        let xml = br#"<?xml version="1.0"?><r><v>Visit ***** ************</v></r>"#;
        let result = verify_output(DocumentKind::Xml, xml, &detectors(), &VerifyOptions::default());
        assert!(result.ok);
        assert!(result.residuals.is_empty());
    }

    #[test]
    fn test_residual_reported() {
        let xml = b"<r><v>Call John Smith</v></r>";
        let result = verify_output(DocumentKind::Xml, xml, &detectors(), &VerifyOptions::default());
        assert!(result.ok);
        assert_eq!(result.residuals.len(), 1);
        assert_eq!(result.residuals[0].label, "PERSON");
        assert_eq!(result.residuals[0].location, "/r/v/text()");

        let strict = VerifyOptions {
            strict: true,
            ..Default::default()
        };
        assert!(!verify_output(DocumentKind::Xml, xml, &detectors(), &strict).ok);
    }

    #[test]
    fn test_second_pass_finds_nothing() {
        let detectors = detectors();
        let session = detectors.session();
        let bytes = scrub_pdf::fixture::text_pdf(&[&["Contact John Smith at 123456"]]);
        let mut doc = PdfDocument::load(&bytes).unwrap();
        for block in doc.text_blocks().unwrap() {
            let detection = doc.detect(&block, &session).unwrap();
            let plan = RedactionPlan::resolve(&block.text, detection, ResolveOptions::default());
            doc.apply(&block, &plan).unwrap();
        }
        let out = doc.save().unwrap();

        let result = verify_output(DocumentKind::Pdf, &out, &detectors, &VerifyOptions::default());
        assert!(result.residuals.is_empty(), "{:?}", result.residuals);
        assert!(result.ok);
    }

    #[test]
    fn test_unreadable_output_fails() {
        let result = verify_output(
            DocumentKind::Pdf,
            b"garbage",
            &detectors(),
            &VerifyOptions::default(),
        );
        assert!(!result.ok);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_result_serializes() {
        let result = VerifyResult {
            ok: false,
            warnings: vec!["w".into()],
            residuals: vec![Residual {
                location: BlockLocation::Page { index: 0 }.to_string(),
                label: "PERSON".into(),
                text: "Jane Doe".into(),
            }],
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"location\":\"page 1\""));
    }
}
