//! Core data model and span resolution for document redaction.

pub mod detect;
pub mod document;
pub mod plan;
pub mod span;

pub use detect::{Detection, DetectionError, DetectionSession, Detectors, EntityAnalyzer, StructuredMatcher};
pub use document::{BlockLocation, Document, DocumentKind, TextBlock};
pub use plan::{mask_of, mask_text, RedactionPlan, ResolveOptions, MASK_CHAR};
pub use span::{LabelSet, Span, SpanOrigin, DEFAULT_ENTITIES, STRUCTURED_ID};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Document-level failures. Every variant is contained to the document that
/// raised it.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Short machine-friendly name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::UnsupportedFormat(_) => "unsupported_format",
            CoreError::Extraction(_) => "extraction_failure",
            CoreError::Detection(_) => "detection_failure",
            CoreError::Serialization(_) => "serialization_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(
            CoreError::Extraction("bad xref".into()).kind(),
            "extraction_failure"
        );
        let err: CoreError = DetectionError::UnsupportedLanguage("fr".into()).into();
        assert_eq!(err.kind(), "detection_failure");
        assert!(err.to_string().contains("fr"));
    }
}
