//! Unified document interface.
//!
//! Every format handler implements [`Document`] so the pipeline can drive PDF
//! and XML through the same stages: load, extract, detect, apply, save.

use crate::detect::{Detection, DetectionSession};
use crate::plan::RedactionPlan;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where a text block came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockLocation {
    /// One PDF page, zero-based.
    Page { index: usize },
    /// One XML text node or attribute value.
    Node {
        /// Position among all extracted values, in document order.
        ordinal: usize,
        /// Element path such as `/root/note`.
        path: String,
        /// Attribute name, `None` for element text.
        attribute: Option<String>,
    },
}

impl std::fmt::Display for BlockLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockLocation::Page { index } => write!(f, "page {}", index + 1),
            BlockLocation::Node {
                path,
                attribute: Some(attr),
                ..
            } => write!(f, "{}/@{}", path, attr),
            BlockLocation::Node { path, .. } => write!(f, "{}/text()", path),
        }
    }
}

/// A unit of extracted text. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub location: BlockLocation,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, location: BlockLocation) -> Self {
        Self {
            text: text.into(),
            location,
        }
    }
}

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Xml,
}

impl DocumentKind {
    /// Picks the format from a file name's extension, ignoring case.
    pub fn from_name(name: &str) -> Result<Self> {
        let extension = Path::new(name)
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "xml" => Ok(DocumentKind::Xml),
            _ => Err(CoreError::UnsupportedFormat(name.to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Xml => "xml",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Format handler contract.
///
/// Every supported format implements these methods so the pipeline can move
/// a document through its stages without knowing the format.
pub trait Document: Sized {
    const KIND: DocumentKind;

    /// Loads a document.
    ///
    /// Parses raw input bytes into a document that can be redacted in memory.
    ///
    /// # Parameters
    /// - `bytes`: the complete input file
    ///
    /// # Returns
    /// - Ok: the parsed document
    /// - Err: [`CoreError::Extraction`] when the bytes are not a readable
    ///   document of this format (corrupt, encrypted, not well-formed)
    fn load(bytes: &[u8]) -> Result<Self>;

    /// Extracts text blocks.
    ///
    /// Collects every redactable piece of text: one block per PDF page, one
    /// per XML text node or attribute value.
    ///
    /// # Returns
    /// The blocks in document order, each tagged with its location
    fn text_blocks(&self) -> Result<Vec<TextBlock>>;

    /// Detects sensitive spans in one block.
    ///
    /// Runs the detectors in this format's order: PDF runs both detectors on
    /// the same text, XML runs entity analysis on the structurally masked
    /// text.
    ///
    /// # Parameters
    /// - `block`: a block returned by [`Document::text_blocks`]
    /// - `session`: the document's detection session, with its deadline
    ///
    /// # Returns
    /// Structured and entity spans, with offsets into the text each detector
    /// saw
    fn detect(&self, block: &TextBlock, session: &DetectionSession<'_>) -> Result<Detection>;

    /// Applies redactions.
    ///
    /// Destructively redacts the block's location according to the plan.
    /// Applying an empty plan leaves the document unchanged.
    ///
    /// # Parameters
    /// - `block`: the block the plan was resolved against
    /// - `plan`: resolved spans, structured pass first
    ///
    /// # Returns
    /// The number of edits made. A block from another document or format is
    /// an error.
    fn apply(&mut self, block: &TextBlock, plan: &RedactionPlan) -> Result<usize>;

    /// Cleans document metadata.
    ///
    /// Drops document-level metadata that page or node redaction cannot
    /// reach. Formats without such metadata leave the document untouched.
    ///
    /// # Returns
    /// The number of metadata items removed
    fn scrub_metadata(&mut self) -> Result<usize> {
        Ok(0)
    }

    /// Serializes the redacted document.
    ///
    /// # Returns
    /// - Ok: output bytes in the input's format
    /// - Err: [`CoreError::Serialization`] when the document cannot be written
    fn save(self) -> Result<Vec<u8>>;
}
