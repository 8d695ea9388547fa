//! PDF redaction on lopdf.
//!
//! Page text is laid out from the content stream and the Form XObjects it
//! draws ([`text`]), detected spans
//! are located by literal search and registered as `/Redact` annotations
//! ([`annotations`]), and each page is then flushed once ([`redact`]):
//! covered glyphs are removed from the content stream and the areas are
//! painted over.

pub mod annotations;
pub mod fonts;
pub mod metadata;
pub mod redact;
pub mod text;
pub mod types;
pub mod utils;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixture;

pub use metadata::CleanResult;
pub use text::{Glyph, PageLayout, Source};
pub use types::{Color, RedactAnnot, Rect, BLACK, WHITE};

use lopdf::ObjectId;
use scrub_core::{
    mask_of, BlockLocation, CoreError, Detection, DetectionSession, Document, DocumentKind,
    RedactionPlan, TextBlock,
};
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("failed to parse PDF: {0}")]
    Load(#[from] lopdf::Error),
    #[error("encrypted PDFs are not supported")]
    Encrypted,
    #[error("page {0:?} is missing or malformed")]
    Page(ObjectId),
    #[error("page index {0} is out of range")]
    PageIndex(usize),
    #[error("content stream error: {0}")]
    Content(String),
    #[error("form XObject {0:?} is missing or cannot be rewritten")]
    Form(ObjectId),
    #[error("failed to write PDF: {0}")]
    Save(String),
}

impl From<PdfError> for CoreError {
    fn from(err: PdfError) -> Self {
        match err {
            PdfError::Save(_) => CoreError::Serialization(err.to_string()),
            other => CoreError::Extraction(other.to_string()),
        }
    }
}

/// A parsed PDF being redacted in memory.
pub struct PdfDocument {
    doc: lopdf::Document,
    pages: Vec<ObjectId>,
    fill: Color,
}

impl PdfDocument {
    /// Parses a PDF held in memory.
    ///
    /// # Parameters
    /// - `bytes`: the complete file
    ///
    /// # Returns
    /// - Ok: the document with its pages in order and a white fill
    /// - Err: [`PdfError::Load`] for unreadable files, [`PdfError::Encrypted`]
    ///   when the trailer names an `/Encrypt` dictionary
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PdfError> {
        let doc = lopdf::Document::load_mem(bytes)?;
        if doc.trailer.has(b"Encrypt") {
            return Err(PdfError::Encrypted);
        }
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        log::debug!("[PDF] loaded document with {} page(s)", pages.len());
        Ok(Self {
            doc,
            pages,
            fill: WHITE,
        })
    }

    /// Fill colour of redacted areas; white unless changed.
    pub fn with_fill(mut self, fill: Color) -> Self {
        self.fill = fill;
        self
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_id(&self, index: usize) -> Result<ObjectId, PdfError> {
        self.pages
            .get(index)
            .copied()
            .ok_or(PdfError::PageIndex(index))
    }

    /// Lays out the glyphs of one page, including those drawn by forms.
    ///
    /// # Parameters
    /// - `index`: zero-based page index
    ///
    /// # Returns
    /// - Ok: the page's glyphs in drawing order
    /// - Err: the index is out of range, or the page or one of its forms
    ///   cannot be decoded
    pub fn layout(&self, index: usize) -> Result<PageLayout, PdfError> {
        let (_, layout) = text::load_page(&self.doc, self.page_id(index)?)?;
        Ok(layout)
    }

    /// Text of one page, one line per baseline.
    pub fn page_text(&self, index: usize) -> Result<String, PdfError> {
        Ok(self.layout(index)?.text())
    }

    /// Boxes of every occurrence of `needle` on the page.
    ///
    /// # Parameters
    /// - `index`: zero-based page index
    /// - `needle`: literal text; case and spacing must match the page text
    ///
    /// # Returns
    /// One rectangle per occurrence and line, in page space. Empty when the
    /// needle does not occur.
    pub fn search_for(&self, index: usize, needle: &str) -> Result<Vec<Rect>, PdfError> {
        Ok(self.layout(index)?.search_for(needle))
    }

    /// Registers a pending `/Redact` annotation; nothing is removed until
    /// [`PdfDocument::apply_redactions`].
    ///
    /// # Parameters
    /// - `index`: zero-based page index
    /// - `rect`: area to redact, in page space
    /// - `overlay_text`: text painted over the area once applied
    ///
    /// # Returns
    /// - Ok: the id of the new annotation object
    /// - Err: the index is out of range or the page is malformed
    pub fn add_redact_annot(
        &mut self,
        index: usize,
        rect: Rect,
        overlay_text: &str,
    ) -> Result<ObjectId, PdfError> {
        let page_id = self.page_id(index)?;
        annotations::add_redact_annot(&mut self.doc, page_id, rect, overlay_text, self.fill)
    }

    /// Flushes the page's pending redactions.
    ///
    /// Covered glyphs are removed from the page content and from any form
    /// it draws, the areas are filled and overlaid, and the `/Redact`
    /// annotations are dropped.
    ///
    /// # Parameters
    /// - `index`: zero-based page index
    ///
    /// # Returns
    /// - Ok: number of redaction areas applied
    /// - Err: the page or a form it draws cannot be rewritten
    pub fn apply_redactions(&mut self, index: usize) -> Result<usize, PdfError> {
        let page_id = self.page_id(index)?;
        redact::apply_redactions(&mut self.doc, page_id)
    }

    /// Marks every occurrence of every planned substring on the page, then
    /// applies the page's redactions in one flush.
    ///
    /// Structured spans are placed before entity spans. A substring that
    /// recurs elsewhere on the page is redacted everywhere.
    ///
    /// # Parameters
    /// - `index`: zero-based page index
    /// - `text`: the page text the plan's offsets refer to
    /// - `plan`: resolved spans for that text
    ///
    /// # Returns
    /// - Ok: number of areas redacted, zero when no planned substring is
    ///   found on the page
    /// - Err: the page cannot be laid out or rewritten
    pub fn redact_page(
        &mut self,
        index: usize,
        text: &str,
        plan: &RedactionPlan,
    ) -> Result<usize, PdfError> {
        let layout = self.layout(index)?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut added = 0;

        for span in plan.passes() {
            let substring = match span.slice(text) {
                Some(s) if !s.trim().is_empty() => s,
                _ => continue,
            };
            let overlay = mask_of(substring);
            for rect in layout.search_for(substring) {
                if !seen.insert(rect.pos_key()) {
                    continue;
                }
                self.add_redact_annot(index, rect, &overlay)?;
                added += 1;
            }
        }

        if added == 0 {
            return Ok(0);
        }
        self.apply_redactions(index)
    }

    /// Removes identifying Info entries and XMP metadata.
    ///
    /// # Returns
    /// What was removed. A failure while removing XMP is logged and the Info
    /// result is still returned.
    pub fn clean_metadata(&mut self) -> CleanResult {
        let mut result = metadata::clean_info_dict(&mut self.doc);
        match metadata::clean_xmp_metadata(&mut self.doc) {
            Ok(xmp) => result.merge(xmp),
            Err(e) => log::warn!("[PDF] XMP metadata not cleaned: {}", e),
        }
        result
    }

    /// Serializes the document after pruning unreachable objects.
    ///
    /// # Returns
    /// - Ok: the complete output file
    /// - Err: [`PdfError::Save`] when lopdf cannot write it
    pub fn to_bytes(mut self) -> Result<Vec<u8>, PdfError> {
        // replaced content streams and removed annotations must not be written
        self.doc.prune_objects();
        let mut bytes = Vec::new();
        self.doc
            .save_to(&mut bytes)
            .map_err(|e| PdfError::Save(e.to_string()))?;
        Ok(bytes)
    }
}

impl Document for PdfDocument {
    const KIND: DocumentKind = DocumentKind::Pdf;

    fn load(bytes: &[u8]) -> scrub_core::Result<Self> {
        Ok(Self::from_bytes(bytes)?)
    }

    fn text_blocks(&self) -> scrub_core::Result<Vec<TextBlock>> {
        let mut blocks = Vec::with_capacity(self.pages.len());
        for index in 0..self.pages.len() {
            let text = self.page_text(index)?;
            blocks.push(TextBlock::new(text, BlockLocation::Page { index }));
        }
        Ok(blocks)
    }

    fn detect(
        &self,
        block: &TextBlock,
        session: &DetectionSession<'_>,
    ) -> scrub_core::Result<Detection> {
        Ok(session.detect(&block.text)?)
    }

    fn apply(&mut self, block: &TextBlock, plan: &RedactionPlan) -> scrub_core::Result<usize> {
        match block.location {
            BlockLocation::Page { index } => Ok(self.redact_page(index, &block.text, plan)?),
            ref other => Err(CoreError::Extraction(format!(
                "{} is not a PDF page",
                other
            ))),
        }
    }

    fn scrub_metadata(&mut self) -> scrub_core::Result<usize> {
        Ok(self.clean_metadata().items_removed)
    }

    fn save(self) -> scrub_core::Result<Vec<u8>> {
        Ok(self.to_bytes()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{form_pdf, text_pdf};
    use scrub_core::{ResolveOptions, Span};

    fn plan_for(text: &str, structured: Vec<Span>, entities: Vec<Span>) -> RedactionPlan {
        RedactionPlan::resolve(
            text,
            Detection {
                structured,
                entities,
                entity_text: None,
            },
            ResolveOptions::default(),
        )
    }

    #[test]
    fn test_text_blocks_per_page() {
        let bytes = text_pdf(&[&["Contact John Smith at 123456"], &["Page two", "90210"]]);
        let doc = PdfDocument::load(&bytes).unwrap();
        let blocks = doc.text_blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "Contact John Smith at 123456");
        assert_eq!(blocks[1].text, "Page two\n90210");
        assert_eq!(blocks[1].location, BlockLocation::Page { index: 1 });
    }

    #[test]
    fn test_redact_removes_text() {
        let bytes = text_pdf(&[&["Contact John Smith at 123456"]]);
        let mut doc = PdfDocument::load(&bytes).unwrap();
        let block = doc.text_blocks().unwrap().remove(0);
        let plan = plan_for(
            &block.text,
            vec![Span::structured(22, 28)],
            vec![Span::entity(8, 18, "PERSON", 0.85)],
        );
        assert_eq!(doc.apply(&block, &plan).unwrap(), 2);

        let out = doc.save().unwrap();
        let text = PdfDocument::load(&out).unwrap().page_text(0).unwrap();
        assert!(!text.contains("123456"), "{}", text);
        assert!(!text.contains("John"), "{}", text);
        assert!(!text.contains("Smith"), "{}", text);
        assert!(text.contains("Contact"));
        assert!(text.contains("******"));
        assert!(text.contains("**********"));
        // the redacted bytes are gone from the file, not just hidden
        assert!(!String::from_utf8_lossy(&out).contains("123456"));
    }

    #[test]
    fn test_recurring_substring_redacted_everywhere() {
        let bytes = text_pdf(&[&["Room 42 is next to room 42"]]);
        let mut doc = PdfDocument::load(&bytes).unwrap();
        let block = doc.text_blocks().unwrap().remove(0);
        let plan = plan_for(&block.text, vec![Span::entity(5, 7, "X", 0.9)], vec![]);
        assert_eq!(doc.apply(&block, &plan).unwrap(), 2);

        let out = doc.save().unwrap();
        let text = PdfDocument::load(&out).unwrap().page_text(0).unwrap();
        assert!(!text.contains("42"), "{}", text);
        assert_eq!(text.matches("**").count(), 2);
    }

    #[test]
    fn test_duplicate_boxes_registered_once() {
        let bytes = text_pdf(&[&["ZIP 90210"]]);
        let mut doc = PdfDocument::load(&bytes).unwrap();
        let block = doc.text_blocks().unwrap().remove(0);
        let plan = plan_for(
            &block.text,
            vec![Span::structured(4, 9)],
            vec![Span::entity(4, 9, "Account_number", 0.8)],
        );
        assert_eq!(doc.apply(&block, &plan).unwrap(), 1);
    }

    #[test]
    fn test_whitespace_spans_skipped() {
        let bytes = text_pdf(&[&["a   b"]]);
        let mut doc = PdfDocument::load(&bytes).unwrap();
        let block = doc.text_blocks().unwrap().remove(0);
        let plan = plan_for(&block.text, vec![], vec![Span::entity(1, 4, "X", 0.5)]);
        assert_eq!(doc.apply(&block, &plan).unwrap(), 0);
    }

    #[test]
    fn test_clean_metadata() {
        let bytes = text_pdf(&[&["hello"]]);
        let mut doc = PdfDocument::load(&bytes).unwrap();
        assert_eq!(doc.scrub_metadata().unwrap(), 3);
        let out = doc.save().unwrap();
        assert!(!String::from_utf8_lossy(&out).contains("John Smith"));
    }

    #[test]
    fn test_invalid_bytes() {
        let err = PdfDocument::load(b"%PDF-1.5 not really").err().unwrap();
        assert_eq!(err.kind(), "extraction_failure");
    }

    #[test]
    fn test_page_index_out_of_range() {
        let bytes = text_pdf(&[&["one page"]]);
        let doc = PdfDocument::load(&bytes).unwrap();
        assert!(matches!(doc.page_text(3), Err(PdfError::PageIndex(3))));
    }

    #[test]
    fn test_form_xobject_text_redacted() {
        let bytes = form_pdf(&["Contact John Smith at 123456"], 1);
        let mut doc = PdfDocument::load(&bytes).unwrap();
        let block = doc.text_blocks().unwrap().remove(0);
        assert_eq!(block.text, "Contact John Smith at 123456");

        let plan = plan_for(
            &block.text,
            vec![Span::structured(22, 28)],
            vec![Span::entity(8, 18, "PERSON", 0.85)],
        );
        assert_eq!(doc.apply(&block, &plan).unwrap(), 2);

        let out = doc.save().unwrap();
        let text = PdfDocument::load(&out).unwrap().page_text(0).unwrap();
        assert!(!text.contains("123456"), "{}", text);
        assert!(!text.contains("Smith"), "{}", text);
        assert!(text.contains("Contact"));
        assert!(text.contains("******"));
        assert!(!String::from_utf8_lossy(&out).contains("123456"));
    }

    #[test]
    fn test_shared_form_redacted_in_every_drawing() {
        let bytes = form_pdf(&["Call 123456"], 2);
        let mut doc = PdfDocument::load(&bytes).unwrap();
        let block = doc.text_blocks().unwrap().remove(0);
        assert_eq!(block.text, "Call 123456\nCall 123456");

        let plan = plan_for(&block.text, vec![Span::structured(5, 11)], vec![]);
        assert_eq!(doc.apply(&block, &plan).unwrap(), 2);

        let out = doc.save().unwrap();
        let text = PdfDocument::load(&out).unwrap().page_text(0).unwrap();
        assert!(!text.contains("123456"), "{}", text);
        assert_eq!(text.matches("Call").count(), 2);
    }

    #[test]
    fn test_inline_form_fails_extraction() {
        let mut doc = lopdf::Document::load_mem(&form_pdf(&["Call 123456"], 1)).unwrap();
        let form_id = doc
            .objects
            .iter()
            .find(|(_, obj)| matches!(obj, lopdf::Object::Stream(s) if s.dict.has(b"BBox")))
            .map(|(id, _)| *id)
            .unwrap();
        let form = doc.get_object(form_id).unwrap().clone();
        let page_id = *doc.get_pages().values().next().unwrap();
        let mut xobjects = lopdf::Dictionary::new();
        xobjects.set("Fm1", form);
        let mut resources = lopdf::Dictionary::new();
        resources.set("XObject", xobjects);
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Resources", resources);

        let pages = doc.get_pages().into_values().collect();
        let doc = PdfDocument {
            doc,
            pages,
            fill: WHITE,
        };
        let err = doc.text_blocks().unwrap_err();
        assert_eq!(err.kind(), "extraction_failure");
    }
}
