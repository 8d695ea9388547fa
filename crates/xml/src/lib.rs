//! XML redaction on quick-xml.
//!
//! The document is kept as the stream of events it was parsed into. Every
//! text node, CDATA section and attribute value is one text block; redacted
//! values are substituted when the events are written back, everything else
//! is re-emitted as read.
//!
//! Input may be in any encoding the declaration or a byte order mark names
//! (UTF-16, ISO-8859-1, windows-1252 and so on). It is decoded up front and
//! the output is always UTF-8, with the declaration updated to say so.

use quick_xml::encoding::{detect_encoding, EncodingError};
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesCData, BytesDecl, BytesStart, BytesText, Event};
use quick_xml::{Decoder, Reader, Writer};
use scrub_core::{
    BlockLocation, CoreError, Detection, DetectionSession, Document, DocumentKind, RedactionPlan,
    TextBlock,
};
use std::borrow::Cow;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("invalid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("document does not match its encoding: {0}")]
    Decode(#[from] EncodingError),
    #[error("malformed XML at byte {position}: {source}")]
    Parse {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },
    #[error("malformed attribute: {0}")]
    Attribute(#[from] AttrError),
    #[error("malformed XML: {0}")]
    Structure(String),
    #[error("{0}")]
    Xml(#[from] quick_xml::Error),
    #[error("failed to write XML: {0}")]
    Write(#[from] std::io::Error),
}

impl From<XmlError> for CoreError {
    fn from(err: XmlError) -> Self {
        match err {
            XmlError::Write(_) => CoreError::Serialization(err.to_string()),
            other => CoreError::Extraction(other.to_string()),
        }
    }
}

/// Where an extracted value lives in the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Text { event: usize },
    CData { event: usize },
    Attribute { event: usize, index: usize },
}

impl Slot {
    fn event(&self) -> usize {
        match *self {
            Slot::Text { event } | Slot::CData { event } | Slot::Attribute { event, .. } => event,
        }
    }
}

/// A parsed XML document being redacted in memory.
pub struct XmlDocument {
    events: Vec<Event<'static>>,
    blocks: Vec<TextBlock>,
    slots: Vec<Slot>,
    edits: HashMap<usize, String>,
    has_decl: bool,
}

impl XmlDocument {
    /// Parses `bytes` into an editable document.
    ///
    /// # Parameters
    /// - `bytes`: the raw file, in UTF-8 or in the encoding named by its byte
    ///   order mark or XML declaration
    ///
    /// # Returns
    /// - Ok: the document, with every non-blank value extracted
    /// - Err: the bytes cannot be decoded or are not well formed
    pub fn parse(bytes: &[u8]) -> Result<Self, XmlError> {
        let (source, transcoded) = decode_source(bytes)?;

        let mut reader = Reader::from_str(&source);
        reader.config_mut().check_end_names = true;

        let mut doc = Self {
            events: Vec::new(),
            blocks: Vec::new(),
            slots: Vec::new(),
            edits: HashMap::new(),
            has_decl: false,
        };
        let mut stack: Vec<String> = Vec::new();
        let mut saw_root = false;

        loop {
            let event = match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(Event::Decl(decl)) if transcoded => Event::Decl(utf8_declaration(&decl)?),
                Ok(event) => event.into_owned(),
                Err(source) => {
                    return Err(XmlError::Parse {
                        position: reader.error_position(),
                        source,
                    })
                }
            };
            let index = doc.events.len();

            match &event {
                Event::Decl(_) => doc.has_decl = true,
                Event::Start(start) => {
                    stack.push(element_name(start)?);
                    saw_root = true;
                    doc.extract_attributes(index, start, &stack, reader.decoder())?;
                }
                Event::Empty(start) => {
                    stack.push(element_name(start)?);
                    saw_root = true;
                    doc.extract_attributes(index, start, &stack, reader.decoder())?;
                    stack.pop();
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(text) => {
                    let value = text.unescape()?;
                    if !stack.is_empty() {
                        doc.push_block(value.into_owned(), Slot::Text { event: index }, &stack, None);
                    }
                }
                Event::CData(cdata) => {
                    let value = std::str::from_utf8(cdata)?.to_string();
                    doc.push_block(value, Slot::CData { event: index }, &stack, None);
                }
                _ => {}
            }
            doc.events.push(event);
        }

        if !stack.is_empty() {
            return Err(XmlError::Structure(format!(
                "unclosed element <{}>",
                stack.join("/")
            )));
        }
        if !saw_root {
            return Err(XmlError::Structure("no root element".to_string()));
        }

        log::debug!(
            "[XML] parsed {} event(s), {} text value(s)",
            doc.events.len(),
            doc.blocks.len()
        );
        Ok(doc)
    }

    fn extract_attributes(
        &mut self,
        event: usize,
        start: &BytesStart<'_>,
        stack: &[String],
        decoder: Decoder,
    ) -> Result<(), XmlError> {
        for (index, attr) in start.attributes().enumerate() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?;
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let value = attr.decode_and_unescape_value(decoder)?.into_owned();
            self.push_block(
                value,
                Slot::Attribute { event, index },
                stack,
                Some(key.to_string()),
            );
        }
        Ok(())
    }

    fn push_block(&mut self, text: String, slot: Slot, stack: &[String], attribute: Option<String>) {
        if text.trim().is_empty() {
            return;
        }
        let location = BlockLocation::Node {
            ordinal: self.blocks.len(),
            path: format!("/{}", stack.join("/")),
            attribute,
        };
        self.blocks.push(TextBlock::new(text, location));
        self.slots.push(slot);
    }

    /// Number of extracted values.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Replaces the value at `ordinal`; the change is written out on save.
    pub fn set_value(&mut self, ordinal: usize, value: String) -> Result<(), XmlError> {
        if ordinal >= self.slots.len() {
            return Err(XmlError::Structure(format!("no value with ordinal {}", ordinal)));
        }
        self.edits.insert(ordinal, value);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, XmlError> {
        let mut by_event: HashMap<usize, Vec<(Slot, &str)>> = HashMap::new();
        for (ordinal, value) in &self.edits {
            let slot = self.slots[*ordinal];
            by_event
                .entry(slot.event())
                .or_default()
                .push((slot, value.as_str()));
        }

        let mut writer = Writer::new(Vec::new());
        if !self.has_decl {
            writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
            writer.write_event(Event::Text(BytesText::from_escaped("\n")))?;
        }

        for (index, event) in self.events.iter().enumerate() {
            match by_event.get(&index) {
                None => writer.write_event(event.borrow())?,
                Some(edits) => writer.write_event(rewrite(event, edits)?)?,
            }
        }

        log::debug!("[XML] wrote {} redacted value(s)", self.edits.len());
        Ok(writer.into_inner())
    }
}

/// Decodes the raw file to text.
///
/// A byte order mark wins over the declaration. Without one, the encoding
/// named in the declaration is used, and UTF-8 when there is none. The flag
/// is set when the source was not UTF-8.
fn decode_source(bytes: &[u8]) -> Result<(Cow<'_, str>, bool), XmlError> {
    let mut reader = Reader::from_reader(bytes);
    let (mut encoding, bom) = detect_encoding(bytes).unwrap_or((reader.decoder().encoding(), 0));

    if bom == 0 && encoding.is_ascii_compatible() {
        if let Ok(Event::Decl(decl)) = reader.read_event() {
            if let Some(declared) = decl.encoder().filter(|e| e.is_ascii_compatible()) {
                encoding = declared;
            }
        }
    }

    let text = quick_xml::encoding::decode(&bytes[bom..], encoding)?;
    let transcoded = encoding.name() != "UTF-8";
    if transcoded {
        log::debug!("[XML] decoded {} input", encoding.name());
    }
    Ok((text, transcoded))
}

/// The declaration to write for a document that was transcoded to UTF-8.
fn utf8_declaration(decl: &BytesDecl<'_>) -> Result<BytesDecl<'static>, XmlError> {
    let version = decl.version()?;
    let standalone = decl.standalone().transpose()?;
    let standalone = match &standalone {
        Some(value) => Some(std::str::from_utf8(value)?),
        None => None,
    };
    Ok(BytesDecl::new(
        std::str::from_utf8(&version)?,
        Some("UTF-8"),
        standalone,
    ))
}

fn element_name(start: &BytesStart<'_>) -> Result<String, XmlError> {
    Ok(std::str::from_utf8(start.name().as_ref())?.to_string())
}

/// Builds the replacement for an event whose values were redacted.
fn rewrite(event: &Event<'static>, edits: &[(Slot, &str)]) -> Result<Event<'static>, XmlError> {
    match event {
        Event::Text(_) => Ok(Event::Text(BytesText::new(edits[0].1).into_owned())),
        Event::CData(_) => Ok(Event::CData(BytesCData::new(edits[0].1).into_owned())),
        Event::Start(start) => Ok(Event::Start(rewrite_attributes(start, edits)?)),
        Event::Empty(start) => Ok(Event::Empty(rewrite_attributes(start, edits)?)),
        _ => Ok(event.clone()),
    }
}

fn rewrite_attributes(
    start: &BytesStart<'static>,
    edits: &[(Slot, &str)],
) -> Result<BytesStart<'static>, XmlError> {
    let replacement = |i: usize| {
        edits.iter().find_map(|(slot, value)| match slot {
            Slot::Attribute { index, .. } if *index == i => Some(*value),
            _ => None,
        })
    };

    let mut out = start.to_owned();
    out.clear_attributes();
    for (i, attr) in start.attributes().enumerate() {
        let attr = attr?;
        match replacement(i) {
            Some(value) => {
                let key = std::str::from_utf8(attr.key.as_ref())?;
                out.push_attribute((key, value));
            }
            None => out.push_attribute(attr),
        }
    }
    Ok(out)
}

impl Document for XmlDocument {
    const KIND: DocumentKind = DocumentKind::Xml;

    fn load(bytes: &[u8]) -> scrub_core::Result<Self> {
        Ok(Self::parse(bytes)?)
    }

    fn text_blocks(&self) -> scrub_core::Result<Vec<TextBlock>> {
        Ok(self.blocks.clone())
    }

    /// Structured identifiers are masked before entity analysis, so the
    /// analyzer never sees them.
    fn detect(
        &self,
        block: &TextBlock,
        session: &DetectionSession<'_>,
    ) -> scrub_core::Result<Detection> {
        Ok(session.detect_after_masking(&block.text)?)
    }

    fn apply(&mut self, block: &TextBlock, plan: &RedactionPlan) -> scrub_core::Result<usize> {
        let ordinal = match &block.location {
            BlockLocation::Node { ordinal, .. } if self.blocks.get(*ordinal) == Some(block) => {
                *ordinal
            }
            other => {
                return Err(CoreError::Extraction(format!(
                    "{} does not belong to this document",
                    other
                )))
            }
        };
        if plan.is_empty() {
            return Ok(0);
        }

        let redacted = plan.apply_to(&block.text);
        if redacted == block.text {
            return Ok(0);
        }
        log::debug!("[XML] {}: {} span(s) masked", block.location, plan.len());
        self.set_value(ordinal, redacted)?;
        Ok(plan.len())
    }

    fn save(self) -> scrub_core::Result<Vec<u8>> {
        Ok(self.to_bytes()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrub_core::{Detectors, ResolveOptions};
    use scrub_rules::{PatternMatcher, RecognizerRegistry};
    use std::sync::Arc;

    fn detectors() -> Detectors {
        Detectors::new(
            Arc::new(PatternMatcher::new()),
            Arc::new(RecognizerRegistry::with_defaults().unwrap()),
        )
    }

    fn redact(xml: &str) -> String {
        redact_bytes(xml.as_bytes())
    }

    fn redact_bytes(xml: &[u8]) -> String {
        let detectors = detectors();
        let session = detectors.session();
        let mut doc = XmlDocument::load(xml).unwrap();
        for block in doc.text_blocks().unwrap() {
            let detection = doc.detect(&block, &session).unwrap();
            let plan = RedactionPlan::resolve(&block.text, detection, ResolveOptions::default());
            doc.apply(&block, &plan).unwrap();
        }
        String::from_utf8(doc.save().unwrap()).unwrap()
    }

    #[test]
    fn test_blocks_in_document_order() {
        let xml = r#"<root><note addr="1 Main">Hello <b>there</b></note><![CDATA[raw & text]]></root>"#;
        let doc = XmlDocument::parse(xml.as_bytes()).unwrap();
        let blocks = doc.text_blocks().unwrap();
        let texts: Vec<&str> = blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, ["1 Main", "Hello ", "there", "raw & text"]);
        assert_eq!(
            blocks[0].location,
            BlockLocation::Node {
                ordinal: 0,
                path: "/root/note".into(),
                attribute: Some("addr".into()),
            }
        );
        assert_eq!(blocks[2].location.to_string(), "/root/note/b/text()");
    }

    #[test]
    fn test_attribute_and_text_masked_alike() {
        let out = redact(r#"<note addr="221B Baker Street">Visit 221B Baker Street</note>"#);
        assert!(out.contains(r#"addr="221B ************""#), "{}", out);
        assert!(out.contains(">Visit 221B ************</note>"), "{}", out);
        assert!(!out.contains("Baker"));
    }

    #[test]
    fn test_structured_masked_before_entities() {
        let out = redact("<r><zip>Send to 90210 today</zip><acct>Account 1234567890</acct></r>");
        assert!(out.contains("<zip>Send to ***** today</zip>"), "{}", out);
        assert!(out.contains("<acct>Account **********</acct>"), "{}", out);
    }

    #[test]
    fn test_declaration_written_when_absent() {
        let out = redact("<r>nothing here</r>");
        assert!(out.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#), "{}", out);
        assert!(out.ends_with("<r>nothing here</r>"));
    }

    #[test]
    fn test_declaration_and_comments_preserved() {
        let xml = "<?xml version=\"1.0\" standalone=\"yes\"?>\n<!-- keep -->\n<r a=\"x &amp; y\">t</r>";
        let out = redact(xml);
        assert_eq!(out, xml);
    }

    #[test]
    fn test_redacted_values_are_escaped() {
        let mut doc = XmlDocument::parse(b"<r><v>a &lt; b</v></r>").unwrap();
        assert_eq!(doc.text_blocks().unwrap()[0].text, "a < b");
        doc.set_value(0, "a < *".to_string()).unwrap();
        let out = String::from_utf8(doc.to_bytes().unwrap()).unwrap();
        assert!(out.ends_with("<r><v>a &lt; *</v></r>"), "{}", out);
    }

    #[test]
    fn test_empty_element_attributes() {
        let mut doc = XmlDocument::parse(br#"<r><p id="7" name="John Smith"/></r>"#).unwrap();
        let blocks = doc.text_blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        doc.set_value(1, "**********".to_string()).unwrap();
        let out = String::from_utf8(doc.to_bytes().unwrap()).unwrap();
        assert!(out.contains(r#"<p id="7" name="**********"/>"#), "{}", out);
    }

    #[test]
    fn test_namespace_declarations_skipped() {
        let doc = XmlDocument::parse(br#"<r xmlns="urn:a" xmlns:x="urn:b" x:k="v"/>"#).unwrap();
        let blocks = doc.text_blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "v");
    }

    #[test]
    fn test_malformed_input() {
        assert!(XmlDocument::parse(b"<a><b></a>").is_err());
        assert!(XmlDocument::parse(b"<a><b>").is_err());
        assert!(XmlDocument::parse(b"just text").is_err());
        let err = XmlDocument::load(b"<a>\xff</a>").err().unwrap();
        assert_eq!(err.kind(), "extraction_failure");
    }

    #[test]
    fn test_latin1_declared_encoding() {
        let xml = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r>Jos\xe9 pays John Smith 123456</r>";
        let doc = XmlDocument::parse(xml).unwrap();
        assert_eq!(doc.text_blocks().unwrap()[0].text, "Jos\u{e9} pays John Smith 123456");

        let out = redact_bytes(xml);
        assert!(out.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#), "{}", out);
        assert!(out.contains("Jos\u{e9} pays"), "{}", out);
        assert!(!out.contains("John Smith"), "{}", out);
        assert!(!out.contains("123456"), "{}", out);
    }

    #[test]
    fn test_latin1_attribute_and_standalone_kept() {
        let xml = b"<?xml version=\"1.0\" encoding=\"latin1\" standalone=\"yes\"?><r city=\"M\xfcnchen\"/>";
        let doc = XmlDocument::parse(xml).unwrap();
        assert_eq!(doc.text_blocks().unwrap()[0].text, "M\u{fc}nchen");
        let out = String::from_utf8(doc.to_bytes().unwrap()).unwrap();
        assert_eq!(
            out,
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><r city=\"M\u{fc}nchen\"/>"
        );
    }

    #[test]
    fn test_utf16_with_byte_order_mark() {
        let source = "<?xml version=\"1.0\" encoding=\"UTF-16\"?><r>Call 123456</r>";
        let mut xml = vec![0xff, 0xfe];
        xml.extend(source.encode_utf16().flat_map(|unit| unit.to_le_bytes()));

        let out = redact_bytes(&xml);
        assert_eq!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?><r>Call ******</r>");
    }

    #[test]
    fn test_utf8_byte_order_mark_stripped() {
        let out = redact_bytes(b"\xef\xbb\xbf<r>plain</r>");
        assert!(out.ends_with("<r>plain</r>"), "{}", out);
        assert!(!out.contains('\u{feff}'));
    }

    #[test]
    fn test_foreign_block_rejected() {
        let mut doc = XmlDocument::parse(b"<r>x</r>").unwrap();
        let block = TextBlock::new("x", BlockLocation::Page { index: 0 });
        assert!(doc.apply(&block, &RedactionPlan::default()).is_err());
    }
}
