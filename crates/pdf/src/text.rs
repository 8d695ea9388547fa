//! Page text layout.
//!
//! Walks a page's content stream the way a viewer would, tracking the
//! graphics and text state, and records one [`Glyph`] per shown character
//! code with its box in user space. Form XObjects drawn with `Do` are walked
//! in place under their own matrix and resources. The page text handed to the
//! detectors is assembled from these glyphs, so every character of it maps
//! back to a box.

use crate::fonts::FontInfo;
use crate::types::Rect;
use crate::utils::{
    concat, get_matrix, get_number, get_page_content, get_stream_content, page_resources,
    resolve, resolve_dict, transform_point, Matrix, IDENTITY,
};
use crate::PdfError;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashMap;
use std::ops::Range;

/// Descent and ascent of the glyph box, as fractions of the font size.
const DESCENT: f32 = -0.2;
const ASCENT: f32 = 0.8;

/// Content stream a glyph is shown from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    Page,
    /// A Form XObject drawn with `Do`.
    Form(ObjectId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    /// Decoded text, usually one character.
    pub text: String,
    pub bbox: Rect,
    pub source: Source,
    /// Counts the streams walked on the page; a form drawn twice gets two.
    pub instance: usize,
    /// Index of the showing operation in its stream's content.
    pub op: usize,
    /// Element of the `TJ` array holding the string; 0 for other operators.
    pub item: usize,
    /// Byte range of the code inside that string.
    pub bytes: Range<usize>,
    /// Horizontal advance expressed as a `TJ` adjustment.
    pub advance: f32,
}

impl Glyph {
    fn is_blank(&self) -> bool {
        self.text.chars().all(char::is_whitespace)
    }

    /// Position of the code in its stream, the same for every drawing of it.
    pub fn slot(&self) -> (usize, usize, usize) {
        (self.op, self.item, self.bytes.start)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    pub glyphs: Vec<Glyph>,
    chars: Vec<char>,
    char_map: Vec<Option<usize>>,
}

/// Decodes a page's content and lays out its text, forms included.
pub fn load_page(doc: &Document, page_id: ObjectId) -> Result<(Content, PageLayout), PdfError> {
    let content = decode_content(&get_page_content(doc, page_id)?)?;
    let resources = page_resources(doc, page_id);
    let fonts = resource_fonts(doc, resources);

    let mut walker = Walker::new(Some(doc));
    walker.walk(
        &content.operations,
        &Scope {
            fonts: &fonts,
            resources,
        },
    )?;
    Ok((content, PageLayout::from_glyphs(walker.glyphs)))
}

/// Decoded content of a Form XObject.
pub fn form_content(doc: &Document, form_id: ObjectId) -> Result<Content, PdfError> {
    match doc.get_object(form_id) {
        Ok(Object::Stream(stream)) => decode_content(&get_stream_content(stream)),
        _ => Err(PdfError::Form(form_id)),
    }
}

fn decode_content(data: &[u8]) -> Result<Content, PdfError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Content {
            operations: Vec::new(),
        });
    }
    Content::decode(data).map_err(|e| PdfError::Content(e.to_string()))
}

/// Fonts of a resource dictionary, keyed by resource name.
pub fn resource_fonts(
    doc: &Document,
    resources: Option<&Dictionary>,
) -> HashMap<Vec<u8>, FontInfo> {
    let mut fonts = HashMap::new();
    let font_dict = resources
        .and_then(|res| res.get(b"Font").ok())
        .and_then(|f| resolve_dict(doc, f));

    if let Some(font_dict) = font_dict {
        for (name, value) in font_dict.iter() {
            if let Some(font) = resolve_dict(doc, value) {
                fonts.insert(name.clone(), FontInfo::from_dict(doc, font));
            }
        }
    }
    fonts
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font: Option<Vec<u8>>,
    size: f32,
    char_spacing: f32,
    word_spacing: f32,
    scale: f32,
    leading: f32,
    rise: f32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: IDENTITY,
            font: None,
            size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            scale: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

/// Fonts and resources of the stream being walked.
struct Scope<'s, 'a> {
    fonts: &'s HashMap<Vec<u8>, FontInfo>,
    resources: Option<&'a Dictionary>,
}

struct Walker<'a> {
    doc: Option<&'a Document>,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    tm: Matrix,
    tlm: Matrix,
    source: Source,
    instance: usize,
    streams: usize,
    /// Forms currently being walked, innermost last.
    open_forms: Vec<ObjectId>,
    glyphs: Vec<Glyph>,
}

impl<'a> Walker<'a> {
    fn new(doc: Option<&'a Document>) -> Self {
        Self {
            doc,
            state: GraphicsState::default(),
            stack: Vec::new(),
            tm: IDENTITY,
            tlm: IDENTITY,
            source: Source::Page,
            instance: 0,
            streams: 1,
            open_forms: Vec::new(),
            glyphs: Vec::new(),
        }
    }

    fn walk(&mut self, operations: &[Operation], scope: &Scope<'_, 'a>) -> Result<(), PdfError> {
        for (index, op) in operations.iter().enumerate() {
            self.step(index, op, scope)?;
        }
        Ok(())
    }

    fn next_line(&mut self, tx: f32, ty: f32) {
        self.tlm = concat(&[1.0, 0.0, 0.0, 1.0, tx, ty], &self.tlm);
        self.tm = self.tlm;
    }

    fn translate(&mut self, tx: f32) {
        self.tm = concat(&[1.0, 0.0, 0.0, 1.0, tx, 0.0], &self.tm);
    }

    fn show(&mut self, bytes: &[u8], op: usize, item: usize, fonts: &HashMap<Vec<u8>, FontInfo>) {
        let fallback = FontInfo::default();
        let font = self
            .state
            .font
            .as_ref()
            .and_then(|name| fonts.get(name))
            .unwrap_or(&fallback);
        let fs = self.state.size;
        let th = self.state.scale;
        let rise = self.state.rise;

        for (code, range) in font.codes(bytes) {
            let w0 = font.width(code) / 1000.0;
            let m = concat(&self.tm, &self.state.ctm);
            let corners = [
                transform_point(&m, 0.0, rise + DESCENT * fs),
                transform_point(&m, w0 * fs * th, rise + DESCENT * fs),
                transform_point(&m, w0 * fs * th, rise + ASCENT * fs),
                transform_point(&m, 0.0, rise + ASCENT * fs),
            ];

            let mut spacing = self.state.char_spacing;
            if !font.two_byte && code == 32 {
                spacing += self.state.word_spacing;
            }
            let advance = if fs != 0.0 {
                (w0 * fs + spacing) * 1000.0 / fs
            } else {
                0.0
            };

            if let Some(bbox) = Rect::from_points(&corners) {
                self.glyphs.push(Glyph {
                    text: font.decode(code),
                    bbox,
                    source: self.source,
                    instance: self.instance,
                    op,
                    item,
                    bytes: range,
                    advance,
                });
            }
            self.translate((w0 * fs + spacing) * th);
        }
    }

    fn adjust(&mut self, n: f32) {
        let tx = -(n / 1000.0) * self.state.size * self.state.scale;
        self.translate(tx);
    }

    /// Walks the Form XObject `name` of the current resources. Image
    /// XObjects and unknown names draw no text.
    fn draw_xobject(&mut self, name: &[u8], scope: &Scope<'_, 'a>) -> Result<(), PdfError> {
        let doc = match self.doc {
            Some(doc) => doc,
            None => return Ok(()),
        };
        let entry = match scope
            .resources
            .and_then(|res| res.get(b"XObject").ok())
            .and_then(|x| resolve_dict(doc, x))
            .and_then(|x| x.get(name).ok())
        {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let stream = match resolve(doc, entry) {
            Some(Object::Stream(stream)) => stream,
            _ => return Ok(()),
        };
        let is_form = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|s| s == b"Form")
            .unwrap_or(false);
        if !is_form {
            return Ok(());
        }
        let form_id = match entry {
            Object::Reference(id) => *id,
            _ => {
                return Err(PdfError::Content(format!(
                    "form XObject /{} is not an indirect object",
                    String::from_utf8_lossy(name)
                )))
            }
        };
        if self.open_forms.contains(&form_id) {
            log::debug!("[PDF] form {:?} draws itself, not walked again", form_id);
            return Ok(());
        }

        let content = decode_content(&get_stream_content(stream))?;
        let matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|m| resolve(doc, m))
            .and_then(|m| m.as_array().ok())
            .and_then(|m| get_matrix(m))
            .unwrap_or(IDENTITY);
        // a form without resources uses those of the stream drawing it
        let resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|r| resolve_dict(doc, r))
            .or(scope.resources);
        let fonts = resource_fonts(doc, resources);

        let saved = (
            self.state.clone(),
            self.stack.len(),
            self.tm,
            self.tlm,
            self.source,
            self.instance,
        );
        self.state.ctm = concat(&matrix, &self.state.ctm);
        self.tm = IDENTITY;
        self.tlm = IDENTITY;
        self.source = Source::Form(form_id);
        self.instance = self.streams;
        self.streams += 1;
        self.open_forms.push(form_id);

        let walked = self.walk(
            &content.operations,
            &Scope {
                fonts: &fonts,
                resources,
            },
        );

        self.open_forms.pop();
        let (state, depth, tm, tlm, source, instance) = saved;
        self.state = state;
        self.stack.truncate(depth);
        self.tm = tm;
        self.tlm = tlm;
        self.source = source;
        self.instance = instance;
        walked
    }

    fn step(&mut self, index: usize, op: &Operation, scope: &Scope<'_, 'a>) -> Result<(), PdfError> {
        let operands = &op.operands;
        let num = |i: usize| operands.get(i).and_then(get_number);

        match op.operator.as_str() {
            "q" => self.stack.push(self.state.clone()),
            "Q" => {
                if let Some(saved) = self.stack.pop() {
                    self.state = saved;
                }
            }
            "cm" => {
                if let Some(m) = get_matrix(operands) {
                    self.state.ctm = concat(&m, &self.state.ctm);
                }
            }
            "Do" => {
                if let Some(Object::Name(name)) = operands.first() {
                    self.draw_xobject(name, scope)?;
                }
            }
            "BT" => {
                self.tm = IDENTITY;
                self.tlm = IDENTITY;
            }
            "Tm" => {
                if let Some(m) = get_matrix(operands) {
                    self.tm = m;
                    self.tlm = m;
                }
            }
            "Td" => {
                if let (Some(tx), Some(ty)) = (num(0), num(1)) {
                    self.next_line(tx, ty);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = (num(0), num(1)) {
                    self.state.leading = -ty;
                    self.next_line(tx, ty);
                }
            }
            "T*" => self.next_line(0.0, -self.state.leading),
            "TL" => {
                if let Some(v) = num(0) {
                    self.state.leading = v;
                }
            }
            "Tc" => {
                if let Some(v) = num(0) {
                    self.state.char_spacing = v;
                }
            }
            "Tw" => {
                if let Some(v) = num(0) {
                    self.state.word_spacing = v;
                }
            }
            "Tz" => {
                if let Some(v) = num(0) {
                    self.state.scale = v / 100.0;
                }
            }
            "Ts" => {
                if let Some(v) = num(0) {
                    self.state.rise = v;
                }
            }
            "Tf" => {
                if let Some(Object::Name(name)) = operands.first() {
                    self.state.font = Some(name.clone());
                }
                if let Some(size) = num(1) {
                    self.state.size = size;
                }
            }
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes, index, 0, scope.fonts);
                }
            }
            "'" => {
                self.next_line(0.0, -self.state.leading);
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes, index, 0, scope.fonts);
                }
            }
            "\"" => {
                if let (Some(aw), Some(ac)) = (num(0), num(1)) {
                    self.state.word_spacing = aw;
                    self.state.char_spacing = ac;
                }
                self.next_line(0.0, -self.state.leading);
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    self.show(bytes, index, 0, scope.fonts);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    for (item, obj) in items.iter().enumerate() {
                        match obj {
                            Object::String(bytes, _) => self.show(bytes, index, item, scope.fonts),
                            other => {
                                if let Some(n) = get_number(other) {
                                    self.adjust(n);
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl PageLayout {
    /// Lays out a single stream with the given fonts. `Do` draws nothing
    /// here, as there is no document to resolve XObjects in.
    pub fn from_operations(operations: &[Operation], fonts: &HashMap<Vec<u8>, FontInfo>) -> Self {
        let mut walker = Walker::new(None);
        let scope = Scope {
            fonts,
            resources: None,
        };
        for (index, op) in operations.iter().enumerate() {
            // without a document no step can fail
            let _ = walker.step(index, op, &scope);
        }
        Self::from_glyphs(walker.glyphs)
    }

    fn from_glyphs(glyphs: Vec<Glyph>) -> Self {
        let mut chars = Vec::new();
        let mut char_map = Vec::new();

        for (i, glyph) in glyphs.iter().enumerate() {
            if let Some(prev) = i.checked_sub(1).map(|p| &glyphs[p]) {
                if let Some(sep) = separator(prev, glyph) {
                    chars.push(sep);
                    char_map.push(None);
                }
            }
            for c in glyph.text.chars() {
                chars.push(c);
                char_map.push(Some(i));
            }
        }

        Self {
            glyphs,
            chars,
            char_map,
        }
    }

    /// Page text in reading order of the content stream.
    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Boxes of every occurrence of `needle` in the page text, one box per
    /// line the occurrence spans.
    pub fn search_for(&self, needle: &str) -> Vec<Rect> {
        let needle: Vec<char> = needle.chars().collect();
        if needle.is_empty() || needle.len() > self.chars.len() {
            return Vec::new();
        }

        let mut rects = Vec::new();
        for start in 0..=self.chars.len() - needle.len() {
            if self.chars[start..start + needle.len()] != needle[..] {
                continue;
            }
            let mut indices: Vec<usize> = self.char_map[start..start + needle.len()]
                .iter()
                .flatten()
                .copied()
                .collect();
            indices.dedup();
            rects.extend(self.line_boxes(&indices));
        }
        rects
    }

    fn line_boxes(&self, indices: &[usize]) -> Vec<Rect> {
        let mut boxes: Vec<Rect> = Vec::new();
        let mut current: Option<(Rect, usize)> = None;

        for &i in indices {
            let glyph = &self.glyphs[i];
            if glyph.is_blank() {
                continue;
            }
            current = match current {
                Some((rect, last)) if same_line(&self.glyphs[last], glyph) => {
                    Some((rect.union(&glyph.bbox), i))
                }
                Some((rect, _)) => {
                    boxes.push(rect);
                    Some((glyph.bbox, i))
                }
                None => Some((glyph.bbox, i)),
            };
        }
        if let Some((rect, _)) = current {
            boxes.push(rect);
        }
        boxes
    }
}

fn same_line(a: &Glyph, b: &Glyph) -> bool {
    let height = a.bbox.height().max(b.bbox.height()).max(1.0);
    (a.bbox.center().1 - b.bbox.center().1).abs() <= height * 0.5
}

/// Character inserted between two consecutive glyphs, if any.
fn separator(prev: &Glyph, next: &Glyph) -> Option<char> {
    if !same_line(prev, next) || next.bbox.x1 <= prev.bbox.x0 {
        return Some('\n');
    }
    let height = prev.bbox.height().max(next.bbox.height()).max(1.0);
    let gap = next.bbox.x0 - prev.bbox.x1;
    if gap > height * 0.15 && !prev.is_blank() && !next.is_blank() {
        Some(' ')
    } else {
        None
    }
}
