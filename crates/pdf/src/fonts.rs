//! Font metrics and code-to-text mapping for the fonts a page uses.
//!
//! Widths come from the font's `/Widths` (or `/W` for composite fonts) when
//! present, otherwise from the standard 14 metrics, otherwise an estimate.
//! Text comes from lopdf's encodings: the parsed `/ToUnicode` map first, then
//! the simple font's `/Encoding` with its `/Differences`.

use crate::utils::{get_number, resolve, resolve_array, resolve_dict};
use lopdf::{Dictionary, Document, Encoding, Object};
use std::collections::HashMap;
use std::sync::Arc;

/// Helvetica advance widths for codes 32..=126, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // 32-47
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 48-63
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // 64-79
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 80-95
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // 96-111
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 112-126
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum StandardMetrics {
    Helvetica,
    Courier,
}

#[derive(Debug, Clone, Default)]
pub struct FontInfo {
    /// Composite fonts use two-byte codes.
    pub two_byte: bool,
    first_char: u32,
    widths: Vec<f32>,
    cid_widths: HashMap<u32, f32>,
    default_width: Option<f32>,
    standard: Option<StandardMetrics>,
    /// Text of each one-byte code under the simple font's encoding.
    code_text: HashMap<u32, String>,
    to_unicode: Option<Arc<Encoding<'static>>>,
}

impl FontInfo {
    /// Reads metrics and the `/ToUnicode` map from a font dictionary.
    pub fn from_dict(doc: &Document, font: &Dictionary) -> Self {
        let subtype = font
            .get(b"Subtype")
            .ok()
            .and_then(|o| o.as_name().ok())
            .unwrap_or(b"");
        let base_font = font
            .get(b"BaseFont")
            .ok()
            .and_then(|o| o.as_name().ok())
            .map(|n| String::from_utf8_lossy(n).to_string())
            .unwrap_or_default();

        let mut info = FontInfo {
            two_byte: subtype == b"Type0",
            standard: standard_metrics(&base_font),
            ..Default::default()
        };

        if info.two_byte {
            if let Some(descendant) = font
                .get(b"DescendantFonts")
                .ok()
                .and_then(|o| resolve_array(doc, o))
                .and_then(|arr| arr.first())
                .and_then(|o| resolve_dict(doc, o))
            {
                info.default_width = descendant
                    .get(b"DW")
                    .ok()
                    .and_then(get_number)
                    .or(Some(1000.0));
                if let Some(w) = descendant.get(b"W").ok().and_then(|o| resolve_array(doc, o)) {
                    info.cid_widths = parse_cid_widths(doc, w);
                }
            }
        } else {
            info.first_char = font
                .get(b"FirstChar")
                .ok()
                .and_then(get_number)
                .map(|n| n.max(0.0) as u32)
                .unwrap_or(0);
            if let Some(widths) = font.get(b"Widths").ok().and_then(|o| resolve_array(doc, o)) {
                info.widths = widths
                    .iter()
                    .map(|o| resolve(doc, o).and_then(get_number).unwrap_or(0.0))
                    .collect();
            }
            info.default_width = font
                .get(b"FontDescriptor")
                .ok()
                .and_then(|o| resolve_dict(doc, o))
                .and_then(|d| d.get(b"MissingWidth").ok())
                .and_then(get_number);
            info.code_text = simple_code_text(doc, font);
        }

        info.to_unicode = font
            .get(b"ToUnicode")
            .ok()
            .and_then(|o| unicode_map(doc, o));

        info
    }

    /// Splits a shown string into character codes with their byte ranges.
    pub fn codes(&self, bytes: &[u8]) -> Vec<(u32, std::ops::Range<usize>)> {
        if self.two_byte {
            bytes
                .chunks(2)
                .enumerate()
                .map(|(i, chunk)| {
                    let code = chunk.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
                    (code, i * 2..i * 2 + chunk.len())
                })
                .collect()
        } else {
            bytes
                .iter()
                .enumerate()
                .map(|(i, b)| (*b as u32, i..i + 1))
                .collect()
        }
    }

    /// Advance width in 1/1000 em.
    pub fn width(&self, code: u32) -> f32 {
        if self.two_byte {
            return self
                .cid_widths
                .get(&code)
                .copied()
                .or(self.default_width)
                .unwrap_or(1000.0);
        }

        if code >= self.first_char {
            if let Some(w) = self.widths.get((code - self.first_char) as usize) {
                return *w;
            }
        }
        if let Some(w) = self.default_width.filter(|w| *w > 0.0) {
            return w;
        }
        match self.standard {
            Some(StandardMetrics::Courier) => 600.0,
            Some(StandardMetrics::Helvetica) if (32..=126).contains(&code) => {
                HELVETICA_WIDTHS[(code - 32) as usize] as f32
            }
            _ => estimate_width(code),
        }
    }

    /// Unicode text for a code: `/ToUnicode` first, then the font's
    /// encoding, otherwise the code read as a Unicode scalar.
    pub fn decode(&self, code: u32) -> String {
        if let Some(map) = &self.to_unicode {
            let bytes = [(code >> 8) as u8, code as u8];
            if let Ok(text) = Document::decode_text(map, &bytes) {
                if !text.is_empty() && !text.contains(char::REPLACEMENT_CHARACTER) {
                    return text;
                }
            }
        }
        if let Some(text) = self.code_text.get(&code) {
            return text.clone();
        }
        char::from_u32(code)
            .filter(|c| !c.is_control() || *c == '\t')
            .map(|c| c.to_string())
            .unwrap_or_else(|| char::REPLACEMENT_CHARACTER.to_string())
    }
}

/// Estimated width when the font carries no metrics.
fn estimate_width(code: u32) -> f32 {
    if code < 128 {
        550.0
    } else {
        1000.0
    }
}

fn standard_metrics(base_font: &str) -> Option<StandardMetrics> {
    // subset fonts are prefixed with six letters and a plus sign
    let name = base_font.split('+').last().unwrap_or(base_font);
    if name.starts_with("Courier") {
        Some(StandardMetrics::Courier)
    } else if name.starts_with("Helvetica") || name.starts_with("Arial") {
        Some(StandardMetrics::Helvetica)
    } else {
        None
    }
}

/// `/W` array: `c [w1 w2 ...]` or `c_first c_last w`.
fn parse_cid_widths(doc: &Document, w: &[Object]) -> HashMap<u32, f32> {
    let mut widths = HashMap::new();
    let mut i = 0;
    while i < w.len() {
        let first = match get_number(&w[i]) {
            Some(n) => n as u32,
            None => break,
        };
        match w.get(i + 1).and_then(|o| resolve(doc, o)) {
            Some(Object::Array(list)) => {
                for (offset, value) in list.iter().enumerate() {
                    if let Some(width) = get_number(value) {
                        widths.insert(first + offset as u32, width);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (last, width) = match (get_number(last), w.get(i + 2).and_then(get_number)) {
                    (Some(last), Some(width)) => (last as u32, width),
                    _ => break,
                };
                for cid in first..=last.min(first + 0xFFFF) {
                    widths.insert(cid, width);
                }
                i += 3;
            }
            None => break,
        }
    }
    widths
}

/// A font dictionary holding only `entries`, for lopdf's encoding lookup.
fn lookup_font(entries: Vec<(&str, Object)>) -> Dictionary {
    let mut font = Dictionary::new();
    font.set("Type", Object::Name(b"Font".to_vec()));
    for (key, value) in entries {
        font.set(key, value);
    }
    font
}

/// The `/ToUnicode` CMap as parsed by lopdf. Maps lopdf cannot read, such
/// as those with one-byte code space ranges, leave the font to its encoding.
fn unicode_map(doc: &Document, to_unicode: &Object) -> Option<Arc<Encoding<'static>>> {
    let font = lookup_font(vec![
        ("Encoding", Object::Name(b"Identity-H".to_vec())),
        ("ToUnicode", to_unicode.clone()),
    ]);
    match font.get_font_encoding(doc) {
        Ok(Encoding::UnicodeMapEncoding(map)) => Some(Arc::new(Encoding::UnicodeMapEncoding(map))),
        Ok(_) => None,
        Err(e) => {
            log::debug!("[PDF] /ToUnicode not usable: {}", e);
            None
        }
    }
}

/// Text of every one-byte code: the base encoding named by `/Encoding` (or
/// its `/BaseEncoding`, StandardEncoding when absent), then `/Differences`.
fn simple_code_text(doc: &Document, font: &Dictionary) -> HashMap<u32, String> {
    let (base, differences) = match font.get(b"Encoding").ok().and_then(|o| resolve(doc, o)) {
        Some(Object::Name(name)) => (Some(name.clone()), None),
        Some(Object::Dictionary(dict)) => (
            dict.get(b"BaseEncoding")
                .ok()
                .and_then(|o| o.as_name().ok())
                .map(<[u8]>::to_vec),
            dict.get(b"Differences")
                .ok()
                .and_then(|o| resolve_array(doc, o)),
        ),
        _ => (None, None),
    };

    let mut table = HashMap::new();
    let base = base.unwrap_or_else(|| b"StandardEncoding".to_vec());
    let lookup = lookup_font(vec![("Encoding", Object::Name(base))]);
    if let Ok(encoding) = lookup.get_font_encoding(doc) {
        for code in 0..=255u8 {
            if let Ok(text) = Document::decode_text(&encoding, &[code]) {
                if !text.is_empty() {
                    table.insert(code as u32, text);
                }
            }
        }
    }

    if let Some(differences) = differences {
        let mut code: u32 = 0;
        for item in differences {
            match item {
                Object::Integer(n) => code = (*n).clamp(0, 255) as u32,
                Object::Name(name) => {
                    match glyph_text(name) {
                        Some(text) => table.insert(code, text),
                        None => table.remove(&code),
                    };
                    code += 1;
                }
                _ => {}
            }
        }
    }
    table
}

/// Common glyph names that are not a single letter.
const GLYPH_NAMES: &[(&str, char)] = &[
    ("space", ' '), ("exclam", '!'), ("quotedbl", '"'), ("numbersign", '#'),
    ("dollar", '$'), ("percent", '%'), ("ampersand", '&'), ("quotesingle", '\''),
    ("parenleft", '('), ("parenright", ')'), ("asterisk", '*'), ("plus", '+'),
    ("comma", ','), ("hyphen", '-'), ("period", '.'), ("slash", '/'),
    ("zero", '0'), ("one", '1'), ("two", '2'), ("three", '3'), ("four", '4'),
    ("five", '5'), ("six", '6'), ("seven", '7'), ("eight", '8'), ("nine", '9'),
    ("colon", ':'), ("semicolon", ';'), ("less", '<'), ("equal", '='),
    ("greater", '>'), ("question", '?'), ("at", '@'), ("bracketleft", '['),
    ("backslash", '\\'), ("bracketright", ']'), ("underscore", '_'),
    ("braceleft", '{'), ("bar", '|'), ("braceright", '}'), ("asciitilde", '~'),
    ("quoteleft", '\u{2018}'), ("quoteright", '\u{2019}'),
    ("quotedblleft", '\u{201C}'), ("quotedblright", '\u{201D}'),
    ("quotesinglbase", '\u{201A}'), ("quotedblbase", '\u{201E}'),
    ("endash", '\u{2013}'), ("emdash", '\u{2014}'), ("bullet", '\u{2022}'),
    ("ellipsis", '\u{2026}'), ("Euro", '\u{20AC}'), ("sterling", '\u{A3}'),
    ("section", '\u{A7}'), ("copyright", '\u{A9}'), ("registered", '\u{AE}'),
    ("degree", '\u{B0}'), ("germandbls", '\u{DF}'), ("ae", '\u{E6}'), ("AE", '\u{C6}'),
    ("oslash", '\u{F8}'), ("Oslash", '\u{D8}'), ("ccedilla", '\u{E7}'), ("Ccedilla", '\u{C7}'),
    ("ntilde", '\u{F1}'), ("Ntilde", '\u{D1}'), ("ydieresis", '\u{FF}'),
];

/// Base letters and marks of the accented Latin-1 glyph names, e.g.
/// `eacute` or `Odieresis`.
const ACCENTS: &[(&str, [char; 5])] = &[
    // a e i o u
    ("grave", ['\u{E0}', '\u{E8}', '\u{EC}', '\u{F2}', '\u{F9}']),
    ("acute", ['\u{E1}', '\u{E9}', '\u{ED}', '\u{F3}', '\u{FA}']),
    ("circumflex", ['\u{E2}', '\u{EA}', '\u{EE}', '\u{F4}', '\u{FB}']),
    ("dieresis", ['\u{E4}', '\u{EB}', '\u{EF}', '\u{F6}', '\u{FC}']),
];

/// Unicode text of a glyph name: `uniXXXX` and `uXXXX` forms, letters,
/// common names, and ligatures joined with `_`. Suffixes such as `.sc` are
/// ignored.
fn glyph_text(name: &[u8]) -> Option<String> {
    let name = std::str::from_utf8(name).ok()?;
    let base = name.split('.').next().unwrap_or(name);
    if base.is_empty() {
        return None;
    }
    if base.contains('_') {
        return base.split('_').map(glyph_component).collect();
    }
    glyph_component(base)
}

fn glyph_component(name: &str) -> Option<String> {
    if let Some(hex) = name.strip_prefix("uni") {
        if !hex.is_empty() && hex.len() % 4 == 0 {
            let units: Option<Vec<u16>> = (0..hex.len())
                .step_by(4)
                .map(|i| u16::from_str_radix(&hex[i..i + 4], 16).ok())
                .collect();
            if let Some(text) = units.and_then(|u| String::from_utf16(&u).ok()) {
                return Some(text);
            }
        }
    }
    if let Some(hex) = name.strip_prefix('u') {
        if (4..=6).contains(&hex.len()) {
            if let Some(c) = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                return Some(c.to_string());
            }
        }
    }
    match name {
        "fi" => return Some("fi".to_string()),
        "fl" => return Some("fl".to_string()),
        _ => {}
    }
    if name.len() == 1 && name.as_bytes()[0].is_ascii_alphabetic() {
        return Some(name.to_string());
    }
    if let Some((_, c)) = GLYPH_NAMES.iter().find(|(n, _)| *n == name) {
        return Some(c.to_string());
    }

    let mut chars = name.chars();
    let letter = chars.next()?;
    let mark = chars.as_str();
    let (_, accented) = ACCENTS.iter().find(|(m, _)| *m == mark)?;
    let index = "aeiou".find(letter.to_ascii_lowercase())?;
    let c = accented[index];
    if letter.is_ascii_uppercase() {
        c.to_uppercase().next().map(|u| u.to_string())
    } else {
        Some(c.to_string())
    }
}
