//! Applying pending redactions to a page.
//!
//! Every glyph whose box centre lies inside a redaction rectangle is removed
//! from the stream that shows it, page content or Form XObject; the text
//! around it keeps its position through `TJ` adjustments. The rectangles are
//! then filled and overlaid with their replacement text, and the annotations
//! are dropped.
//!
//! Forms are rewritten in place, so a form drawn in several places loses the
//! glyph in all of them.

use crate::annotations::{redact_annotations, redact_annots, remove_annotations};
use crate::text::{form_content, load_page, Glyph, Source};
use crate::types::{RedactAnnot, Rect};
use crate::utils::{page_dict, page_resources, resolve_dict};
use crate::PdfError;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Resource name of the font used for overlay text.
pub const OVERLAY_FONT: &[u8] = b"ScrubOverlay";

/// Advance of `*` in Helvetica, in em.
const ASTERISK_WIDTH: f32 = 0.389;

/// Applies and removes every pending `/Redact` annotation of a page.
///
/// Returns the number of annotations applied.
pub fn apply_redactions(doc: &mut Document, page_id: ObjectId) -> Result<usize, PdfError> {
    let pending = redact_annots(doc, page_id);
    if pending.is_empty() {
        return Ok(0);
    }
    let rects: Vec<Rect> = pending.iter().map(|(_, annot)| annot.rect).collect();

    let (content, layout) = load_page(doc, page_id)?;
    let removed: HashSet<usize> = layout
        .glyphs
        .iter()
        .enumerate()
        .filter(|(_, glyph)| {
            let (cx, cy) = glyph.bbox.center();
            rects.iter().any(|r| r.contains_point(cx, cy))
        })
        .map(|(i, _)| i)
        .collect();

    let forms: BTreeSet<ObjectId> = removed
        .iter()
        .filter_map(|&i| match layout.glyphs[i].source {
            Source::Form(id) => Some(id),
            Source::Page => None,
        })
        .collect();
    for &form_id in &forms {
        let shown = stream_glyphs(&layout.glyphs, &removed, Source::Form(form_id));
        rewrite_form(doc, form_id, &shown)?;
    }

    let open_states = unbalanced_saves(&content.operations);
    let page_glyphs = stream_glyphs(&layout.glyphs, &removed, Source::Page);
    let mut operations = vec![Operation::new("q", vec![])];
    operations.extend(strip_glyphs(content.operations, &page_glyphs));
    operations.extend((0..open_states).map(|_| Operation::new("Q", vec![])));
    operations.push(Operation::new("Q", vec![]));
    for (_, annot) in &pending {
        operations.extend(overlay_ops(annot));
    }

    ensure_overlay_font(doc, page_id)?;
    let data = Content { operations }
        .encode()
        .map_err(|e| PdfError::Content(e.to_string()))?;
    let stream_id = doc.add_object(Stream::new(Dictionary::new(), data));
    match doc.get_object_mut(page_id) {
        Ok(Object::Dictionary(page)) => page.set("Contents", Object::Reference(stream_id)),
        _ => return Err(PdfError::Page(page_id)),
    }

    let pending_ids: Vec<ObjectId> = pending.iter().map(|(id, _)| *id).collect();
    remove_annotations(doc, page_id, &pending_ids)?;
    redact_annotations(doc, page_id, &rects)?;

    log::info!(
        "[PDF] page {:?}: applied {} redaction(s), removed {} glyph(s), rewrote {} form(s)",
        page_id,
        pending.len(),
        removed.len(),
        forms.len()
    );
    Ok(pending.len())
}

/// Number of `q` left open at the end of the content.
fn unbalanced_saves(operations: &[Operation]) -> usize {
    let mut depth: usize = 0;
    for op in operations {
        match op.operator.as_str() {
            "q" => depth += 1,
            "Q" => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

/// Glyphs shown by one stream in stream order, each flagged when any
/// drawing of the stream loses it.
fn stream_glyphs<'g>(
    glyphs: &'g [Glyph],
    removed: &HashSet<usize>,
    source: Source,
) -> Vec<(&'g Glyph, bool)> {
    let mut slots: BTreeMap<(usize, usize, usize), (&Glyph, bool)> = BTreeMap::new();
    for (i, glyph) in glyphs.iter().enumerate() {
        if glyph.source != source {
            continue;
        }
        let entry = slots.entry(glyph.slot()).or_insert((glyph, false));
        entry.1 |= removed.contains(&i);
    }
    slots.into_values().collect()
}

/// Replaces a form's content with the same content minus its removed glyphs.
fn rewrite_form(
    doc: &mut Document,
    form_id: ObjectId,
    shown: &[(&Glyph, bool)],
) -> Result<(), PdfError> {
    let operations = form_content(doc, form_id)?.operations;
    let data = Content {
        operations: strip_glyphs(operations, shown),
    }
    .encode()
    .map_err(|e| PdfError::Content(e.to_string()))?;

    match doc.get_object_mut(form_id) {
        Ok(Object::Stream(stream)) => {
            stream.set_plain_content(data);
            log::debug!("[PDF] rewrote form {:?}", form_id);
            Ok(())
        }
        _ => Err(PdfError::Form(form_id)),
    }
}

/// Rewrites every text-showing operation that shows a removed glyph as a
/// `TJ` without it. `shown` holds the stream's glyphs in stream order.
fn strip_glyphs(operations: Vec<Operation>, shown: &[(&Glyph, bool)]) -> Vec<Operation> {
    let mut by_op: HashMap<usize, Vec<(&Glyph, bool)>> = HashMap::new();
    for &(glyph, gone) in shown {
        by_op.entry(glyph.op).or_default().push((glyph, gone));
    }
    by_op.retain(|_, shown| shown.iter().any(|(_, gone)| *gone));
    if by_op.is_empty() {
        return operations;
    }

    let mut out = Vec::with_capacity(operations.len());
    for (index, op) in operations.into_iter().enumerate() {
        let shown = match by_op.get(&index) {
            Some(shown) => shown,
            None => {
                out.push(op);
                continue;
            }
        };

        let operator = op.operator.clone();
        match operator.as_str() {
            "TJ" => {
                let rebuilt = match op.operands.first() {
                    Some(Object::Array(items)) => Some(rebuild_items(items, shown)),
                    _ => None,
                };
                match rebuilt {
                    Some(items) => out.push(Operation::new("TJ", vec![Object::Array(items)])),
                    None => out.push(op),
                }
            }
            "Tj" => {
                let items = &op.operands[..1.min(op.operands.len())];
                out.push(Operation::new(
                    "TJ",
                    vec![Object::Array(rebuild_items(items, shown))],
                ));
            }
            "'" => {
                let items = &op.operands[..1.min(op.operands.len())];
                out.push(Operation::new("T*", vec![]));
                out.push(Operation::new(
                    "TJ",
                    vec![Object::Array(rebuild_items(items, shown))],
                ));
            }
            "\"" if op.operands.len() >= 3 => {
                out.push(Operation::new("Tw", vec![op.operands[0].clone()]));
                out.push(Operation::new("Tc", vec![op.operands[1].clone()]));
                out.push(Operation::new("T*", vec![]));
                out.push(Operation::new(
                    "TJ",
                    vec![Object::Array(rebuild_items(&op.operands[2..3], shown))],
                ));
            }
            _ => out.push(op),
        }
    }
    out
}

/// `TJ` array equivalent to `items` with the removed glyphs replaced by
/// positioning adjustments.
fn rebuild_items(items: &[Object], shown: &[(&Glyph, bool)]) -> Vec<Object> {
    let mut out = Vec::new();

    for (item_index, item) in items.iter().enumerate() {
        let (bytes, format) = match item {
            Object::String(bytes, format) => (bytes, *format),
            other => {
                out.push(other.clone());
                continue;
            }
        };

        let mut run: Vec<u8> = Vec::new();
        let mut gap = 0.0f32;
        let mut covered = 0;
        for (glyph, gone) in shown.iter().filter(|(g, _)| g.item == item_index) {
            covered = covered.max(glyph.bytes.end);
            if *gone {
                if !run.is_empty() {
                    out.push(Object::String(std::mem::take(&mut run), format));
                }
                gap += glyph.advance;
            } else {
                if gap != 0.0 {
                    out.push(Object::Real(-gap));
                    gap = 0.0;
                }
                run.extend_from_slice(&bytes[glyph.bytes.clone()]);
            }
        }
        if covered < bytes.len() {
            run.extend_from_slice(&bytes[covered..]);
        }
        if !run.is_empty() {
            out.push(Object::String(run, format));
        }
        if gap != 0.0 {
            out.push(Object::Real(-gap));
        }
    }
    out
}

/// Fill rectangle plus overlay text, drawn in the page's default space.
fn overlay_ops(annot: &RedactAnnot) -> Vec<Operation> {
    let rect = annot.rect;
    let [r, g, b] = annot.fill;
    let mut ops = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "rg",
            vec![Object::Real(r), Object::Real(g), Object::Real(b)],
        ),
        Operation::new(
            "re",
            vec![
                Object::Real(rect.x0),
                Object::Real(rect.y0),
                Object::Real(rect.width()),
                Object::Real(rect.height()),
            ],
        ),
        Operation::new("f", vec![]),
    ];

    let chars = annot.overlay_text.chars().count();
    if chars > 0 && rect.height() > 0.0 && rect.width() > 0.0 {
        let size = (rect.height() * 0.8).min(rect.width() / (chars as f32 * ASTERISK_WIDTH));
        let baseline = rect.y0 + (rect.height() - size) / 2.0 + 0.2 * size;
        ops.extend([
            Operation::new(
                "rg",
                vec![Object::Real(0.0), Object::Real(0.0), Object::Real(0.0)],
            ),
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(OVERLAY_FONT.to_vec()), Object::Real(size)],
            ),
            Operation::new("Td", vec![Object::Real(rect.x0), Object::Real(baseline)]),
            Operation::new(
                "Tj",
                vec![Object::String(
                    annot.overlay_text.as_bytes().to_vec(),
                    StringFormat::Literal,
                )],
            ),
            Operation::new("ET", vec![]),
        ]);
    }

    ops.push(Operation::new("Q", vec![]));
    ops
}

/// Gives the page its own resource dictionary with the overlay font in it.
fn ensure_overlay_font(doc: &mut Document, page_id: ObjectId) -> Result<(), PdfError> {
    let mut resources = page_resources(doc, page_id)
        .cloned()
        .unwrap_or_else(Dictionary::new);
    let mut fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|f| resolve_dict(doc, f))
        .cloned()
        .unwrap_or_else(Dictionary::new);
    if fonts.has(OVERLAY_FONT) && page_dict(doc, page_id)?.has(b"Resources") {
        return Ok(());
    }

    if !fonts.has(OVERLAY_FONT) {
        let mut font = Dictionary::new();
        font.set("Type", Object::Name(b"Font".to_vec()));
        font.set("Subtype", Object::Name(b"Type1".to_vec()));
        font.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
        font.set("Encoding", Object::Name(b"WinAnsiEncoding".to_vec()));
        let font_id = doc.add_object(font);
        fonts.set(OVERLAY_FONT, Object::Reference(font_id));
    }
    resources.set("Font", Object::Dictionary(fonts));

    match doc.get_object_mut(page_id) {
        Ok(Object::Dictionary(page)) => {
            page.set("Resources", Object::Dictionary(resources));
            Ok(())
        }
        _ => Err(PdfError::Page(page_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::FontInfo;
    use crate::text::PageLayout;

    fn literal(s: &str) -> Object {
        Object::String(s.as_bytes().to_vec(), StringFormat::Literal)
    }

    fn show(ops: Vec<Operation>) -> (Vec<Operation>, PageLayout) {
        let layout = PageLayout::from_operations(&ops, &HashMap::<Vec<u8>, FontInfo>::new());
        (ops, layout)
    }

    fn flagged<'g>(glyphs: &'g [Glyph], removed: &[usize]) -> Vec<(&'g Glyph, bool)> {
        let removed: HashSet<usize> = removed.iter().copied().collect();
        stream_glyphs(glyphs, &removed, Source::Page)
    }

    #[test]
    fn test_strip_glyphs_keeps_positions() {
        let (ops, layout) = show(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(10)]),
            Operation::new("Tj", vec![literal("ab12cd")]),
            Operation::new("ET", vec![]),
        ]);
        let out = strip_glyphs(ops, &flagged(&layout.glyphs, &[2, 3]));

        assert_eq!(out[2].operator, "TJ");
        let items = match &out[2].operands[0] {
            Object::Array(items) => items.clone(),
            other => panic!("unexpected operand {:?}", other),
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], Object::String(b, _) if b == b"ab"));
        let gap = crate::utils::get_number(&items[1]).unwrap();
        assert!((gap + 1100.0).abs() < 1e-2);
        assert!(matches!(&items[2], Object::String(b, _) if b == b"cd"));

        let relaid = PageLayout::from_operations(&out, &HashMap::new());
        assert_eq!(relaid.glyphs.len(), 4);
        assert!((relaid.glyphs[2].bbox.x0 - layout.glyphs[4].bbox.x0).abs() < 1e-3);
    }

    #[test]
    fn test_strip_glyphs_in_tj_array() {
        let (ops, layout) = show(vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![literal("Hi"), Object::Integer(-200), literal("42")])],
            ),
            Operation::new("ET", vec![]),
        ]);
        let out = strip_glyphs(ops, &flagged(&layout.glyphs, &[2, 3]));
        let relaid = PageLayout::from_operations(&out, &HashMap::new());
        assert_eq!(relaid.text(), "Hi");
    }

    #[test]
    fn test_stream_glyphs_merges_drawings() {
        let (_, layout) = show(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tj", vec![literal("ab")]),
            Operation::new("ET", vec![]),
        ]);
        // the same two codes drawn a second time elsewhere
        let mut glyphs = layout.glyphs.clone();
        for glyph in &layout.glyphs {
            let mut copy = glyph.clone();
            copy.instance = 1;
            copy.bbox = Rect::new(glyph.bbox.x0, glyph.bbox.y0 + 100.0, glyph.bbox.x1, glyph.bbox.y1 + 100.0);
            glyphs.push(copy);
        }
        let removed: HashSet<usize> = [3].into_iter().collect();
        let shown = stream_glyphs(&glyphs, &removed, Source::Page);
        assert_eq!(shown.len(), 2);
        assert!(!shown[0].1);
        assert!(shown[1].1);
        assert!(stream_glyphs(&glyphs, &removed, Source::Form((9, 0))).is_empty());
    }

    #[test]
    fn test_unbalanced_saves() {
        let ops = vec![
            Operation::new("q", vec![]),
            Operation::new("q", vec![]),
            Operation::new("Q", vec![]),
        ];
        assert_eq!(unbalanced_saves(&ops), 1);
        assert_eq!(unbalanced_saves(&[Operation::new("Q", vec![])]), 0);
    }

    #[test]
    fn test_overlay_fits_rect() {
        let annot = RedactAnnot {
            rect: Rect::new(100.0, 700.0, 140.0, 712.0),
            overlay_text: "******".to_string(),
            fill: crate::types::WHITE,
        };
        let ops = overlay_ops(&annot);
        let tf = ops.iter().find(|op| op.operator == "Tf").unwrap();
        let size = crate::utils::get_number(&tf.operands[1]).unwrap();
        assert!(size * ASTERISK_WIDTH * 6.0 <= 40.0 + 1e-3);
        assert!(size <= 12.0 * 0.8 + 1e-3);
        assert_eq!(ops.first().unwrap().operator, "q");
        assert_eq!(ops.last().unwrap().operator, "Q");
    }
}
