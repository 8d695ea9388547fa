//! Annotation handling: pending `/Redact` annotations and removal of
//! annotations that sit over redacted areas.

use crate::metadata::CleanResult;
use crate::types::{Color, RedactAnnot, Rect};
use crate::utils::{get_number, get_rect_values, page_dict, resolve};
use crate::PdfError;
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};

/// Registers a redaction over `rect`: the area is filled with `fill` and
/// `overlay_text` is drawn over it when the page's redactions are applied.
pub fn add_redact_annot(
    doc: &mut Document,
    page_id: ObjectId,
    rect: Rect,
    overlay_text: &str,
    fill: Color,
) -> Result<ObjectId, PdfError> {
    let mut annot = Dictionary::new();
    annot.set("Type", Object::Name(b"Annot".to_vec()));
    annot.set("Subtype", Object::Name(b"Redact".to_vec()));
    annot.set(
        "Rect",
        Object::Array(vec![
            Object::Real(rect.x0),
            Object::Real(rect.y0),
            Object::Real(rect.x1),
            Object::Real(rect.y1),
        ]),
    );
    annot.set(
        "OverlayText",
        Object::String(overlay_text.as_bytes().to_vec(), StringFormat::Literal),
    );
    annot.set(
        "IC",
        Object::Array(fill.iter().map(|c| Object::Real(*c)).collect()),
    );
    annot.set("P", Object::Reference(page_id));
    let annot_id = doc.add_object(annot);

    let annots_ref = page_dict(doc, page_id)?.get(b"Annots").ok().cloned();
    match annots_ref {
        Some(Object::Reference(arr_id)) => match doc.get_object_mut(arr_id) {
            Ok(Object::Array(arr)) => arr.push(Object::Reference(annot_id)),
            _ => set_page_annots(doc, page_id, vec![Object::Reference(annot_id)])?,
        },
        Some(Object::Array(mut arr)) => {
            arr.push(Object::Reference(annot_id));
            set_page_annots(doc, page_id, arr)?;
        }
        _ => set_page_annots(doc, page_id, vec![Object::Reference(annot_id)])?,
    }

    log::debug!(
        "[PDF] redaction annotation {:?} at ({:.1}, {:.1}, {:.1}, {:.1})",
        annot_id,
        rect.x0,
        rect.y0,
        rect.x1,
        rect.y1
    );
    Ok(annot_id)
}

/// Pending `/Redact` annotations of a page.
pub fn redact_annots(doc: &Document, page_id: ObjectId) -> Vec<(ObjectId, RedactAnnot)> {
    annot_ids(doc, page_id)
        .into_iter()
        .filter_map(|id| {
            let dict = doc.get_object(id).ok()?.as_dict().ok()?;
            if subtype(dict) != "Redact" {
                return None;
            }
            let (x0, y0, x1, y1) = get_annot_rect(doc, dict)?;
            let overlay_text = match dict.get(b"OverlayText") {
                Ok(Object::String(bytes, _)) => String::from_utf8_lossy(bytes).to_string(),
                _ => String::new(),
            };
            let fill = match dict.get(b"IC").ok().and_then(|o| resolve(doc, o)) {
                Some(Object::Array(arr)) if arr.len() == 3 => {
                    let mut color = [0.0; 3];
                    for (slot, obj) in color.iter_mut().zip(arr) {
                        *slot = get_number(obj).unwrap_or(0.0).clamp(0.0, 1.0);
                    }
                    color
                }
                _ => crate::types::BLACK,
            };
            Some((
                id,
                RedactAnnot {
                    rect: Rect::new(x0, y0, x1, y1),
                    overlay_text,
                    fill,
                },
            ))
        })
        .collect()
}

/// Removes every annotation whose rectangle intersects one of `rects`,
/// pending redactions included.
pub fn redact_annotations(
    doc: &mut Document,
    page_id: ObjectId,
    rects: &[Rect],
) -> Result<CleanResult, PdfError> {
    let mut result = CleanResult::new();
    if rects.is_empty() {
        return Ok(result);
    }

    let annots_to_remove: Vec<ObjectId> = annot_ids(doc, page_id)
        .into_iter()
        .filter(|id| {
            doc.get_object(*id)
                .ok()
                .and_then(|o| o.as_dict().ok())
                .and_then(|dict| get_annot_rect(doc, dict))
                .map(|(x0, y0, x1, y1)| {
                    let rect = Rect::new(x0, y0, x1, y1);
                    rects.iter().any(|r| rect.intersects(r))
                })
                .unwrap_or(false)
        })
        .collect();

    result.merge(remove_annotations(doc, page_id, &annots_to_remove)?);
    if result.items_removed > 0 {
        log::info!(
            "[PDF] page {:?}: removed {} annotation(s) over redacted areas",
            page_id,
            result.items_removed
        );
    }
    Ok(result)
}

/// Deletes the given annotations and unlinks them from the page.
pub fn remove_annotations(
    doc: &mut Document,
    page_id: ObjectId,
    annot_ids: &[ObjectId],
) -> Result<CleanResult, PdfError> {
    let mut result = CleanResult::new();
    if annot_ids.is_empty() {
        return Ok(result);
    }

    for annot_id in annot_ids {
        let kind = doc
            .get_object(*annot_id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .map(subtype)
            .unwrap_or_else(|| "Unknown".to_string());
        if doc.objects.remove(annot_id).is_some() {
            result.add(format!("removed annotation {:?} ({})", annot_id, kind));
        }
    }

    update_page_annots(doc, page_id, annot_ids, &mut result)?;
    Ok(result)
}

fn subtype(dict: &Dictionary) -> String {
    match dict.get(b"Subtype") {
        Ok(Object::Name(st)) => String::from_utf8_lossy(st).to_string(),
        _ => "Unknown".to_string(),
    }
}

fn annot_ids(doc: &Document, page_id: ObjectId) -> Vec<ObjectId> {
    let annots = match page_dict(doc, page_id).ok().and_then(|d| d.get(b"Annots").ok()) {
        Some(annots) => annots,
        None => return Vec::new(),
    };
    match resolve(doc, annots) {
        Some(Object::Array(arr)) => arr
            .iter()
            .filter_map(|o| match o {
                Object::Reference(id) => Some(*id),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn get_annot_rect(doc: &Document, annot: &Dictionary) -> Option<(f32, f32, f32, f32)> {
    match annot.get(b"Rect").ok().and_then(|o| resolve(doc, o)) {
        Some(Object::Array(arr)) => get_rect_values(arr),
        _ => None,
    }
}

fn set_page_annots(
    doc: &mut Document,
    page_id: ObjectId,
    annots: Vec<Object>,
) -> Result<(), PdfError> {
    match doc.get_object_mut(page_id) {
        Ok(Object::Dictionary(page)) => {
            if annots.is_empty() {
                page.remove(b"Annots");
            } else {
                page.set("Annots", Object::Array(annots));
            }
            Ok(())
        }
        _ => Err(PdfError::Page(page_id)),
    }
}

/// Drops removed ids from the page's `/Annots`, inline or referenced.
fn update_page_annots(
    doc: &mut Document,
    page_id: ObjectId,
    removed_ids: &[ObjectId],
    result: &mut CleanResult,
) -> Result<(), PdfError> {
    let keep = |o: &Object| match o {
        Object::Reference(id) => !removed_ids.contains(id),
        _ => true,
    };

    let annots_ref = page_dict(doc, page_id)?.get(b"Annots").ok().cloned();
    match annots_ref {
        Some(Object::Reference(arr_id)) => {
            if let Ok(Object::Array(arr)) = doc.get_object_mut(arr_id) {
                arr.retain(keep);
            }
        }
        Some(Object::Array(arr)) => {
            let new_annots: Vec<Object> = arr.into_iter().filter(|o| keep(o)).collect();
            if new_annots.is_empty() {
                result.add(format!("emptied /Annots of page {:?}", page_id));
            }
            set_page_annots(doc, page_id, new_annots)?;
        }
        _ => {}
    }
    Ok(())
}
