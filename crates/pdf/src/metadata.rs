//! Document metadata cleaning.
//!
//! The Info dictionary and the XMP stream routinely carry author names and
//! free-text titles, which page redaction never reaches.

use crate::PdfError;
use lopdf::{Document, Object, ObjectId};

/// What a cleaning pass removed.
#[derive(Debug, Clone, Default)]
pub struct CleanResult {
    pub items_removed: usize,
    pub details: Vec<String>,
}

impl CleanResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, detail: String) {
        self.items_removed += 1;
        self.details.push(detail);
    }

    pub fn merge(&mut self, other: CleanResult) {
        self.items_removed += other.items_removed;
        self.details.extend(other.details);
    }
}

const INFO_FIELDS: [&[u8]; 8] = [
    b"Title",
    b"Author",
    b"Subject",
    b"Keywords",
    b"Creator",
    b"Producer",
    b"CreationDate",
    b"ModDate",
];

/// Strips the descriptive fields of the Info dictionary, dropping the
/// dictionary when nothing is left.
pub fn clean_info_dict(doc: &mut Document) -> CleanResult {
    let mut result = CleanResult::new();

    let info_id = match doc.trailer.get(b"Info").ok().cloned() {
        Some(Object::Reference(id)) => id,
        Some(Object::Dictionary(_)) => {
            doc.trailer.remove(b"Info");
            result.add("removed inline Info dictionary".to_string());
            return result;
        }
        _ => return result,
    };

    if let Ok(Object::Dictionary(info)) = doc.get_object_mut(info_id) {
        for field in INFO_FIELDS {
            if info.has(field) {
                info.remove(field);
                result.add(format!("removed Info/{}", String::from_utf8_lossy(field)));
            }
        }
    }

    let now_empty = matches!(doc.get_object(info_id), Ok(Object::Dictionary(info)) if info.is_empty());
    if now_empty {
        doc.trailer.remove(b"Info");
        doc.objects.remove(&info_id);
        result.add("removed empty Info dictionary".to_string());
    }

    log::info!("[PDF] Info dictionary cleaned: {} item(s)", result.items_removed);
    result
}

/// Removes the catalog's `/Metadata` XMP stream.
pub fn clean_xmp_metadata(doc: &mut Document) -> Result<CleanResult, PdfError> {
    let mut result = CleanResult::new();
    let catalog_id = catalog_id(doc)?;

    let metadata_ref = match doc.get_object(catalog_id) {
        Ok(Object::Dictionary(catalog)) => match catalog.get(b"Metadata") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        },
        _ => None,
    };

    if let Some(metadata_id) = metadata_ref {
        doc.objects.remove(&metadata_id);
        if let Ok(Object::Dictionary(catalog)) = doc.get_object_mut(catalog_id) {
            catalog.remove(b"Metadata");
        }
        result.add(format!("removed XMP metadata stream {:?}", metadata_id));
    }

    log::info!("[PDF] XMP metadata cleaned: {} item(s)", result.items_removed);
    Ok(result)
}

fn catalog_id(doc: &Document) -> Result<ObjectId, PdfError> {
    match doc.trailer.get(b"Root") {
        Ok(Object::Reference(id)) => Ok(*id),
        _ => Err(PdfError::Content("document has no catalog".to_string())),
    }
}
