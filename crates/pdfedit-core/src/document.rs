//! Document loading, metadata, and per-page geometry
//!
//! Thin adapter over lopdf: every operation in this crate goes through
//! `load_document` / `save_document` so policies like encryption tolerance
//! and compact serialization live in one place.

use crate::error::PdfEditError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;

/// Document metadata plus per-page geometry
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: u32,
    pub encrypted: bool,
    pub pages: Vec<PageGeometry>,
}

/// Geometry of a single page
#[derive(Debug, Clone, Serialize)]
pub struct PageGeometry {
    /// 0-based position in the document
    pub index: u32,
    /// Page width in points (1 point = 1/72 inch)
    pub width: f32,
    /// Page height in points
    pub height: f32,
    /// Page rotation in degrees (0, 90, 180, 270)
    pub rotation: i32,
    /// Estimated orientation based on dimensions
    pub orientation: PageOrientation,
}

/// Page orientation
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub enum PageOrientation {
    Portrait,
    Landscape,
    Square,
}

/// Serialization options for [`save_document`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    /// Prune unreachable objects and compress streams before writing
    pub compact: bool,
}

/// Load a PDF from memory.
///
/// Encrypted documents load anyway; restrictions are ignored rather than
/// enforced, so downstream operations see the same object graph either way.
pub fn load_document(bytes: &[u8]) -> Result<Document, PdfEditError> {
    let doc = Document::load_mem(bytes).map_err(|e| PdfEditError::Parse(e.to_string()))?;
    if is_encrypted(&doc) {
        tracing::debug!("document carries an /Encrypt dictionary, loading permissively");
    }
    Ok(doc)
}

/// Create an empty destination document
pub fn new_document() -> Document {
    Document::with_version("1.5")
}

/// Serialize a document to bytes
pub fn save_document(doc: &mut Document, options: SaveOptions) -> Result<Vec<u8>, PdfEditError> {
    if options.compact {
        doc.prune_objects();
        doc.compress();
    }

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfEditError::Operation(format!("Failed to save PDF: {}", e)))?;
    Ok(buffer)
}

/// Read document metadata and per-page geometry
pub fn load_info(bytes: &[u8]) -> Result<DocumentInfo, PdfEditError> {
    let doc = load_document(bytes)?;
    let page_count = doc.get_pages().len() as u32;

    let mut pages = Vec::with_capacity(page_count as usize);
    for page_num in 1..=page_count {
        pages.push(PageGeometry::from_document(&doc, page_num)?);
    }

    let info = info_dictionary(&doc);
    let field = |key: &[u8]| {
        info.and_then(|dict| dict.get(key).ok())
            .and_then(decode_text)
    };

    Ok(DocumentInfo {
        title: field(b"Title"),
        author: field(b"Author"),
        subject: field(b"Subject"),
        keywords: field(b"Keywords"),
        creator: field(b"Creator"),
        producer: field(b"Producer"),
        creation_date: field(b"CreationDate"),
        modification_date: field(b"ModDate"),
        page_count,
        encrypted: is_encrypted(&doc),
        pages,
    })
}

impl PageGeometry {
    /// Extract page geometry from a document (`page_num` is 1-indexed, as in
    /// lopdf's page map; the returned `index` is 0-based)
    pub fn from_document(doc: &Document, page_num: u32) -> Result<Self, PdfEditError> {
        let pages = doc.get_pages();
        let page_id = pages
            .get(&page_num)
            .copied()
            .ok_or_else(|| PdfEditError::PageIndex(format!("Page {} not found", page_num)))?;

        let page_dict = doc
            .get_object(page_id)
            .and_then(|obj| obj.as_dict())
            .map_err(|_| PdfEditError::Parse(format!("Page {} is not a dictionary", page_num)))?;

        let media_box = get_media_box(doc, page_dict)?;
        let (width, height) = (media_box[2] - media_box[0], media_box[3] - media_box[1]);

        let rotation = page_rotation(doc, page_id);

        // Orientation accounts for rotation
        let (effective_width, effective_height) = if rotation == 90 || rotation == 270 {
            (height, width)
        } else {
            (width, height)
        };

        let orientation = if (effective_width - effective_height).abs() < 1.0 {
            PageOrientation::Square
        } else if effective_width > effective_height {
            PageOrientation::Landscape
        } else {
            PageOrientation::Portrait
        };

        Ok(Self {
            index: page_num - 1,
            width: width as f32,
            height: height as f32,
            rotation,
            orientation,
        })
    }
}

fn is_encrypted(doc: &Document) -> bool {
    doc.trailer.get(b"Encrypt").is_ok()
}

/// Resolve the trailer's Info dictionary, if any
fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// Decode a PDF text string (UTF-16BE with BOM, or PDFDocEncoding treated as
/// Latin-ish bytes)
fn decode_text(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => {
            if bytes.starts_with(&[0xFE, 0xFF]) {
                let utf16: Vec<u16> = bytes[2..]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Some(String::from_utf16_lossy(&utf16))
            } else {
                Some(String::from_utf8_lossy(bytes).into_owned())
            }
        }
        _ => None,
    }
}

/// Get MediaBox from page, inheriting from parents if necessary
fn get_media_box(doc: &Document, page_dict: &Dictionary) -> Result<[f64; 4], PdfEditError> {
    if let Ok(media_box) = page_dict.get(b"MediaBox") {
        if let Ok(array) = media_box.as_array() {
            return parse_box_array(array);
        }
    }

    if let Some(inherited) = inherited_entry(doc, page_dict, b"MediaBox") {
        if let Ok(array) = inherited.as_array() {
            return parse_box_array(array);
        }
    }

    // Default to US Letter size
    Ok([0.0, 0.0, 612.0, 792.0])
}

/// Parse a box array [x1, y1, x2, y2]
pub(crate) fn parse_box_array(array: &[Object]) -> Result<[f64; 4], PdfEditError> {
    if array.len() != 4 {
        return Err(PdfEditError::Parse(
            "MediaBox must have 4 elements".to_string(),
        ));
    }

    let mut result = [0.0; 4];
    for (i, obj) in array.iter().enumerate() {
        result[i] = match obj {
            Object::Integer(n) => *n as f64,
            Object::Real(n) => *n as f64,
            _ => {
                return Err(PdfEditError::Parse(format!(
                    "MediaBox element {} is not a number",
                    i
                )))
            }
        };
    }

    Ok(result)
}

/// Effective rotation of a page, inheriting from parents, normalized
pub(crate) fn page_rotation(doc: &Document, page_id: ObjectId) -> i32 {
    let Ok(page_dict) = doc.get_object(page_id).and_then(|obj| obj.as_dict()) else {
        return 0;
    };

    if let Ok(rotate) = page_dict.get(b"Rotate") {
        if let Ok(angle) = rotate.as_i64() {
            return normalize_rotation(angle as i32);
        }
    }

    if let Some(inherited) = inherited_entry(doc, page_dict, b"Rotate") {
        if let Ok(angle) = inherited.as_i64() {
            return normalize_rotation(angle as i32);
        }
    }

    0
}

/// Walk the Parent chain looking for an inheritable page attribute
pub(crate) fn inherited_entry<'a>(
    doc: &'a Document,
    page_dict: &Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    let mut parent = page_dict
        .get(b"Parent")
        .ok()
        .and_then(|obj| obj.as_reference().ok());
    // Bounded walk; a cyclic page tree is malformed and must not hang us
    let mut remaining = 64;

    while let Some(parent_id) = parent {
        if remaining == 0 {
            return None;
        }
        remaining -= 1;

        let dict = doc.get_object(parent_id).ok()?.as_dict().ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        parent = dict.get(b"Parent").ok().and_then(|obj| obj.as_reference().ok());
    }

    None
}

/// Normalize rotation to 0, 90, 180, or 270
pub(crate) fn normalize_rotation(angle: i32) -> i32 {
    let normalized = angle % 360;
    if normalized < 0 {
        normalized + 360
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream, StringFormat};

    /// Helper to create a simple PDF with N pages and Info metadata
    fn create_test_pdf(num_pages: u32) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut page_ids = Vec::new();
        for page_num in 0..num_pages {
            let content = format!("BT /F1 12 Tf 50 700 Td (Page-{}) Tj ET", page_num + 1);
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));

            let page = dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => Object::Reference(content_id),
            };
            page_ids.push(doc.add_object(page));
        }

        let pages = dictionary! {
            "Type" => "Pages",
            "Count" => num_pages as i64,
            "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let info_id = doc.add_object(dictionary! {
            "Title" => Object::String(b"Quarterly Report".to_vec(), StringFormat::Literal),
            "Author" => Object::String(b"Jane Doe".to_vec(), StringFormat::Literal),
            "Producer" => Object::String(b"pdfedit".to_vec(), StringFormat::Literal),
        });
        doc.trailer.set("Info", Object::Reference(info_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_load_info_reads_metadata_and_geometry() {
        let pdf = create_test_pdf(3);
        let info = load_info(&pdf).unwrap();

        assert_eq!(info.page_count, 3);
        assert_eq!(info.title.as_deref(), Some("Quarterly Report"));
        assert_eq!(info.author.as_deref(), Some("Jane Doe"));
        assert_eq!(info.producer.as_deref(), Some("pdfedit"));
        assert!(info.subject.is_none());
        assert!(!info.encrypted);

        assert_eq!(info.pages.len(), 3);
        let first = &info.pages[0];
        assert_eq!(first.index, 0);
        assert_eq!(first.width, 612.0);
        assert_eq!(first.height, 792.0);
        assert_eq!(first.rotation, 0);
        assert_eq!(first.orientation, PageOrientation::Portrait);
    }

    #[test]
    fn test_load_rejects_malformed_input() {
        let result = load_document(b"this is not a pdf");
        assert!(matches!(result, Err(PdfEditError::Parse(_))));
    }

    #[test]
    fn test_save_compact_stays_loadable() {
        let pdf = create_test_pdf(2);
        let mut doc = load_document(&pdf).unwrap();
        let compacted = save_document(&mut doc, SaveOptions { compact: true }).unwrap();

        let reloaded = Document::load_mem(&compacted).unwrap();
        assert_eq!(reloaded.get_pages().len(), 2);
    }

    #[test]
    fn test_media_box_inherited_from_pages_node() {
        // Page without its own MediaBox inherits from the Pages dictionary
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Count" => 1,
            "Kids" => vec![Object::Reference(page_id)],
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let geometry = PageGeometry::from_document(&doc, 1).unwrap();
        assert_eq!(geometry.width, 595.0);
        assert_eq!(geometry.height, 842.0);
    }

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(0), 0);
        assert_eq!(normalize_rotation(90), 90);
        assert_eq!(normalize_rotation(180), 180);
        assert_eq!(normalize_rotation(270), 270);
        assert_eq!(normalize_rotation(360), 0);
        assert_eq!(normalize_rotation(450), 90);
        assert_eq!(normalize_rotation(-90), 270);
    }

    #[test]
    fn test_parse_box_array() {
        let array = vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(612.0),
            Object::Real(792.0),
        ];
        let result = parse_box_array(&array).unwrap();
        assert_eq!(result, [0.0, 0.0, 612.0, 792.0]);
    }

    #[test]
    fn test_decode_text_utf16() {
        // "Hi" as UTF-16BE with BOM
        let obj = Object::String(
            vec![0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69],
            StringFormat::Literal,
        );
        assert_eq!(decode_text(&obj).as_deref(), Some("Hi"));
    }
}
