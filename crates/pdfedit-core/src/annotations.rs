//! Baking annotations into page content
//!
//! Converts annotation records into permanent drawing operators appended to
//! the target page's content streams. Input rectangles use the on-screen
//! convention (top-left origin, y grows downward); PDF content uses a
//! bottom-left origin with y growing upward, so every rectangle is flipped
//! against the target page's height before drawing.
//!
//! Baking is additive: applying the same list twice draws a second copy.

use crate::document::{load_document, PageGeometry};
use crate::error::PdfEditError;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Stroke width for underline, strikeout, and rectangle outlines
const LINE_WIDTH: f64 = 2.0;
/// Fixed size for baked text annotations
const TEXT_SIZE: i64 = 12;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PdfRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Underline,
    Strikeout,
    Rectangle,
    Text,
    Freeform,
    Arrow,
}

/// One annotation record, as produced by the editing surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    /// 0-based target page; annotations pointing past the last page are
    /// skipped, not errored
    pub page_index: u32,
    /// Top-left-origin, y-down rectangle matching on-screen pixel layout
    pub rect: PdfRect,
    /// Hex color, "#RRGGBB" or "RRGGBB"
    pub color: String,
    /// 0.0 to 1.0
    pub opacity: f64,
    /// Text annotations only
    #[serde(default)]
    pub content: Option<String>,
    /// Freeform annotations only
    #[serde(default)]
    pub points: Option<Vec<(f64, f64)>>,
}

/// Parse hex color string (e.g., "#FF0000" or "FF0000") to RGB floats (0-1 range)
pub(crate) fn parse_hex_color(color: &str) -> (f32, f32, f32) {
    let hex = color.trim_start_matches('#');
    if hex.len() >= 6 {
        let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(0) as f32 / 255.0;
        let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(0) as f32 / 255.0;
        let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(0) as f32 / 255.0;
        (r, g, b)
    } else {
        (0.0, 0.0, 0.0) // Default to black
    }
}

/// Bake the given annotations into the document's page content.
///
/// Annotations whose `page_index` has no corresponding page are skipped so a
/// single stray record cannot fail a whole export. An empty list returns the
/// input bytes unchanged.
pub fn apply_annotations(bytes: &[u8], annotations: &[Annotation]) -> Result<Vec<u8>, PdfEditError> {
    if annotations.is_empty() {
        return Ok(bytes.to_vec());
    }

    let mut doc = load_document(bytes)?;
    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();

    let mut heights = Vec::with_capacity(pages.len());
    for page_num in 1..=pages.len() as u32 {
        heights.push(PageGeometry::from_document(&doc, page_num)?.height as f64);
    }

    // Ops are grouped per page so each touched page gains exactly one new
    // content stream, in annotation-list order.
    let mut page_ops: BTreeMap<usize, Vec<Operation>> = BTreeMap::new();

    for annotation in annotations {
        let index = annotation.page_index as usize;
        let Some(&page_id) = pages.get(index) else {
            warn!(
                page_index = annotation.page_index,
                page_count = pages.len(),
                "annotation targets a missing page, skipping"
            );
            continue;
        };

        let rect = &annotation.rect;
        // Flip into the document's bottom-left-origin space
        let base_y = heights[index] - rect.y - rect.height;
        let rgb = parse_hex_color(&annotation.color);

        let ops = match annotation.kind {
            AnnotationKind::Highlight => {
                let gs = ensure_ext_gstate(&mut doc, page_id, annotation.opacity)?;
                Some(fill_rect_ops(&gs, rgb, rect.x, base_y, rect.width, rect.height))
            }
            AnnotationKind::Underline => {
                let gs = ensure_ext_gstate(&mut doc, page_id, annotation.opacity)?;
                Some(line_ops(&gs, rgb, rect.x, rect.x + rect.width, base_y))
            }
            AnnotationKind::Strikeout => {
                let gs = ensure_ext_gstate(&mut doc, page_id, annotation.opacity)?;
                Some(line_ops(
                    &gs,
                    rgb,
                    rect.x,
                    rect.x + rect.width,
                    base_y + rect.height / 2.0,
                ))
            }
            AnnotationKind::Rectangle => {
                let gs = ensure_ext_gstate(&mut doc, page_id, annotation.opacity)?;
                Some(outline_rect_ops(
                    &gs,
                    rgb,
                    rect.x,
                    base_y,
                    rect.width,
                    rect.height,
                ))
            }
            AnnotationKind::Text => match annotation.content.as_deref() {
                Some(content) if !content.is_empty() => {
                    let gs = ensure_ext_gstate(&mut doc, page_id, annotation.opacity)?;
                    let font = ensure_helvetica(&mut doc, page_id)?;
                    Some(text_ops(&gs, &font, rgb, rect.x, base_y, content))
                }
                _ => None,
            },
            AnnotationKind::Freeform | AnnotationKind::Arrow => {
                debug!(kind = ?annotation.kind, "annotation kind is rendered externally, not baked");
                None
            }
        };

        if let Some(ops) = ops {
            page_ops.entry(index).or_default().extend(ops);
        }
    }

    for (index, operations) in page_ops {
        let data = Content { operations }
            .encode()
            .map_err(|e| PdfEditError::Operation(format!("Failed to encode content: {}", e)))?;
        let stream_id = doc.add_object(Object::Stream(Stream::new(Dictionary::new(), data)));
        append_page_content(&mut doc, pages[index], stream_id)?;
    }

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfEditError::Operation(format!("Failed to save PDF: {}", e)))?;
    Ok(buffer)
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

fn fill_rect_ops(gs: &str, (r, g, b): (f32, f32, f32), x: f64, y: f64, w: f64, h: f64) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(gs.as_bytes().to_vec())]),
        Operation::new("rg", vec![Object::Real(r), Object::Real(g), Object::Real(b)]),
        Operation::new("re", vec![real(x), real(y), real(w), real(h)]),
        Operation::new("f", vec![]),
        Operation::new("Q", vec![]),
    ]
}

fn outline_rect_ops(gs: &str, (r, g, b): (f32, f32, f32), x: f64, y: f64, w: f64, h: f64) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(gs.as_bytes().to_vec())]),
        Operation::new("RG", vec![Object::Real(r), Object::Real(g), Object::Real(b)]),
        Operation::new("w", vec![real(LINE_WIDTH)]),
        Operation::new("re", vec![real(x), real(y), real(w), real(h)]),
        Operation::new("S", vec![]),
        Operation::new("Q", vec![]),
    ]
}

fn line_ops(gs: &str, (r, g, b): (f32, f32, f32), x1: f64, x2: f64, y: f64) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(gs.as_bytes().to_vec())]),
        Operation::new("RG", vec![Object::Real(r), Object::Real(g), Object::Real(b)]),
        Operation::new("w", vec![real(LINE_WIDTH)]),
        Operation::new("m", vec![real(x1), real(y)]),
        Operation::new("l", vec![real(x2), real(y)]),
        Operation::new("S", vec![]),
        Operation::new("Q", vec![]),
    ]
}

fn text_ops(
    gs: &str,
    font: &str,
    (r, g, b): (f32, f32, f32),
    x: f64,
    y: f64,
    content: &str,
) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(gs.as_bytes().to_vec())]),
        Operation::new("rg", vec![Object::Real(r), Object::Real(g), Object::Real(b)]),
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(font.as_bytes().to_vec()), Object::Integer(TEXT_SIZE)],
        ),
        Operation::new("Td", vec![real(x), real(y)]),
        Operation::new(
            "Tj",
            vec![Object::String(
                content.as_bytes().to_vec(),
                StringFormat::Literal,
            )],
        ),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]
}

/// Register an ExtGState carrying the annotation's alpha on the page, reusing
/// an existing entry when the same alpha was registered before
fn ensure_ext_gstate(
    doc: &mut Document,
    page_id: ObjectId,
    opacity: f64,
) -> Result<String, PdfEditError> {
    let alpha = opacity.clamp(0.0, 1.0);
    let name = format!("GSa{}", (alpha * 100.0).round() as i64);
    if page_resource_exists(doc, page_id, b"ExtGState", &name) {
        return Ok(name);
    }

    let mut gs = Dictionary::new();
    gs.set("Type", Object::Name(b"ExtGState".to_vec()));
    gs.set("ca", Object::Real(alpha as f32));
    gs.set("CA", Object::Real(alpha as f32));
    let gs_id = doc.add_object(Object::Dictionary(gs));

    set_page_resource(doc, page_id, b"ExtGState", &name, Object::Reference(gs_id))?;
    Ok(name)
}

/// Register a Helvetica font entry on the page for baked text
fn ensure_helvetica(doc: &mut Document, page_id: ObjectId) -> Result<String, PdfEditError> {
    let name = "FHelv".to_string();
    if page_resource_exists(doc, page_id, b"Font", &name) {
        return Ok(name);
    }

    let mut font = Dictionary::new();
    font.set("Type", Object::Name(b"Font".to_vec()));
    font.set("Subtype", Object::Name(b"Type1".to_vec()));
    font.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
    let font_id = doc.add_object(Object::Dictionary(font));

    set_page_resource(doc, page_id, b"Font", &name, Object::Reference(font_id))?;
    Ok(name)
}

fn page_resource_exists(doc: &Document, page_id: ObjectId, category: &[u8], name: &str) -> bool {
    let Ok(page) = doc.get_object(page_id).and_then(|obj| obj.as_dict()) else {
        return false;
    };
    let resources = match page.get(b"Resources") {
        Ok(Object::Dictionary(dict)) => Some(dict),
        Ok(Object::Reference(id)) => doc.get_object(*id).ok().and_then(|obj| obj.as_dict().ok()),
        _ => None,
    };
    let Some(resources) = resources else {
        return false;
    };
    let category = match resources.get(category) {
        Ok(Object::Dictionary(dict)) => Some(dict),
        Ok(Object::Reference(id)) => doc.get_object(*id).ok().and_then(|obj| obj.as_dict().ok()),
        _ => None,
    };
    category
        .map(|dict| dict.get(name.as_bytes()).is_ok())
        .unwrap_or(false)
}

/// Insert a named entry into one of the page's resource categories
/// (`/ExtGState`, `/Font`, `/XObject`, ...).
///
/// Indirect resources dictionaries are copied onto the page before editing so
/// a resources object shared between pages is never mutated for all of them.
pub(crate) fn set_page_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &[u8],
    name: &str,
    value: Object,
) -> Result<(), PdfEditError> {
    let current = doc
        .get_object(page_id)
        .and_then(|obj| obj.as_dict())
        .map_err(|e| PdfEditError::Operation(e.to_string()))?
        .get(b"Resources")
        .ok()
        .cloned();

    let mut resources = match current {
        Some(Object::Dictionary(dict)) => dict,
        Some(Object::Reference(id)) => doc
            .get_object(id)
            .and_then(|obj| obj.as_dict())
            .cloned()
            .unwrap_or_else(|_| Dictionary::new()),
        _ => Dictionary::new(),
    };

    let mut entries = match resources.get(category) {
        Ok(Object::Dictionary(dict)) => dict.clone(),
        Ok(Object::Reference(id)) => doc
            .get_object(*id)
            .and_then(|obj| obj.as_dict())
            .cloned()
            .unwrap_or_else(|_| Dictionary::new()),
        _ => Dictionary::new(),
    };
    entries.set(name.as_bytes().to_vec(), value);
    resources.set(category.to_vec(), Object::Dictionary(entries));

    let page = doc
        .get_object_mut(page_id)
        .and_then(|obj| obj.as_dict_mut())
        .map_err(|e| PdfEditError::Operation(e.to_string()))?;
    page.set("Resources", Object::Dictionary(resources));
    Ok(())
}

/// Append a content stream to the page's Contents entry, preserving whatever
/// shape (single reference, array, indirect array) it already has
pub(crate) fn append_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    stream_id: ObjectId,
) -> Result<(), PdfEditError> {
    let current = doc
        .get_object(page_id)
        .and_then(|obj| obj.as_dict())
        .map_err(|e| PdfEditError::Operation(e.to_string()))?
        .get(b"Contents")
        .ok()
        .cloned();

    let new_contents = match current {
        Some(Object::Array(mut array)) => {
            array.push(Object::Reference(stream_id));
            Object::Array(array)
        }
        Some(Object::Reference(id)) => {
            let indirect_array = match doc.get_object(id) {
                Ok(Object::Array(array)) => Some(array.clone()),
                _ => None,
            };
            match indirect_array {
                Some(mut array) => {
                    array.push(Object::Reference(stream_id));
                    if let Ok(target) = doc.get_object_mut(id) {
                        *target = Object::Array(array);
                    }
                    return Ok(());
                }
                None => Object::Array(vec![
                    Object::Reference(id),
                    Object::Reference(stream_id),
                ]),
            }
        }
        Some(other) => Object::Array(vec![other, Object::Reference(stream_id)]),
        None => Object::Reference(stream_id),
    };

    let page = doc
        .get_object_mut(page_id)
        .and_then(|obj| obj.as_dict_mut())
        .map_err(|e| PdfEditError::Operation(e.to_string()))?;
    page.set("Contents", new_contents);
    Ok(())
}
