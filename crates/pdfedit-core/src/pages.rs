//! Page set operations: merge, reorder, extract, delete, rotate
//!
//! Every operation here is a variant of one algorithm: copy selected pages,
//! in a given order, from one or more source documents into a freshly built
//! destination document. Sources are never mutated and no partial document
//! is ever returned.

use crate::document::{
    inherited_entry, load_document, new_document, normalize_rotation, page_rotation,
    save_document, SaveOptions,
};
use crate::error::PdfEditError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One input document for [`merge`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSource {
    pub id: String,
    pub file_name: String,
    /// Raw PDF bytes
    pub bytes: Vec<u8>,
    /// Total page count as reported by the caller (informational; the loaded
    /// document is authoritative)
    #[serde(default)]
    pub page_count: u32,
    /// Ordered 0-based page selection. Duplicates and repeats are allowed;
    /// empty means "all pages in ascending order".
    #[serde(default)]
    pub selected_pages: Vec<u32>,
}

/// Merge multiple PDFs into one.
///
/// Sources are processed strictly in list order; page order within a source
/// follows its selection list verbatim, which supports duplication and
/// reordering within one source.
pub fn merge(sources: &[MergeSource]) -> Result<Vec<u8>, PdfEditError> {
    if sources.is_empty() {
        return Err(PdfEditError::Operation("No sources to merge".into()));
    }

    let mut resolved = Vec::with_capacity(sources.len());
    for source in sources {
        let doc = load_document(&source.bytes).map_err(|e| {
            PdfEditError::Parse(format!("Failed to load '{}': {}", source.file_name, e))
        })?;

        let selection = if source.selected_pages.is_empty() {
            (0..doc.get_pages().len() as u32).collect()
        } else {
            source.selected_pages.clone()
        };
        resolved.push((doc, selection));
    }

    assemble(resolved)
}

/// Rebuild a document with its pages in the given order.
///
/// `order` is expected to be a permutation of [0, page_count), but this is
/// not enforced: repeated or omitted indices produce exactly that page
/// multiset. Callers that need a strict permutation validate upstream.
pub fn reorder_pages(bytes: &[u8], order: &[u32]) -> Result<Vec<u8>, PdfEditError> {
    if order.is_empty() {
        return Err(PdfEditError::InvalidRange("No pages specified".into()));
    }

    let doc = load_document(bytes)?;
    assemble(vec![(doc, order.to_vec())])
}

/// Build a new document containing only the selected pages, in selection order
pub fn extract_pages(bytes: &[u8], indices: &[u32]) -> Result<Vec<u8>, PdfEditError> {
    if indices.is_empty() {
        return Err(PdfEditError::InvalidRange("No pages specified".into()));
    }

    let doc = load_document(bytes)?;
    assemble(vec![(doc, indices.to_vec())])
}

/// Build a new document with the given pages removed.
///
/// Implemented as an extraction of the ascending complement of `indices`
/// within [0, page_count); indices outside that range have nothing to remove
/// and are ignored.
pub fn delete_pages(bytes: &[u8], indices: &[u32]) -> Result<Vec<u8>, PdfEditError> {
    let doc = load_document(bytes)?;
    let page_count = doc.get_pages().len() as u32;

    let to_delete: HashSet<u32> = indices.iter().copied().collect();
    let selection: Vec<u32> = (0..page_count).filter(|p| !to_delete.contains(p)).collect();
    if selection.is_empty() {
        return Err(PdfEditError::Operation(
            "Deleting every page would produce an empty document".into(),
        ));
    }

    assemble(vec![(doc, selection)])
}

/// Rotate the addressed pages by `degrees` (a multiple of 90), relative to
/// their current rotation
pub fn rotate_pages(bytes: &[u8], indices: &[u32], degrees: i32) -> Result<Vec<u8>, PdfEditError> {
    if degrees % 90 != 0 {
        return Err(PdfEditError::InvalidRange(format!(
            "Rotation must be a multiple of 90, got {}",
            degrees
        )));
    }
    if indices.is_empty() {
        return Err(PdfEditError::InvalidRange("No pages specified".into()));
    }

    let mut doc = load_document(bytes)?;
    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();

    for &index in indices {
        if index as usize >= pages.len() {
            return Err(PdfEditError::PageIndex(format!(
                "Page {} does not exist (document has {} pages)",
                index,
                pages.len()
            )));
        }
    }

    for &index in indices {
        let page_id = pages[index as usize];
        let rotation = normalize_rotation(page_rotation(&doc, page_id) + degrees);
        if let Some(Object::Dictionary(dict)) = doc.objects.get_mut(&page_id) {
            dict.set("Rotate", Object::Integer(rotation as i64));
        }
    }

    save_document(&mut doc, SaveOptions::default())
}

/// Copy the selected pages of each source, in order, into a new document.
///
/// The algorithm:
/// 1. For each source, pull inheritable attributes down onto its pages
/// 2. Import all source objects with remapped IDs to avoid conflicts
/// 3. Resolve the selection against the imported page objects (repeated
///    entries get their own cloned page object, so copies stay independent)
/// 4. Build a fresh page tree and catalog over the collected pages
/// 5. Prune everything unreachable, compress, and serialize
fn assemble(sources: Vec<(Document, Vec<u32>)>) -> Result<Vec<u8>, PdfEditError> {
    let mut dest = new_document();
    let mut dest_page_refs: Vec<ObjectId> = Vec::new();

    for (mut source, selection) in sources {
        let source_pages: Vec<ObjectId> = source.get_pages().values().copied().collect();

        // Re-parenting under the destination tree breaks attribute
        // inheritance, so materialize inherited values on the pages first.
        for &page_id in &source_pages {
            flatten_inherited_attributes(&mut source, page_id);
        }

        let id_offset = dest.max_id;
        let source_max_id = source.max_id;

        let mut remapped = BTreeMap::new();
        for (old_id, object) in std::mem::take(&mut source.objects) {
            let new_id = (old_id.0 + id_offset, old_id.1);
            remapped.insert(new_id, remap_object_refs(object, id_offset));
        }
        dest.objects.extend(remapped);
        dest.max_id = source_max_id + id_offset;

        let mut used: HashSet<ObjectId> = HashSet::new();
        for index in selection {
            let page_ref = source_pages.get(index as usize).copied().ok_or_else(|| {
                PdfEditError::PageIndex(format!(
                    "Page {} does not exist (document has {} pages)",
                    index,
                    source_pages.len()
                ))
            })?;
            let page_ref = (page_ref.0 + id_offset, page_ref.1);

            let page_ref = if used.insert(page_ref) {
                page_ref
            } else {
                // A repeated selection entry gets its own page object
                let clone = dest
                    .objects
                    .get(&page_ref)
                    .cloned()
                    .ok_or_else(|| PdfEditError::Operation("Selected page object missing".into()))?;
                dest.add_object(clone)
            };
            dest_page_refs.push(page_ref);
        }
    }

    tracing::debug!(pages = dest_page_refs.len(), "assembled destination document");
    attach_page_tree(&mut dest, dest_page_refs)?;
    save_document(&mut dest, SaveOptions { compact: true })
}

/// Inheritable page-tree attributes per the PDF page model
const INHERITABLE_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Copy inherited attributes down onto the page dictionary itself
fn flatten_inherited_attributes(doc: &mut Document, page_id: ObjectId) {
    let mut found: Vec<(&'static [u8], Object)> = Vec::new();
    {
        let Ok(page) = doc.get_object(page_id).and_then(|obj| obj.as_dict()) else {
            return;
        };
        for key in INHERITABLE_PAGE_KEYS {
            if page.get(key).is_ok() {
                continue;
            }
            if let Some(value) = inherited_entry(doc, page, key) {
                found.push((key, value.clone()));
            }
        }
    }

    if found.is_empty() {
        return;
    }
    if let Some(Object::Dictionary(dict)) = doc.objects.get_mut(&page_id) {
        for (key, value) in found {
            dict.set(key, value);
        }
    }
}

/// Recursively remap object references in an object
fn remap_object_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(arr) => Object::Array(
            arr.into_iter()
                .map(|o| remap_object_refs(o, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}

/// Install a page tree and catalog over the collected page objects
fn attach_page_tree(doc: &mut Document, page_refs: Vec<ObjectId>) -> Result<(), PdfEditError> {
    let pages_id = doc.new_object_id();

    for &page_ref in &page_refs {
        match doc.objects.get_mut(&page_ref) {
            Some(Object::Dictionary(dict)) => dict.set("Parent", Object::Reference(pages_id)),
            _ => {
                return Err(PdfEditError::Operation(
                    "Selected page is not a dictionary".into(),
                ))
            }
        }
    }

    let kids = page_refs
        .iter()
        .map(|&id| Object::Reference(id))
        .collect::<Vec<_>>();
    let mut pages_dict = Dictionary::new();
    pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
    pages_dict.set("Count", Object::Integer(page_refs.len() as i64));
    pages_dict.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(Object::Dictionary(catalog));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Stream, StringFormat};

    // Helper to create a simple PDF with N pages of identifiable content
    fn create_test_pdf(num_pages: u32, content_prefix: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let mut page_ids = Vec::new();
        for i in 0..num_pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new(
                        "Tf",
                        vec![Object::Name(b"F1".to_vec()), Object::Integer(12)],
                    ),
                    Operation::new("Td", vec![Object::Integer(100), Object::Integer(700)]),
                    Operation::new(
                        "Tj",
                        vec![Object::String(
                            format!("{}-Page-{}", content_prefix, i + 1).into_bytes(),
                            StringFormat::Literal,
                        )],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

            let page = Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                (
                    "MediaBox",
                    Object::Array(vec![
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(612),
                        Object::Integer(792),
                    ]),
                ),
                ("Contents", Object::Reference(content_id)),
            ]);
            page_ids.push(doc.add_object(page));
        }

        let pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(num_pages as i64)),
            (
                "Kids",
                Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
            ),
        ]);
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]);
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn source(name: &str, bytes: Vec<u8>, selected: Vec<u32>) -> MergeSource {
        MergeSource {
            id: name.to_string(),
            file_name: format!("{}.pdf", name),
            page_count: 0,
            bytes,
            selected_pages: selected,
        }
    }

    /// Content bytes of page `index` (0-based) in a serialized document
    fn page_content(bytes: &[u8], index: u32) -> Vec<u8> {
        let doc = Document::load_mem(bytes).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        doc.get_page_content(pages[index as usize]).unwrap()
    }

    #[test]
    fn test_merge_empty_fails() {
        let result = merge(&[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_two_single_page_sources() {
        let a = create_test_pdf(1, "DocA");
        let b = create_test_pdf(1, "DocB");

        let merged = merge(&[source("a", a, vec![0]), source("b", b, vec![0])]).unwrap();

        let doc = Document::load_mem(&merged).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn test_merge_page_count_is_sum_of_selections() {
        let a = create_test_pdf(3, "DocA");
        let b = create_test_pdf(2, "DocB");

        let merged = merge(&[source("a", a, vec![0, 2]), source("b", b, vec![1])]).unwrap();

        let doc = Document::load_mem(&merged).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn test_merge_preserves_source_then_selection_order() {
        let a = create_test_pdf(3, "DocA");
        let b = create_test_pdf(2, "DocB");

        let merged = merge(&[
            source("a", a.clone(), vec![2, 0]),
            source("b", b.clone(), vec![1]),
        ])
        .unwrap();

        assert_eq!(page_content(&merged, 0), page_content(&a, 2));
        assert_eq!(page_content(&merged, 1), page_content(&a, 0));
        assert_eq!(page_content(&merged, 2), page_content(&b, 1));
    }

    #[test]
    fn test_merge_empty_selection_takes_all_pages() {
        let a = create_test_pdf(4, "DocA");
        let merged = merge(&[source("a", a, vec![])]).unwrap();

        let doc = Document::load_mem(&merged).unwrap();
        assert_eq!(doc.get_pages().len(), 4);
    }

    #[test]
    fn test_merge_out_of_range_selection_fails() {
        let a = create_test_pdf(2, "DocA");
        let result = merge(&[source("a", a, vec![0, 5])]);
        assert!(matches!(result, Err(PdfEditError::PageIndex(_))));
    }

    #[test]
    fn test_merge_sources_are_not_mutated() {
        let a = create_test_pdf(2, "DocA");
        let before = a.clone();
        let _ = merge(&[source("a", a.clone(), vec![0])]).unwrap();
        assert_eq!(a, before);
    }

    #[test]
    fn test_reorder_moves_last_page_first() {
        let pdf = create_test_pdf(3, "Doc");
        let reordered = reorder_pages(&pdf, &[2, 0, 1]).unwrap();

        let doc = Document::load_mem(&reordered).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
        assert_eq!(page_content(&reordered, 0), page_content(&pdf, 2));
        assert_eq!(page_content(&reordered, 1), page_content(&pdf, 0));
        assert_eq!(page_content(&reordered, 2), page_content(&pdf, 1));
    }

    #[test]
    fn test_reorder_with_repetition_duplicates_pages() {
        let pdf = create_test_pdf(2, "Doc");
        let result = reorder_pages(&pdf, &[0, 0, 1]).unwrap();

        let doc = Document::load_mem(&result).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
        assert_eq!(page_content(&result, 0), page_content(&result, 1));
    }

    #[test]
    fn test_reorder_out_of_range_fails() {
        let pdf = create_test_pdf(3, "Doc");
        let result = reorder_pages(&pdf, &[0, 3]);
        assert!(matches!(result, Err(PdfEditError::PageIndex(_))));
    }

    #[test]
    fn test_extract_subset() {
        let pdf = create_test_pdf(5, "Doc");
        let extracted = extract_pages(&pdf, &[1, 3]).unwrap();

        let doc = Document::load_mem(&extracted).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
        assert_eq!(page_content(&extracted, 0), page_content(&pdf, 1));
        assert_eq!(page_content(&extracted, 1), page_content(&pdf, 3));
    }

    #[test]
    fn test_extract_empty_selection_fails() {
        let pdf = create_test_pdf(3, "Doc");
        assert!(extract_pages(&pdf, &[]).is_err());
    }

    #[test]
    fn test_delete_and_extract_partition_the_document() {
        let pdf = create_test_pdf(4, "Doc");
        let kept = delete_pages(&pdf, &[1, 3]).unwrap();
        let removed = extract_pages(&pdf, &[1, 3]).unwrap();

        let kept_doc = Document::load_mem(&kept).unwrap();
        let removed_doc = Document::load_mem(&removed).unwrap();
        assert_eq!(kept_doc.get_pages().len() + removed_doc.get_pages().len(), 4);

        assert_eq!(page_content(&kept, 0), page_content(&pdf, 0));
        assert_eq!(page_content(&kept, 1), page_content(&pdf, 2));
        assert_eq!(page_content(&removed, 0), page_content(&pdf, 1));
        assert_eq!(page_content(&removed, 1), page_content(&pdf, 3));
    }

    #[test]
    fn test_delete_every_page_fails() {
        let pdf = create_test_pdf(2, "Doc");
        assert!(delete_pages(&pdf, &[0, 1]).is_err());
    }

    #[test]
    fn test_delete_ignores_out_of_range_indices() {
        let pdf = create_test_pdf(3, "Doc");
        let result = delete_pages(&pdf, &[1, 99]).unwrap();

        let doc = Document::load_mem(&result).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn test_rotate_sets_normalized_rotation() {
        let pdf = create_test_pdf(2, "Doc");
        let rotated = rotate_pages(&pdf, &[0], 270).unwrap();
        let rotated = rotate_pages(&rotated, &[0], 180).unwrap();

        let doc = Document::load_mem(&rotated).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        assert_eq!(page_rotation(&doc, pages[0]), 90);
        assert_eq!(page_rotation(&doc, pages[1]), 0);
    }

    #[test]
    fn test_rotate_rejects_non_right_angles() {
        let pdf = create_test_pdf(1, "Doc");
        assert!(rotate_pages(&pdf, &[0], 45).is_err());
    }

    #[test]
    fn test_rotate_out_of_range_fails() {
        let pdf = create_test_pdf(1, "Doc");
        assert!(matches!(
            rotate_pages(&pdf, &[1], 90),
            Err(PdfEditError::PageIndex(_))
        ));
    }

    #[test]
    fn test_merged_document_is_valid_pdf() {
        let a = create_test_pdf(2, "Valid1");
        let b = create_test_pdf(2, "Valid2");

        let merged = merge(&[source("a", a, vec![]), source("b", b, vec![])]).unwrap();

        let doc = Document::load_mem(&merged);
        assert!(doc.is_ok(), "Merged document should be valid PDF");
        assert_eq!(doc.unwrap().get_pages().len(), 4);
    }
}
