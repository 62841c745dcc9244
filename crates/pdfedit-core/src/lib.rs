//! PDF document transformation pipeline
//!
//! This crate provides the document-editing core behind the desktop shell:
//! merging files, reordering/extracting/deleting/rotating pages, baking
//! annotations into page content, and compression (in-process or through an
//! external optimizer).
//!
//! Every operation is buffer-in/buffer-out over lopdf: each call loads its
//! own document instances, owns them exclusively, and drops them on return,
//! so concurrent calls over different buffers need no coordination.

pub mod annotations;
pub mod command;
pub mod compress;
pub mod document;
pub mod error;
pub mod pages;

pub use annotations::{apply_annotations, Annotation, AnnotationKind, PdfRect};
pub use command::{execute, EditCommand, OperationMetrics, OperationResult};
pub use compress::{compress, compress_in_process, CompressionLevel, CompressionResult};
pub use document::{load_info, DocumentInfo, PageGeometry, PageOrientation};
pub use error::PdfEditError;
pub use pages::{delete_pages, extract_pages, merge, reorder_pages, rotate_pages, MergeSource};

/// Parse PDF bytes and return page count
pub fn get_page_count(bytes: &[u8]) -> Result<u32, PdfEditError> {
    let doc = document::load_document(bytes)?;
    Ok(doc.get_pages().len() as u32)
}

/// Parse a 1-based page range string like "1-3, 5, 8-10" into sorted unique
/// 0-based page indices
pub fn parse_page_ranges(input: &str) -> Result<Vec<u32>, PdfEditError> {
    use std::collections::BTreeSet;

    let mut pages = BTreeSet::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            // Range like "1-3"
            let start: u32 = start
                .trim()
                .parse()
                .map_err(|_| PdfEditError::InvalidRange(format!("Invalid start: {}", start)))?;
            let end: u32 = end
                .trim()
                .parse()
                .map_err(|_| PdfEditError::InvalidRange(format!("Invalid end: {}", end)))?;

            if start == 0 || end == 0 {
                return Err(PdfEditError::InvalidRange(
                    "Page numbers are 1-based".into(),
                ));
            }
            if start > end {
                return Err(PdfEditError::InvalidRange(format!(
                    "Start {} > end {}",
                    start, end
                )));
            }

            for page in start..=end {
                pages.insert(page - 1);
            }
        } else {
            // Single page like "5"
            let page: u32 = part
                .parse()
                .map_err(|_| PdfEditError::InvalidRange(format!("Invalid page: {}", part)))?;
            if page == 0 {
                return Err(PdfEditError::InvalidRange(
                    "Page numbers are 1-based".into(),
                ));
            }
            pages.insert(page - 1);
        }
    }

    Ok(pages.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ranges_single() {
        let result = parse_page_ranges("5").unwrap();
        assert_eq!(result, vec![4]);
    }

    #[test]
    fn test_parse_ranges_range() {
        let result = parse_page_ranges("1-3").unwrap();
        assert_eq!(result, vec![0, 1, 2]);
    }

    #[test]
    fn test_parse_ranges_complex() {
        let result = parse_page_ranges("1-3, 5, 8-10").unwrap();
        assert_eq!(result, vec![0, 1, 2, 4, 7, 8, 9]);
    }

    #[test]
    fn test_parse_ranges_deduplicates() {
        let result = parse_page_ranges("1-3, 2-4").unwrap();
        assert_eq!(result, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_ranges_rejects_zero() {
        assert!(parse_page_ranges("0").is_err());
        assert!(parse_page_ranges("0-3").is_err());
    }

    #[test]
    fn test_parse_ranges_rejects_backwards() {
        assert!(parse_page_ranges("5-2").is_err());
    }

    #[test]
    fn test_get_page_count_rejects_garbage() {
        assert!(get_page_count(b"nope").is_err());
    }
}
