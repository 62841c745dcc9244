use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfEditError {
    #[error("Failed to parse PDF: {0}")]
    Parse(String),

    #[error("Invalid page range: {0}")]
    InvalidRange(String),

    #[error("Page index out of range: {0}")]
    PageIndex(String),

    #[error("PDF operation failed: {0}")]
    Operation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
