//! Serializable command boundary
//!
//! The hosting shell (UI or IPC layer) talks to the pipeline through
//! [`EditCommand`] / [`OperationResult`]: plain data in, plain data out.
//! Every operation failure is folded into the result envelope; `execute`
//! never panics on input-driven errors.

use crate::annotations::{apply_annotations, Annotation};
use crate::compress::{compress, CompressionLevel, CompressionResult};
use crate::pages::{delete_pages, extract_pages, merge, reorder_pages, rotate_pages, MergeSource};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum EditCommand {
    Merge {
        sources: Vec<MergeSource>,
    },
    Reorder {
        file: Vec<u8>,
        order: Vec<u32>,
    },
    Extract {
        file: Vec<u8>,
        indices: Vec<u32>,
    },
    Delete {
        file: Vec<u8>,
        indices: Vec<u32>,
    },
    Rotate {
        file: Vec<u8>,
        indices: Vec<u32>,
        degrees: i32,
    },
    ApplyAnnotations {
        file: Vec<u8>,
        annotations: Vec<Annotation>,
    },
    Compress {
        file: Vec<u8>,
        level: CompressionLevel,
    },
}

impl EditCommand {
    fn input_size(&self) -> usize {
        match self {
            EditCommand::Merge { sources } => sources.iter().map(|s| s.bytes.len()).sum(),
            EditCommand::Reorder { file, .. }
            | EditCommand::Extract { file, .. }
            | EditCommand::Delete { file, .. }
            | EditCommand::Rotate { file, .. }
            | EditCommand::ApplyAnnotations { file, .. }
            | EditCommand::Compress { file, .. } => file.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub success: bool,
    /// Base64-encoded PDF data
    pub data: Option<String>,
    pub error: Option<String>,
    pub metrics: Option<OperationMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationMetrics {
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub page_count: u32,
    pub processing_time_ms: u64,
}

/// Run one command, folding any failure into the result envelope
pub fn execute(command: EditCommand) -> OperationResult {
    let started = Instant::now();
    let input_size = command.input_size();

    let outcome = match command {
        EditCommand::Merge { sources } => merge(&sources),
        EditCommand::Reorder { file, order } => reorder_pages(&file, &order),
        EditCommand::Extract { file, indices } => extract_pages(&file, &indices),
        EditCommand::Delete { file, indices } => delete_pages(&file, &indices),
        EditCommand::Rotate {
            file,
            indices,
            degrees,
        } => rotate_pages(&file, &indices, degrees),
        EditCommand::ApplyAnnotations { file, annotations } => {
            apply_annotations(&file, &annotations)
        }
        EditCommand::Compress { file, level } => {
            let result = compress(&file, level);
            return compression_envelope(result, started);
        }
    };

    match outcome {
        Ok(bytes) => success_envelope(bytes, input_size, started),
        Err(e) => OperationResult {
            success: false,
            data: None,
            error: Some(e.to_string()),
            metrics: None,
        },
    }
}

fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn success_envelope(bytes: Vec<u8>, input_size: usize, started: Instant) -> OperationResult {
    let page_count = crate::get_page_count(&bytes).unwrap_or(0);
    OperationResult {
        success: true,
        data: Some(encode(&bytes)),
        error: None,
        metrics: Some(OperationMetrics {
            input_size_bytes: input_size,
            output_size_bytes: bytes.len(),
            page_count,
            processing_time_ms: started.elapsed().as_millis() as u64,
        }),
    }
}

fn compression_envelope(result: CompressionResult, started: Instant) -> OperationResult {
    let page_count = result
        .data
        .as_deref()
        .and_then(|bytes| crate::get_page_count(bytes).ok())
        .unwrap_or(0);
    OperationResult {
        success: result.success,
        data: result.data.as_deref().map(encode),
        error: result.error,
        metrics: Some(OperationMetrics {
            input_size_bytes: result.original_size,
            output_size_bytes: result.compressed_size,
            page_count,
            processing_time_ms: started.elapsed().as_millis() as u64,
        }),
    }
}
