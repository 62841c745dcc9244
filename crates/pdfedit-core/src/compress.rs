//! Document compression
//!
//! Two passes coexist: an in-process pass that re-saves the document with a
//! compact object layout (optionally stripping metadata and flattening form
//! fields), and an external pass that drives a Ghostscript-compatible
//! optimizer through a scratch directory. The external pass is the primary
//! path; both report their outcome as a [`CompressionResult`] and never
//! surface an error to the caller.

use crate::annotations::{append_page_content, set_page_resource};
use crate::document::{load_document, parse_box_array, save_document, SaveOptions};
use crate::error::PdfEditError;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long the external optimizer may run before it is killed.
///
/// The bound exists so a wedged optimizer cannot hang the caller forever; a
/// kill surfaces as an ordinary failed result.
const OPTIMIZER_DEADLINE: Duration = Duration::from_secs(120);

/// Candidate optimizer installations, probed in order
#[cfg(not(windows))]
const OPTIMIZER_CANDIDATES: &[&str] = &[
    "/usr/bin/gs",
    "/usr/local/bin/gs",
    "/opt/homebrew/bin/gs",
    "/opt/local/bin/gs",
];
#[cfg(windows)]
const OPTIMIZER_CANDIDATES: &[&str] = &["gswin64c", "gswin32c"];

/// Last resort when no candidate answers the version probe
#[cfg(not(windows))]
const OPTIMIZER_FALLBACK: &str = "gs";
#[cfg(windows)]
const OPTIMIZER_FALLBACK: &str = "gswin64c";

/// Compression strength, serialized as its percent value (25/50/75)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CompressionLevel {
    Light,
    Medium,
    Heavy,
}

impl CompressionLevel {
    pub fn as_percent(self) -> u8 {
        match self {
            CompressionLevel::Light => 25,
            CompressionLevel::Medium => 50,
            CompressionLevel::Heavy => 75,
        }
    }

    /// Ghostscript `-dPDFSETTINGS` preset for this level
    pub fn preset(self) -> &'static str {
        match self {
            CompressionLevel::Light => "/printer",
            CompressionLevel::Medium => "/ebook",
            CompressionLevel::Heavy => "/screen",
        }
    }
}

impl TryFrom<u8> for CompressionLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            25 => Ok(CompressionLevel::Light),
            50 => Ok(CompressionLevel::Medium),
            75 => Ok(CompressionLevel::Heavy),
            other => Err(format!("Unsupported compression level: {}", other)),
        }
    }
}

impl From<CompressionLevel> for u8 {
    fn from(level: CompressionLevel) -> u8 {
        level.as_percent()
    }
}

/// Outcome of a compression attempt.
///
/// On failure the input size is reported as both original and compressed size
/// so callers always see consistent accounting.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionResult {
    pub success: bool,
    /// Output PDF bytes when compression succeeded
    pub data: Option<Vec<u8>>,
    pub original_size: usize,
    pub compressed_size: usize,
    /// Size reduction in percent, clamped to >= 0
    pub reduction_percent: u32,
    pub error: Option<String>,
}

impl CompressionResult {
    fn succeeded(original_size: usize, data: Vec<u8>) -> Self {
        let compressed_size = data.len();
        Self {
            success: true,
            data: Some(data),
            original_size,
            compressed_size,
            reduction_percent: reduction_percent(original_size, compressed_size),
            error: None,
        }
    }

    fn failed(input_size: usize, error: String) -> Self {
        Self {
            success: false,
            data: None,
            original_size: input_size,
            compressed_size: input_size,
            reduction_percent: 0,
            error: Some(error),
        }
    }
}

/// Size reduction in percent, clamped so growth never reads as negative savings
pub(crate) fn reduction_percent(original: usize, compressed: usize) -> u32 {
    if original == 0 {
        return 0;
    }
    let ratio = 1.0 - compressed as f64 / original as f64;
    (ratio * 100.0).round().max(0.0) as u32
}

/// Compress through the external optimizer using the discovered binary
pub fn compress(bytes: &[u8], level: CompressionLevel) -> CompressionResult {
    compress_with_binary(bytes, level, optimizer_binary())
}

/// Compress through a specific optimizer binary
pub fn compress_with_binary(bytes: &[u8], level: CompressionLevel, binary: &str) -> CompressionResult {
    match run_optimizer(bytes, level, binary) {
        Ok(output) => CompressionResult::succeeded(bytes.len(), output),
        Err(e) => {
            warn!(binary, error = %e, "external optimizer failed");
            CompressionResult::failed(bytes.len(), e.to_string())
        }
    }
}

/// Resolve the optimizer binary, probing candidates once per process
pub fn optimizer_binary() -> &'static str {
    static BINARY: OnceLock<String> = OnceLock::new();
    BINARY
        .get_or_init(|| {
            for candidate in OPTIMIZER_CANDIDATES {
                if probe_binary(candidate) {
                    debug!(binary = candidate, "optimizer found");
                    return candidate.to_string();
                }
            }
            debug!(
                fallback = OPTIMIZER_FALLBACK,
                "no optimizer candidate answered the version probe"
            );
            OPTIMIZER_FALLBACK.to_string()
        })
        .as_str()
}

/// Lightweight availability check: the binary exists and reports a version
fn probe_binary(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn run_optimizer(
    bytes: &[u8],
    level: CompressionLevel,
    binary: &str,
) -> Result<Vec<u8>, PdfEditError> {
    // The scratch directory is dropped on every exit path below; removal
    // failures are swallowed by tempfile rather than escalated.
    let scratch = tempfile::tempdir()
        .map_err(|e| PdfEditError::Operation(format!("Failed to create scratch directory: {}", e)))?;
    let input_path = scratch.path().join("input.pdf");
    let output_path = scratch.path().join("output.pdf");

    std::fs::write(&input_path, bytes)
        .map_err(|e| PdfEditError::Operation(format!("Failed to write scratch input: {}", e)))?;

    let mut command = Command::new(binary);
    command
        .arg("-sDEVICE=pdfwrite")
        .arg("-dCompatibilityLevel=1.4")
        .arg(format!("-dPDFSETTINGS={}", level.preset()))
        .arg("-dNOPAUSE")
        .arg("-dQUIET")
        .arg("-dBATCH")
        .arg(format!("-sOutputFile={}", output_path.display()))
        .arg(&input_path);

    let (status, stderr) = wait_with_deadline(command, OPTIMIZER_DEADLINE)?;
    if !status.success() {
        let code = status
            .code()
            .map_or_else(|| "unknown".to_string(), |c| c.to_string());
        return Err(PdfEditError::Operation(format!(
            "Optimizer exited with code {}: {}",
            code,
            stderr.trim()
        )));
    }

    let data = std::fs::read(&output_path)
        .map_err(|e| PdfEditError::Operation(format!("Failed to read optimizer output: {}", e)))?;
    if data.is_empty() {
        return Err(PdfEditError::Operation(
            "Optimizer produced an empty output file".into(),
        ));
    }
    Ok(data)
}

/// Run a child process, killing it when the deadline expires
fn wait_with_deadline(
    mut command: Command,
    deadline: Duration,
) -> Result<(ExitStatus, String), PdfEditError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PdfEditError::Operation(format!("Failed to launch optimizer: {}", e)))?;

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Ok((status, stderr));
            }
            Ok(None) => {
                if started.elapsed() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PdfEditError::Operation(format!(
                        "Optimizer did not finish within {} seconds",
                        deadline.as_secs()
                    )));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PdfEditError::Operation(format!(
                    "Failed to wait for optimizer: {}",
                    e
                )));
            }
        }
    }
}

/// Compress without leaving the process: compact re-save, plus metadata
/// stripping at Medium and form flattening at Heavy
pub fn compress_in_process(bytes: &[u8], level: CompressionLevel) -> CompressionResult {
    match optimize_in_process(bytes, level) {
        Ok(data) => CompressionResult::succeeded(bytes.len(), data),
        Err(e) => CompressionResult::failed(bytes.len(), e.to_string()),
    }
}

fn optimize_in_process(bytes: &[u8], level: CompressionLevel) -> Result<Vec<u8>, PdfEditError> {
    let mut doc = load_document(bytes)?;
    if level >= CompressionLevel::Medium {
        strip_metadata(&mut doc);
    }
    if level >= CompressionLevel::Heavy {
        flatten_form_fields(&mut doc);
    }
    save_document(&mut doc, SaveOptions { compact: true })
}

const DOC_INFO_KEYS: [&[u8]; 6] = [
    b"Title",
    b"Author",
    b"Subject",
    b"Keywords",
    b"Creator",
    b"Producer",
];

fn strip_metadata(doc: &mut Document) {
    let info_id = match doc.trailer.get(b"Info").and_then(|obj| obj.as_reference()) {
        Ok(id) => id,
        Err(_) => return,
    };
    if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(info_id) {
        for key in DOC_INFO_KEYS {
            dict.remove(key);
        }
    }
}

/// Paint widget appearance streams into page content and drop the AcroForm.
///
/// A widget without a usable appearance stays behind untouched; flattening is
/// best-effort, never a failure.
fn flatten_form_fields(doc: &mut Document) {
    let catalog_id = match doc.trailer.get(b"Root").and_then(|obj| obj.as_reference()) {
        Ok(id) => id,
        Err(_) => return,
    };
    let has_form = doc
        .get_object(catalog_id)
        .and_then(|obj| obj.as_dict())
        .map(|dict| dict.get(b"AcroForm").is_ok())
        .unwrap_or(false);
    if !has_form {
        return;
    }

    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for page_id in pages {
        if let Err(e) = flatten_page_widgets(doc, page_id) {
            warn!(error = %e, "could not flatten widgets on page, leaving them interactive");
        }
    }

    if let Ok(Object::Dictionary(catalog)) = doc.get_object_mut(catalog_id) {
        catalog.remove(b"AcroForm");
    }
}

struct WidgetStamp {
    appearance_id: ObjectId,
    x: f64,
    y: f64,
}

fn flatten_page_widgets(doc: &mut Document, page_id: ObjectId) -> Result<(), PdfEditError> {
    let annots = match page_annotations(doc, page_id) {
        Some(annots) => annots,
        None => return Ok(()),
    };

    let mut kept: Vec<Object> = Vec::new();
    let mut stamps: Vec<WidgetStamp> = Vec::new();

    for entry in &annots {
        match widget_stamp(doc, entry) {
            Some(stamp) => stamps.push(stamp),
            None => kept.push(entry.clone()),
        }
    }

    if !stamps.is_empty() {
        let mut operations = Vec::new();
        for stamp in &stamps {
            let name = format!("Fld{}", stamp.appearance_id.0);
            set_page_resource(
                doc,
                page_id,
                b"XObject",
                &name,
                Object::Reference(stamp.appearance_id),
            )?;
            operations.extend(vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(1.0),
                        Object::Real(0.0),
                        Object::Real(0.0),
                        Object::Real(1.0),
                        Object::Real(stamp.x as f32),
                        Object::Real(stamp.y as f32),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(name.into_bytes())]),
                Operation::new("Q", vec![]),
            ]);
        }

        let data = Content { operations }
            .encode()
            .map_err(|e| PdfEditError::Operation(format!("Failed to encode content: {}", e)))?;
        let stream_id = doc.add_object(Object::Stream(Stream::new(Dictionary::new(), data)));
        append_page_content(doc, page_id, stream_id)?;
    }

    if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
        if kept.is_empty() {
            page.remove(b"Annots");
        } else {
            page.set("Annots", Object::Array(kept));
        }
    }
    Ok(())
}

/// The page's Annots entries, with an indirect array resolved
fn page_annotations(doc: &Document, page_id: ObjectId) -> Option<Vec<Object>> {
    let page = doc.get_object(page_id).ok()?.as_dict().ok()?;
    match page.get(b"Annots").ok()? {
        Object::Array(array) => Some(array.clone()),
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::Array(array) => Some(array.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Stamp plan for a flattenable widget annotation; `None` means the entry is
/// not a widget or has no usable normal appearance
fn widget_stamp(doc: &Document, entry: &Object) -> Option<WidgetStamp> {
    let annot_id = entry.as_reference().ok()?;
    let annot = doc.get_object(annot_id).ok()?.as_dict().ok()?;

    match annot.get(b"Subtype").ok()? {
        Object::Name(name) if name == b"Widget" => {}
        _ => return None,
    }

    let appearances = match annot.get(b"AP").ok()? {
        Object::Dictionary(dict) => dict.clone(),
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok()?.clone(),
        _ => return None,
    };
    let appearance_id = match appearances.get(b"N").ok()? {
        // An appearance sub-dictionary (on/off states) is not flattenable here
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::Stream(_) => *id,
            _ => return None,
        },
        _ => return None,
    };

    let rect = parse_box_array(annot.get(b"Rect").ok()?.as_array().ok()?).ok()?;
    Some(WidgetStamp {
        appearance_id,
        x: rect[0].min(rect[2]),
        y: rect[1].min(rect[3]),
    })
}
