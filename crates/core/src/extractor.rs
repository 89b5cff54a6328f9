use crate::chunking::normalize_whitespace;
use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;
use tracing::warn;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Reason carried by the extraction error for documents without any text.
pub const EMPTY_TEXT_REASON: &str = "document has no text";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    pub fn from_file_name(file_name: &str) -> Self {
        match extension(file_name).as_deref() {
            Some("pdf") => Self::Pdf,
            _ => Self::Text,
        }
    }
}

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn content_type_for(file_name: &str) -> &'static str {
    match extension(file_name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") | Some("markdown") => "text/markdown",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("html") | Some("htm") => "text/html",
        _ => "application/octet-stream",
    }
}

/// Turns a raw upload into normalized plain text.
pub fn extract_text(bytes: &[u8], file_name: &str) -> Result<String, IngestError> {
    let raw = match DocumentKind::from_file_name(file_name) {
        DocumentKind::Pdf => extract_pdf_text(bytes, file_name)?,
        DocumentKind::Text => decode_utf8(bytes, file_name)?,
    };

    let normalized = normalize_whitespace(&raw);
    if normalized.is_empty() {
        return Err(IngestError::extraction(file_name, EMPTY_TEXT_REASON));
    }

    Ok(normalized)
}

fn decode_utf8(bytes: &[u8], file_name: &str) -> Result<String, IngestError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|error| {
        IngestError::extraction(file_name, format!("unsupported encoding: {error}"))
    })
}

fn extract_pdf_text(bytes: &[u8], file_name: &str) -> Result<String, IngestError> {
    let document = Document::load_mem(bytes)
        .map_err(|error| IngestError::extraction(file_name, error.to_string()))?;

    let mut pages = Vec::new();
    for page_no in document.get_pages().into_keys() {
        match document.extract_text(&[page_no]) {
            Ok(text) if !text.trim().is_empty() => pages.push(text),
            Ok(_) => {}
            Err(error) => {
                warn!(file = %file_name, page = page_no, %error, "skipping unreadable pdf page");
            }
        }
    }

    // Blank or image-only documents fall through to the empty-text check.
    Ok(pages.join("\n"))
}
