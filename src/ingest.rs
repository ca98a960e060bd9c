//! Source document ingestion
//!
//! Byte-level extraction (PDF, HWP, ...) lives outside this crate behind
//! [`TextExtractor`]. Everything downstream works on normalised text and a
//! content-addressed [`DocumentId`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{PipelineError, Result};

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t\r]*\n(?:[ \t\r]*\n)*").unwrap());

/// Content-addressed document identity (blake3 hex of the normalised text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Identity of a normalised text. Same text, same id.
    pub fn for_text(text: &str) -> Self {
        Self(blake3::hash(text.as_bytes()).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// External text extraction seam: `extract_raw_text(bytes, mime) -> string`.
pub trait TextExtractor: Send + Sync {
    fn extract_raw_text(&self, bytes: &[u8], mime_type: &str) -> Result<String>;
}

/// Extractor for UTF-8 plain text and markdown input
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_raw_text(&self, bytes: &[u8], mime_type: &str) -> Result<String> {
        match mime_type {
            "text/plain" | "text/markdown" => String::from_utf8(bytes.to_vec())
                .map_err(|e| PipelineError::Generic(format!("Input is not valid UTF-8: {}", e))),
            other => Err(PipelineError::Generic(format!(
                "No extractor registered for mime type '{}'",
                other
            ))),
        }
    }
}

/// Guess a mime type from a file extension
pub fn mime_for_path(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("md") | Some("markdown") => "text/markdown",
        _ => "text/plain",
    }
}

/// Collapse blank-line runs to a single newline and trim the ends.
///
/// Page-by-page extraction leaves stacks of empty lines between pages; the
/// chunker treats a single newline as a soft boundary, so this keeps paragraph
/// structure without inflating chunk sizes.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n");
    BLANK_RUNS.replace_all(&unified, "\n").trim().to_string()
}

/// A normalised source document ready for chunking
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: DocumentId,
    pub name: String,
    pub text: String,
}

impl SourceDocument {
    /// Normalise raw text and compute its identity
    pub fn from_text(name: impl Into<String>, raw: &str) -> Self {
        let text = normalize_text(raw);
        Self {
            id: DocumentId::for_text(&text),
            name: name.into(),
            text,
        }
    }

    /// Run an extractor over raw bytes, then normalise
    pub fn from_bytes(
        extractor: &dyn TextExtractor,
        name: impl Into<String>,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<Self> {
        let raw = extractor.extract_raw_text(bytes, mime_type)?;
        Ok(Self::from_text(name, &raw))
    }
}
