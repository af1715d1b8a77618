//! Document source
//!
//! Reads a document off disk once per query and normalizes its text:
//! - `.pdf` through lopdf, page-capped
//! - `.txt` / `.md` as UTF-8
//!
//! Cleanup replaces ideographic spaces, normalizes line endings and
//! collapses runs of blank lines into one, so paragraph breaks survive for
//! the segmenter.

use crate::chunker::estimate_tokens;
use crate::errors::IngestionError;
use crate::pdf::extract_text_from_pdf;
use async_trait::async_trait;
use docnav_common::errors::{AppError, Result};
use docnav_common::models::Document;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Default page cap for PDF extraction
pub const DEFAULT_MAX_PAGES: usize = 1000;

/// Where documents come from
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Load the full text of the document at `path`
    async fn read(&self, path: &Path) -> Result<Document>;
}

/// Local filesystem source
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    max_pages: usize,
}

impl Default for FsDocumentSource {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentKind {
    Pdf,
    PlainText,
}

fn document_kind(path: &Path) -> Option<DocumentKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(DocumentKind::Pdf),
        "txt" | "md" | "markdown" => Some(DocumentKind::PlainText),
        _ => None,
    }
}

impl FsDocumentSource {
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages: max_pages.max(1),
        }
    }

    async fn read_raw(&self, path: &Path) -> std::result::Result<String, IngestionError> {
        let display = path.display().to_string();

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(IngestionError::FileNotFound(display));
        }

        let kind = document_kind(path).ok_or_else(|| IngestionError::UnsupportedType(display.clone()))?;

        match kind {
            DocumentKind::Pdf => {
                let owned: PathBuf = path.to_path_buf();
                let max_pages = self.max_pages;
                tokio::task::spawn_blocking(move || extract_text_from_pdf(&owned, max_pages))
                    .await
                    .map_err(|e| IngestionError::PdfParseError {
                        path: display.clone(),
                        message: format!("extraction task failed: {}", e),
                    })?
            }
            DocumentKind::PlainText => tokio::fs::read_to_string(path)
                .await
                .map_err(|source| IngestionError::Io { path: display, source }),
        }
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn read(&self, path: &Path) -> Result<Document> {
        let raw = self.read_raw(path).await?;
        let text = clean_text(&raw);

        if text.is_empty() {
            return Err(AppError::from(IngestionError::EmptyDocument(
                path.display().to_string(),
            )));
        }

        let token_estimate = estimate_tokens(&text);
        let document = Document::new(path, text, token_estimate);

        info!(
            chars = document.char_count,
            tokens = document.token_estimate,
            preview = %document.preview(80),
            "Document loaded"
        );

        Ok(document)
    }
}

/// Normalize extracted text
pub fn clean_text(text: &str) -> String {
    let normalized = text
        .replace('\u{FEFF}', "")
        .replace('\u{3000}', " ")
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    let mut out = String::with_capacity(normalized.len());
    let mut pending_blank = false;

    for line in normalized.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            pending_blank = true;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        out.push_str(line);
    }

    out
}
