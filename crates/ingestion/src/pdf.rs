//! PDF text extraction module
//!
//! Extracts text content from PDF files using lopdf.

use crate::errors::IngestionError;
use std::path::Path;
use tracing::{debug, warn};

/// Extract the text of up to `max_pages` pages, one line break after each page
pub fn extract_text_from_pdf(path: &Path, max_pages: usize) -> Result<String, IngestionError> {
    let doc = lopdf::Document::load(path).map_err(|e| IngestionError::PdfParseError {
        path: path.display().to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages();
    let total_pages = pages.len();

    debug!(page_count = total_pages, max_pages, "Extracting text from PDF");

    let mut text = String::new();
    for page_num in pages.keys().take(max_pages) {
        match doc.extract_text(&[*page_num]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
            }
        }
    }

    if total_pages > max_pages {
        warn!(total_pages, max_pages, "Page limit reached, remaining pages ignored");
    }

    if text.trim().is_empty() {
        return Err(IngestionError::EmptyDocument(path.display().to_string()));
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_a_pdf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"plain text, not a pdf").unwrap();

        let err = extract_text_from_pdf(file.path(), 10).unwrap_err();
        assert!(matches!(err, IngestionError::PdfParseError { .. }));
    }
}
