//! Ingestion error types

use docnav_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("PDF parse error for {path}: {message}")]
    PdfParseError { path: String, message: String },

    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("No text content extracted from {0}")]
    EmptyDocument(String),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::FileNotFound(path) => AppError::DocumentNotFound { path },
            IngestionError::PdfParseError { path, message } => {
                AppError::DocumentUnreadable { path, message }
            }
            IngestionError::UnsupportedType(path) => AppError::UnsupportedDocument { path },
            IngestionError::EmptyDocument(path) => AppError::EmptyDocument { path },
            IngestionError::Io { path, source } => AppError::DocumentUnreadable {
                path,
                message: source.to_string(),
            },
        }
    }
}
