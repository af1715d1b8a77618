//! Error types for DocNav
//!
//! Provides:
//! - Distinct error types for each failure mode of a query
//! - Machine-readable error codes
//! - The completion-service failure taxonomy (timeout, malformed output, transport)

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input errors (1xxx)
    InvalidInput,
    MissingField,

    // Document errors (4xxx)
    DocumentNotFound,
    DocumentUnreadable,
    UnsupportedDocument,
    EmptyDocument,

    // Model / upstream errors (8xxx)
    CompletionTimeout,
    MalformedOutput,
    TransportError,
    UpstreamError,
    SynthesisError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    AuditWriteError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 1001,
            ErrorCode::MissingField => 1002,

            ErrorCode::DocumentNotFound => 4001,
            ErrorCode::DocumentUnreadable => 4002,
            ErrorCode::UnsupportedDocument => 4003,
            ErrorCode::EmptyDocument => 4004,

            ErrorCode::CompletionTimeout => 8001,
            ErrorCode::MalformedOutput => 8002,
            ErrorCode::TransportError => 8003,
            ErrorCode::UpstreamError => 8004,
            ErrorCode::SynthesisError => 8005,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::AuditWriteError => 9004,
        }
    }
}

/// Failure of a single completion-service call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    #[error("Completion timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Malformed model output: {message}")]
    MalformedOutput { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
}

impl CompletionError {
    /// Transport-class failures abort a query once the single retry is spent.
    /// Timeouts and malformed output degrade instead.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CompletionError::Transport { .. } | CompletionError::Upstream { .. }
        )
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        CompletionError::MalformedOutput {
            message: message.into(),
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Input errors
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    // Document load errors
    #[error("Document not found: {path}")]
    DocumentNotFound { path: String },

    #[error("Document unreadable: {path}: {message}")]
    DocumentUnreadable { path: String, message: String },

    #[error("Unsupported document type: {path}")]
    UnsupportedDocument { path: String },

    #[error("Document has no text content: {path}")]
    EmptyDocument { path: String },

    // Model errors
    #[error("Completion failed for {role} backend: {source}")]
    Completion {
        role: String,
        #[source]
        source: CompletionError,
    },

    #[error("Answer synthesis failed: {message}")]
    Synthesis { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit record could not be written to {path}: {message}")]
    AuditWrite { path: String, message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidInput { .. } => ErrorCode::InvalidInput,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            AppError::DocumentUnreadable { .. } => ErrorCode::DocumentUnreadable,
            AppError::UnsupportedDocument { .. } => ErrorCode::UnsupportedDocument,
            AppError::EmptyDocument { .. } => ErrorCode::EmptyDocument,
            AppError::Completion { source, .. } => match source {
                CompletionError::Timeout { .. } => ErrorCode::CompletionTimeout,
                CompletionError::MalformedOutput { .. } => ErrorCode::MalformedOutput,
                CompletionError::Transport { .. } => ErrorCode::TransportError,
                CompletionError::Upstream { .. } => ErrorCode::UpstreamError,
            },
            AppError::Synthesis { .. } => ErrorCode::SynthesisError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::AuditWrite { .. } => ErrorCode::AuditWriteError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Document load failures abort before any audit record exists
    pub fn is_document_load(&self) -> bool {
        matches!(
            self,
            AppError::DocumentNotFound { .. }
                | AppError::DocumentUnreadable { .. }
                | AppError::UnsupportedDocument { .. }
                | AppError::EmptyDocument { .. }
        )
    }

    pub fn completion(role: impl Into<String>, source: CompletionError) -> Self {
        AppError::Completion {
            role: role.into(),
            source,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
