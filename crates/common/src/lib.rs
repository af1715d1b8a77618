//! DocNav Common Library
//!
//! Shared code for the DocNav crates including:
//! - Error types and handling
//! - Configuration management
//! - The completion-service capability and its OpenAI-compatible backend
//! - Data model (documents, chunk tree, verdicts, answers, audit record)
//! - Metrics and observability

pub mod config;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, CompletionError, Result};
pub use llm::{CompletionBackends, CompletionService};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
